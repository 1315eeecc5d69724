//! User records used to resolve bearer tokens into identities.

use cadence_types::Identity;
use rusqlite::{params, Connection, OptionalExtension};

use crate::StoreError;

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub active: bool,
    pub created_at: String,
}

impl UserRecord {
    /// Converts the record into the identity attached to a session.
    pub fn into_identity(self) -> Identity {
        Identity {
            user_id: self.id,
            email: self.email,
            roles: self.roles,
        }
    }
}

/// Inserts a new active user with a generated UUID id.
///
/// # Errors
///
/// Returns `StoreError::Database` if the email is already taken.
pub fn create_user(
    conn: &Connection,
    email: &str,
    roles: &[String],
) -> Result<UserRecord, StoreError> {
    let id = uuid::Uuid::new_v4().to_string();
    let roles_json = serde_json::to_string(roles)?;

    conn.execute(
        "INSERT INTO users (id, email, roles_json, active) VALUES (?1, ?2, ?3, 1)",
        params![id, email, roles_json],
    )?;

    get_user_by_email(conn, email)?.ok_or_else(|| StoreError::NotFound(email.to_string()))
}

/// Looks up a user by email. Returns `Ok(None)` when no row matches.
pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, email, roles_json, active, created_at FROM users WHERE email = ?1",
            [email],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((id, email, roles_json, active, created_at)) => Ok(Some(UserRecord {
            id,
            email,
            roles: serde_json::from_str(&roles_json)?,
            active,
            created_at,
        })),
        None => Ok(None),
    }
}

/// Marks a user inactive. Inactive users fail token resolution.
pub fn deactivate_user(conn: &Connection, email: &str) -> Result<(), StoreError> {
    let changed = conn.execute("UPDATE users SET active = 0 WHERE email = ?1", [email])?;
    if changed == 0 {
        return Err(StoreError::NotFound(email.to_string()));
    }
    Ok(())
}
