//! Role-based access check.

use crate::Identity;

/// Roles allowed to use the voice agent when no explicit list is configured.
pub const DEFAULT_ALLOWED_ROLES: &[&str] = &["SuperAdmin", "Formateur-int", "Formateur-ext", "Formé"];

/// Returns `true` if `identity` holds at least one of `allowed_roles`.
///
/// An empty allow-list denies everyone.
pub fn check_role<S: AsRef<str>>(identity: &Identity, allowed_roles: &[S]) -> bool {
    allowed_roles
        .iter()
        .any(|allowed| identity.has_role(allowed.as_ref()))
}
