//! Transcript log read endpoint.

use crate::{api::ApiError, middleware::IdentityContext, AppState};
use axum::{
    extract::{Extension, Path},
    Json,
};
use cadence_types::TranscriptRecord;
use std::sync::Arc;

/// Role that may read every user's transcripts.
const TRANSCRIPT_ADMIN_ROLE: &str = "SuperAdmin";

/// Handler for `GET /transcripts/{session_id}`.
///
/// Callers see their own records only, unless they hold the admin role.
pub async fn list_session_transcripts_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(IdentityContext(identity)): Extension<IdentityContext>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<TranscriptRecord>>, ApiError> {
    let mut records = state.transcripts.list_by_session(&session_id).await?;

    if !identity.has_role(TRANSCRIPT_ADMIN_ROLE) {
        records.retain(|record| record.user_id == identity.user_id);
    }

    Ok(Json(records))
}
