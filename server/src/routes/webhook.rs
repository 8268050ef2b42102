use super::{ApiError, AppState};
use crate::dispatcher::{self, IngestOutcome};
use axum::extract::{Json, State};
use common::{IngestResponse, WebhookEvent};
use tracing::info;

/// Receives an event already normalized from the provider's payload.
pub async fn build_ingest(
    State(AppState { store, .. }): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<IngestResponse>, ApiError> {
    info!(
        "Got {} event {} for repository {} at {}",
        event.provider, event.provider_event_id, event.repository_id, event.head
    );

    let outcome = dispatcher::ingest(&*store, &event)?;
    Ok(Json(IngestResponse {
        build_id: outcome.build_id(),
        duplicate: matches!(outcome, IngestOutcome::Duplicate(_)),
    }))
}
