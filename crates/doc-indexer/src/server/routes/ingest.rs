//! Manual ingestion trigger

use axum::{extract::State, Json};
use serde::Deserialize;

use super::request_group;
use crate::error::Result;
use crate::server::state::AppState;
use crate::types::IngestionReport;

#[derive(Debug, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub group_key: Option<String>,
}

/// POST /api/ingest - run one pass over the incoming folder.
///
/// Waits for a pass already running on the same group.
pub async fn ingest(
    State(state): State<AppState>,
    body: Option<Json<IngestRequest>>,
) -> Result<Json<IngestionReport>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let group = request_group(&state, request.group_key)?;

    let report = state.watcher().run_ingestion_pass(&group).await?;
    Ok(Json(report))
}
