//! Read-only views of the record ledger

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use super::request_group;
use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{BatchRecord, LedgerStats};

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /api/ledger/stats
pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerStats>> {
    let group = request_group(&state, query.group_key)?;
    let ledger = state.ledger().clone();
    let stats = tokio::task::spawn_blocking(move || ledger.stats(&group))
        .await
        .map_err(|e| Error::internal(format!("Ledger task failed: {}", e)))??;
    Ok(Json(stats))
}

/// GET /api/ledger/batches
pub async fn batches(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<BatchRecord>>> {
    let group = request_group(&state, query.group_key)?;
    let limit = query.limit.unwrap_or(20).min(500);
    let ledger = state.ledger().clone();
    let batches = tokio::task::spawn_blocking(move || ledger.recent_batches(&group, limit))
        .await
        .map_err(|e| Error::internal(format!("Ledger task failed: {}", e)))??;
    Ok(Json(batches))
}
