//! Similarity search endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::request_group;
use crate::error::{Error, Result};
use crate::retrieval::RetrievedChunk;
use crate::server::state::AppState;

const MAX_K: usize = 100;

fn default_k() -> usize {
    4
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    /// Restrict to one group; all groups when absent
    #[serde(default)]
    pub group_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<RetrievedChunk>,
    pub processing_time_ms: u64,
}

/// POST /api/search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();

    if request.query.trim().is_empty() {
        return Err(Error::InvalidRequest("query must not be empty".into()));
    }
    let k = request.k.clamp(1, MAX_K);
    let group = match request.group_key {
        Some(group) => Some(request_group(&state, Some(group))?),
        None => None,
    };

    tracing::info!("Search: \"{}\" (k={})", request.query, k);

    let results = match group.as_deref() {
        Some(group) => state.retriever().search_in_group(&request.query, k, group).await?,
        None => state.retriever().search(&request.query, k).await?,
    };

    Ok(Json(SearchResponse {
        query: request.query,
        results,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
