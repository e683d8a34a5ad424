//! API routes

pub mod ingest;
pub mod ledger;
pub mod search;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::config::validate_group_key;
use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/search", post(search::search))
        .route("/ingest", post(ingest::ingest))
        .route("/ledger/stats", get(ledger::stats))
        .route("/ledger/batches", get(ledger::batches))
        .route("/info", get(info))
}

/// The requested group, or the configured default; rejected when invalid
pub(crate) fn request_group(state: &AppState, group_key: Option<String>) -> Result<String> {
    let group = group_key.unwrap_or_else(|| state.default_group().to_string());
    validate_group_key(&group).map_err(|e| match e {
        Error::Config(message) => Error::InvalidRequest(message),
        other => other,
    })?;
    Ok(group)
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let ledger = state.ledger().clone();
    let groups = tokio::task::spawn_blocking(move || ledger.groups())
        .await
        .map_err(|e| Error::internal(format!("Ledger task failed: {}", e)))??;

    let config = state.config();
    Ok(Json(serde_json::json!({
        "name": "doc-indexer",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Incremental PDF ingestion with a chunk ledger and vector retrieval",
        "group_key": config.group_key,
        "indexed_groups": groups,
        "incoming": config.folders.incoming,
        "processed": config.folders.processed,
        "embedding_model": config.embeddings.model,
        "chunking": {
            "chunk_size": config.chunking.chunk_size,
            "chunk_overlap": config.chunking.chunk_overlap,
        },
        "endpoints": {
            "GET /health": "Embedder and vector store availability",
            "POST /api/search": "Nearest chunks for a query",
            "POST /api/ingest": "Run one ingestion pass over the incoming folder",
            "GET /api/ledger/stats": "Ledger entry and source counts for a group",
            "GET /api/ledger/batches": "Recently committed ingestion batches",
        }
    })))
}
