//! HTTP surface: retrieval, manual ingestion and ledger views

pub mod routes;
pub mod state;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::error::{Error, Result};
pub use state::AppState;

/// Indexer HTTP server
pub struct IndexerServer {
    state: AppState,
}

impl IndexerServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .nest("/api", routes::api_routes())
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.state.config().server.enable_cors {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            router
        }
    }

    /// Get the server address
    pub fn address(&self) -> String {
        let server = &self.state.config().server;
        format!("{}:{}", server.host, server.port)
    }

    /// Bind the configured address
    pub async fn listen(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind {}: {}", addr, e)))
    }

    /// Bind, then serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.listen().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Starting doc-indexer server on http://{}", addr);
        }

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Health check endpoint: 503 when the embedder or the store is unavailable
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let embedder = state.embedder();
    let store = state.store();

    let (embedder_ok, store_ok) = tokio::join!(embedder.health_check(), store.health_check());
    let embedder_ok = embedder_ok.unwrap_or(false);
    let store_ok = store_ok.unwrap_or(false);

    let status = if embedder_ok && store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "embedder": {
                "name": embedder.name(),
                "healthy": embedder_ok,
                "dimensions": embedder.dimensions(),
            },
            "vector_store": {
                "name": store.name(),
                "healthy": store_ok,
            },
        })),
    )
}
