//! Ollama embedding provider with retry logic

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Ollama embedding provider (`POST /api/embeddings`)
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
    /// First backoff delay; doubles per attempt
    retry_base: Duration,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_retries: config.max_retries,
            retry_base: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay
    pub fn with_retry_base(mut self, delay: Duration) -> Self {
        self.retry_base = delay;
        self
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        let delay = self.retry_base * 2u32.pow(attempt);
                        tracing::warn!(
                            "Embedding request failed (attempt {}/{}), retrying in {:?}",
                            attempt + 1,
                            self.max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::embedding(Vec::new(), "no attempt was made")))
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::embedding(Vec::new(), format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::embedding(
                Vec::new(),
                format!("HTTP {} - {}", status, body),
            ));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(Vec::new(), format!("invalid response: {}", e)))?;

        if embed_response.embedding.len() != self.dimensions {
            return Err(Error::embedding(
                Vec::new(),
                format!(
                    "model {} returned {} dimensions, expected {}",
                    self.model,
                    embed_response.embedding.len(),
                    self.dimensions
                ),
            ));
        }

        Ok(embed_response.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.retry_request(|| self.embed_once(text)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base_url: String, dimensions: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url,
            dimensions,
            max_retries: 1,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embed_posts_model_and_prompt() {
        let router = Router::new().route(
            "/api/embeddings",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "all-minilm");
                let len = body["prompt"].as_str().unwrap().len() as f32;
                Json(json!({ "embedding": [len, 1.0, 0.0] }))
            }),
        );
        let base_url = serve(router).await;

        let embedder = OllamaEmbedder::new(&config(base_url, 3)).unwrap();
        let embedding = embedder.embed("four").await.unwrap();

        assert_eq!(embedding, vec![4.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_server_errors_surface_after_retries() {
        let router = Router::new().route(
            "/api/embeddings",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let base_url = serve(router).await;

        let embedder = OllamaEmbedder::new(&config(base_url, 3))
            .unwrap()
            .with_retry_base(Duration::from_millis(1));
        let err = embedder.embed("text").await.unwrap_err();

        assert!(matches!(err, Error::Embedding { .. }));
        assert!(err.to_string().contains("model not loaded"));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let router = Router::new().route(
            "/api/embeddings",
            post(|| async { Json(json!({ "embedding": [1.0, 2.0] })) }),
        );
        let base_url = serve(router).await;

        let embedder = OllamaEmbedder::new(&config(base_url, 384))
            .unwrap()
            .with_retry_base(Duration::from_millis(1));

        assert!(embedder.embed("text").await.is_err());
    }
}
