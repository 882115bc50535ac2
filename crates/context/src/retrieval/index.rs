//! Semantic index client
//!
//! The nearest-neighbor service itself lives outside this workspace; this
//! module defines the search contract and a JSON-over-HTTP client for it.

use async_trait::async_trait;
use proposalforge_common::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Raw hit as reported by an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    /// Explicit record id, if the index stores one
    #[serde(default)]
    pub id: Option<String>,

    /// Source document path or URI
    #[serde(default)]
    pub source: Option<String>,

    /// Page number or free-form location
    #[serde(default)]
    pub location: Option<serde_json::Value>,

    /// Passage text
    pub content: String,

    /// Document title
    #[serde(default)]
    pub title: Option<String>,

    /// Similarity score
    #[serde(default)]
    pub score: Option<f32>,
}

/// Nearest-neighbor search over embedded passages
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Name used in logs, metrics and errors
    fn name(&self) -> &str;

    /// Return hits for `query` in the index's own relevance order
    async fn search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<IndexHit>>;
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
    fetch_k: usize,
    score_threshold: f32,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<IndexHit>,
}

/// HTTP client for a remote semantic index (`POST {base_url}/search`)
pub struct HttpSemanticIndex {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpSemanticIndex {
    /// Create a client for the index at `base_url`
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn error(&self, message: String) -> AppError {
        AppError::Retrieval {
            index: self.name.clone(),
            message,
        }
    }
}

#[async_trait]
impl SemanticIndex for HttpSemanticIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<IndexHit>> {
        let url = format!("{}/search", self.base_url);
        let request = SearchRequest {
            query,
            k,
            fetch_k,
            score_threshold,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.error(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("Index error {}: {}", status, body)));
        }

        let result: SearchResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("Malformed response: {}", e)))?;

        Ok(result.hits)
    }
}
