//! Vector index client.
//!
//! Wraps similarity-search queries against the external vector index. The
//! client is a passthrough: it does not interpret match metadata or reorder
//! results — ranking is the index's responsibility.

use std::sync::Arc;

use crate::config::{api_key_from_env, IndexConfig};
use crate::dispatch::RateLimitedDispatcher;
use crate::error::IndexError;
use crate::models::VectorMatch;

pub struct VectorIndexClient {
    dispatcher: Arc<RateLimitedDispatcher>,
    url: String,
    api_key: Option<String>,
}

impl VectorIndexClient {
    pub fn new(dispatcher: Arc<RateLimitedDispatcher>, config: &IndexConfig) -> Self {
        Self {
            dispatcher,
            url: config.url.clone(),
            api_key: api_key_from_env(&config.api_key_env),
        }
    }

    /// Query the index for the nearest neighbours of `vector`.
    ///
    /// Fails with [`IndexError::Unavailable`] when the dispatcher gives up on
    /// the endpoint, and [`IndexError::MalformedResponse`] when the reply
    /// lacks a `matches` field or the matches cannot be decoded.
    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_values: bool,
        include_metadata: bool,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<VectorMatch>, IndexError> {
        let mut body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeValues": include_values,
            "includeMetadata": include_metadata,
        });
        if let Some(filter) = filter {
            body["filter"] = filter.clone();
        }

        let mut headers = Vec::new();
        if let Some(key) = &self.api_key {
            headers.push(("api-key", key.clone()));
        }

        let response = self.dispatcher.post_json(&self.url, &headers, &body).await?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IndexError::MalformedResponse(format!("body is not JSON: {}", e)))?;

        let matches = payload
            .get("matches")
            .ok_or_else(|| IndexError::MalformedResponse("missing `matches` field".to_string()))?;

        serde_json::from_value(matches.clone())
            .map_err(|e| IndexError::MalformedResponse(format!("undecodable matches: {}", e)))
    }
}
