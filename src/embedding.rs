//! Embedding client.
//!
//! Thin wrapper over the external embeddings endpoint. Query text is reduced
//! to ASCII before embedding: the index was built from ASCII-cleaned text,
//! and stray non-ASCII bytes must not shift a query into a different part of
//! the embedding space than its indexed neighbours.
//!
//! Transport-level retry and rate limiting are the dispatcher's job; this
//! module only shapes the request and decodes the response.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{api_key_from_env, EmbeddingConfig};
use crate::dispatch::RateLimitedDispatcher;

pub struct EmbeddingClient {
    dispatcher: Arc<RateLimitedDispatcher>,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

/// Drop every non-ASCII character from `text`.
pub fn strip_non_ascii(text: &str) -> String {
    text.chars().filter(char::is_ascii).collect()
}

impl EmbeddingClient {
    pub fn new(dispatcher: Arc<RateLimitedDispatcher>, config: &EmbeddingConfig) -> Self {
        Self {
            dispatcher,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: api_key_from_env(&config.api_key_env),
        }
    }

    /// Embed a single query text into a fixed-length vector.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input = strip_non_ascii(text);
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let mut headers = Vec::new();
        if let Some(key) = &self.api_key {
            headers.push(("authorization", format!("Bearer {}", key)));
        }

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .dispatcher
            .post_json(&url, &headers, &body)
            .await
            .context("embedding request failed")?;

        let payload: serde_json::Value = response
            .json()
            .await
            .context("embedding response was not JSON")?;

        parse_embedding_response(&payload)
    }
}

/// Extract the first `data[].embedding` array from an embeddings response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data[0].embedding"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_non_ascii() {
        assert_eq!(strip_non_ascii("héllo wörld"), "hllo wrld");
        assert_eq!(strip_non_ascii("plain ascii"), "plain ascii");
        assert_eq!(strip_non_ascii("日本語"), "");
    }

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({
            "data": [{"embedding": [0.25, -1.5, 3.0]}]
        });
        let vec = parse_embedding_response(&json).unwrap();
        assert_eq!(vec, vec![0.25f32, -1.5, 3.0]);
    }

    #[test]
    fn test_parse_embedding_response_missing_data() {
        let json = serde_json::json!({"error": "nope"});
        assert!(parse_embedding_response(&json).is_err());
    }
}
