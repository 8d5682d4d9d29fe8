//! Document access gateway.
//!
//! Resolves document content, links, and per-user access against the external
//! document store (a drive-style API), reached through the rate-limited
//! dispatcher with the caller's bearer token.
//!
//! # Null vs. error
//!
//! Content lookups return `Option<String>`: a document that cannot be
//! retrieved is a "skip", not an abort, because the retrieval loop treats
//! inaccessible documents as simply absent. Link resolution is different — a
//! missing link after a successful content fetch is a genuine error and is
//! reported as [`LinkResolutionError`].

use std::sync::Arc;

use crate::chunk;
use crate::config::{ChunkingConfig, DocumentsConfig};
use crate::dispatch::RateLimitedDispatcher;
use crate::error::{DispatchError, LinkResolutionError};
use crate::models::Link;

pub struct DocumentGateway {
    dispatcher: Arc<RateLimitedDispatcher>,
    base_url: String,
    chunking: ChunkingConfig,
}

fn bearer(token: &str) -> [(&'static str, String); 1] {
    [("authorization", format!("Bearer {}", token))]
}

impl DocumentGateway {
    pub fn new(
        dispatcher: Arc<RateLimitedDispatcher>,
        config: &DocumentsConfig,
        chunking: &ChunkingConfig,
    ) -> Self {
        Self {
            dispatcher,
            base_url: config.base_url.clone(),
            chunking: chunking.clone(),
        }
    }

    /// Full text of a document, or `None` if it cannot be retrieved.
    pub async fn fetch_document_text(
        &self,
        auth_token: &str,
        drive_id: &str,
        item_id: &str,
    ) -> Option<String> {
        let url = format!(
            "{}/drives/{}/items/{}/content",
            self.base_url, drive_id, item_id
        );

        match self.dispatcher.get(&url, &bearer(auth_token)).await {
            Ok(response) => match response.text().await {
                Ok(text) => Some(text),
                Err(e) => {
                    eprintln!("documents: failed reading content of {}: {}", item_id, e);
                    None
                }
            },
            Err(e) => {
                eprintln!("documents: could not fetch {}: {}", item_id, e);
                None
            }
        }
    }

    /// The chunk of a document at `chunk_index`.
    ///
    /// The document is split with the configured chunk size and overlap; an
    /// out-of-range index clamps to the last chunk. `None` when the document
    /// itself cannot be retrieved.
    pub async fn fetch_chunk(
        &self,
        auth_token: &str,
        drive_id: &str,
        item_id: &str,
        chunk_index: usize,
    ) -> Option<String> {
        let text = self
            .fetch_document_text(auth_token, drive_id, item_id)
            .await?;
        Some(chunk::chunk_at(
            &text,
            chunk_index,
            self.chunking.chunk_chars,
            self.chunking.overlap_chars,
        ))
    }

    /// Display name and canonical URL of a document.
    pub async fn fetch_document_link(
        &self,
        auth_token: &str,
        drive_id: &str,
        item_id: &str,
    ) -> Result<Link, LinkResolutionError> {
        let url = format!("{}/drives/{}/items/{}", self.base_url, drive_id, item_id);

        let response = self
            .dispatcher
            .get(&url, &bearer(auth_token))
            .await
            .map_err(|e| LinkResolutionError {
                item_id: item_id.to_string(),
                reason: e.to_string(),
            })?;

        let metadata: serde_json::Value =
            response.json().await.map_err(|e| LinkResolutionError {
                item_id: item_id.to_string(),
                reason: format!("metadata is not JSON: {}", e),
            })?;

        let href = metadata
            .get("webUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LinkResolutionError {
                item_id: item_id.to_string(),
                reason: "metadata has no webUrl".to_string(),
            })?
            .to_string();

        let name = metadata
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("Untitled document")
            .to_string();

        Ok(Link { name, href })
    }

    /// Whether the user behind `auth_token` can read `item_id`.
    ///
    /// True unless the store explicitly reports not-found. Any other failure
    /// is logged and conservatively treated as deny.
    pub async fn check_access(&self, auth_token: &str, item_id: &str) -> bool {
        let url = format!("{}/me/drive/items/{}", self.base_url, item_id);

        match self.dispatcher.get(&url, &bearer(auth_token)).await {
            Ok(_) => true,
            Err(DispatchError::Rejected(ref status)) if status.status == 404 => false,
            Err(e) => {
                eprintln!("documents: access check for {} failed, denying: {}", item_id, e);
                false
            }
        }
    }
}
