//! Iterative similarity retrieval with access filtering.
//!
//! The retrieval loop polls the vector index for candidates similar to the
//! query, filters out matches already seen in earlier iterations, and — for
//! each fresh match concurrently — checks the user's access, fetches the
//! matched chunk, and resolves the source link. It keeps polling until it has
//! gathered `min_documents` accessible chunks or spent `max_tries`
//! iterations.
//!
//! `min_documents` is a soft target: when the tries run out, whatever was
//! accumulated is returned without error. Each iteration widens its poll by
//! the number of ids already seen, so repeated polls keep surfacing new
//! candidates instead of the same leaders.
//!
//! Within one iteration the per-match work fans out as independent tasks and
//! joins before the next poll; completion order between matches is not
//! meaningful, only their union is.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;

use crate::config::{Config, RetrievalConfig};
use crate::dispatch::RateLimitedDispatcher;
use crate::documents::DocumentGateway;
use crate::embedding::EmbeddingClient;
use crate::index::VectorIndexClient;
use crate::models::{Link, Retrieval, VectorMatch};

pub struct Retriever {
    index: VectorIndexClient,
    documents: Arc<DocumentGateway>,
    embedding: EmbeddingClient,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        index: VectorIndexClient,
        documents: Arc<DocumentGateway>,
        embedding: EmbeddingClient,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            documents,
            embedding,
            config,
        }
    }

    /// Wire up a retriever from configuration, sharing `dispatcher` across
    /// the index, document, and embedding clients.
    pub fn from_config(config: &Config, dispatcher: Arc<RateLimitedDispatcher>) -> Self {
        let index = VectorIndexClient::new(Arc::clone(&dispatcher), &config.index);
        let documents = Arc::new(DocumentGateway::new(
            Arc::clone(&dispatcher),
            &config.documents,
            &config.chunking,
        ));
        let embedding = EmbeddingClient::new(dispatcher, &config.embedding);
        Self::new(index, documents, embedding, config.retrieval.clone())
    }

    /// Gather chunks similar to `query_text` that the user can read.
    ///
    /// `min_documents` overrides the configured soft target when given.
    /// Access-denied and missing documents are skipped, never errors; index
    /// and link-resolution failures propagate to the caller.
    pub async fn retrieve(
        &self,
        auth_token: &str,
        query_text: &str,
        min_documents: Option<usize>,
    ) -> Result<Retrieval> {
        let min_documents = min_documents.unwrap_or(self.config.min_documents);
        let vector = self.embedding.embed_query(query_text).await?;

        let mut previously_queried: HashSet<String> = HashSet::new();
        let mut accumulated_text = String::new();
        let mut collected_links: Vec<Link> = Vec::new();
        let mut accumulated = 0usize;
        let mut tries = 0u32;

        while accumulated < min_documents && tries < self.config.max_tries {
            // Widen the poll to compensate for ids we have already seen.
            let top_k = self.config.poll_size + previously_queried.len();
            let matches = self.index.query(&vector, top_k, false, true, None).await?;

            let ids: Vec<String> = matches.iter().map(|m| m.id.clone()).collect();
            let fresh: Vec<VectorMatch> = matches
                .into_iter()
                .filter(|m| !previously_queried.contains(&m.id))
                .collect();

            let mut workers = JoinSet::new();
            for matched in fresh {
                let documents = Arc::clone(&self.documents);
                let token = auth_token.to_string();
                workers.spawn(fetch_accessible_chunk(documents, token, matched));
            }

            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(Ok(Some((chunk, link)))) => {
                        accumulated_text.push_str(&chunk);
                        accumulated_text.push_str(&self.config.separator);
                        collected_links.push(link);
                        accumulated += 1;
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => return Err(e.into()),
                    Err(e) => eprintln!("retrieval: worker task failed: {}", e),
                }
            }

            previously_queried.extend(ids);
            tries += 1;
        }

        Ok(Retrieval {
            links: dedup_links(collected_links),
            text: accumulated_text,
        })
    }
}

/// Per-match work: access check, chunk fetch, link resolution.
///
/// `None` means "skip this match" — the user lacks access or the document is
/// gone. A link that fails to resolve after the chunk was readable is a real
/// error.
async fn fetch_accessible_chunk(
    documents: Arc<DocumentGateway>,
    auth_token: String,
    matched: VectorMatch,
) -> Result<Option<(String, Link)>, crate::error::LinkResolutionError> {
    let meta = &matched.metadata;

    if !documents.check_access(&auth_token, &meta.item_id).await {
        return Ok(None);
    }

    let chunk = match documents
        .fetch_chunk(&auth_token, &meta.drive_id, &meta.item_id, meta.chunk_index)
        .await
    {
        Some(chunk) => chunk,
        None => return Ok(None),
    };

    let link = documents
        .fetch_document_link(&auth_token, &meta.drive_id, &meta.item_id)
        .await?;

    Ok(Some((chunk, link)))
}

/// Keep the first occurrence of each `href`, preserving order.
pub fn dedup_links(links: Vec<Link>) -> Vec<Link> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| seen.insert(link.href.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(name: &str, href: &str) -> Link {
        Link {
            name: name.to_string(),
            href: href.to_string(),
        }
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let links = vec![
            link("A", "https://example.com/a"),
            link("B", "https://example.com/b"),
            link("A again", "https://example.com/a"),
        ];
        let deduped = dedup_links(links);
        assert_eq!(
            deduped,
            vec![
                link("A", "https://example.com/a"),
                link("B", "https://example.com/b"),
            ]
        );
    }

    #[test]
    fn test_dedup_empty() {
        assert!(dedup_links(Vec::new()).is_empty());
    }

    #[test]
    fn test_dedup_same_name_different_href_kept() {
        let links = vec![
            link("Doc", "https://example.com/1"),
            link("Doc", "https://example.com/2"),
        ];
        assert_eq!(dedup_links(links).len(), 2);
    }
}
