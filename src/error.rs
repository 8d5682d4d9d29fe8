//! Typed errors for the dispatch, index, and document layers.
//!
//! Most application code propagates `anyhow::Error`, but the failures named
//! here are part of component contracts — callers match on them to decide
//! between retry, skip, and abort — so they get concrete types.

use thiserror::Error;

/// Non-success HTTP status observed on a dispatched attempt.
#[derive(Error, Debug)]
#[error("upstream returned HTTP {status}: {body}")]
pub struct HttpStatusError {
    pub status: u16,
    pub body: String,
}

/// Failure of a call issued through the rate-limited dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The request body cannot be re-issued, so retry is impossible.
    #[error("request is not replayable for retry")]
    NotReplayable,

    /// The upstream rejected the request with a non-retryable client error
    /// (4xx other than 429). Reported without spending the retry budget.
    #[error("upstream rejected request: {0}")]
    Rejected(HttpStatusError),

    /// Every attempt failed; carries the total attempt count and the last
    /// underlying error.
    #[error("request failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Failure of a vector index query.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The index endpoint could not be reached through the dispatcher.
    #[error("vector index unavailable: {0}")]
    Unavailable(#[from] DispatchError),

    /// The index replied, but the payload does not have the expected shape
    /// (e.g. no `matches` field). Not retryable.
    #[error("malformed index response: {0}")]
    MalformedResponse(String),
}

/// Failure to resolve a document's display name and canonical URL.
///
/// Distinct from the `None` convention used for document content: a missing
/// link after a successful content fetch is a genuine error, not a skip.
#[derive(Error, Debug)]
#[error("could not resolve link for item {item_id}: {reason}")]
pub struct LinkResolutionError {
    pub item_id: String,
    pub reason: String,
}
