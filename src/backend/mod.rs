pub mod offline;
pub mod openai;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Lazy, finite sequence of text fragments. In-order concatenation of the
/// fragments reconstructs the full rewrite; fragments already yielded remain
/// valid even if the sequence later fails.
pub type RewriteStream = BoxStream<'static, Result<String, BackendError>>;

#[async_trait]
pub trait RewriteBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the complete rewritten text for one (style, input) pair.
    async fn rewrite_full(&self, style: &str, input: &str) -> Result<String, BackendError>;

    /// Produces the rewrite incrementally. The sequence may fail mid-way with
    /// `Unavailable`; consumers must not retry a partially consumed stream.
    async fn rewrite_stream(&self, style: &str, input: &str)
        -> Result<RewriteStream, BackendError>;
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport failure, or the remote call could not be completed after
    /// retries. Retryable from the caller's point of view.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend was reached but rejected the request or returned a
    /// malformed payload. Not retried.
    #[error("backend invalid response: {0}")]
    InvalidResponse(String),
}
