use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::backend::{BackendError, RewriteBackend, RewriteStream};

/// Thin façade over the backend used by both the full-response and the
/// streaming code paths.
#[derive(Clone)]
pub struct RephraseService {
    backend: Arc<dyn RewriteBackend>,
}

impl RephraseService {
    pub fn new(backend: Arc<dyn RewriteBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn RewriteBackend> {
        &self.backend
    }

    /// Rewrites the text once per style, sequentially, and fails fast: any
    /// single backend error aborts the whole aggregate with no partial
    /// results. Duplicate styles collapse into one map entry.
    pub async fn rephrase_all_full(
        &self,
        styles: &[String],
        text: &str,
    ) -> Result<HashMap<String, String>, BackendError> {
        let mut results = HashMap::with_capacity(styles.len());
        for style in styles {
            if results.contains_key(style) {
                continue;
            }
            let rewritten = self.backend.rewrite_full(style, text).await?;
            debug!(style = %style, chars = rewritten.chars().count(), "style rewritten");
            results.insert(style.clone(), rewritten);
        }
        Ok(results)
    }

    /// Incremental rewrite for exactly one style, passed straight through to
    /// the backend.
    pub async fn stream_style(
        &self,
        style: &str,
        text: &str,
    ) -> Result<RewriteStream, BackendError> {
        self.backend.rewrite_stream(style, text).await
    }
}
