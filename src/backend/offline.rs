use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::backend::{BackendError, RewriteBackend, RewriteStream};

/// Deterministic substitute for the live backend: `[STYLE] input`. Serves as
/// the automatic fallback when the live backend cannot be constructed and as
/// the test double. Its incremental path always concatenates back to exactly
/// the full-path result.
#[derive(Debug, Clone)]
pub struct OfflineBackend {
    char_delay: Duration,
}

impl Default for OfflineBackend {
    fn default() -> Self {
        Self {
            char_delay: Duration::from_millis(1),
        }
    }
}

impl OfflineBackend {
    pub fn paced(char_delay: Duration) -> Self {
        Self { char_delay }
    }
}

#[async_trait]
impl RewriteBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline-substitute"
    }

    async fn rewrite_full(&self, style: &str, input: &str) -> Result<String, BackendError> {
        Ok(render_rewrite(style, input))
    }

    async fn rewrite_stream(
        &self,
        style: &str,
        input: &str,
    ) -> Result<RewriteStream, BackendError> {
        let full = render_rewrite(style, input);
        let delay = self.char_delay;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            for ch in full.chars() {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                if tx.send(Ok(ch.to_string())).await.is_err() {
                    return;
                }
            }
        });

        debug!(backend = self.name(), "stream prepared");
        Ok(ReceiverStream::new(rx).boxed())
    }
}

fn render_rewrite(style: &str, input: &str) -> String {
    format!("[{}] {}", style.to_uppercase(), input)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;

    use super::OfflineBackend;
    use crate::backend::RewriteBackend;

    #[tokio::test]
    async fn full_rewrite_uppercases_style_label() {
        let backend = OfflineBackend::paced(Duration::ZERO);
        let rewritten = backend
            .rewrite_full("casual", "hi")
            .await
            .expect("offline rewrite");
        assert_eq!(rewritten, "[CASUAL] hi");
    }

    #[tokio::test]
    async fn stream_concatenates_to_full_result() {
        let backend = OfflineBackend::paced(Duration::ZERO);
        let full = backend
            .rewrite_full("polite", "Hello team")
            .await
            .expect("full rewrite");

        let mut fragments = backend
            .rewrite_stream("polite", "Hello team")
            .await
            .expect("stream start");
        let mut assembled = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment.expect("offline fragments never fail");
            assert!(!fragment.is_empty());
            assembled.push_str(&fragment);
        }

        assert_eq!(assembled, full);
    }
}
