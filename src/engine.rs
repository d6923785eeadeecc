use std::{env, time::Duration};

use futures_util::{stream::BoxStream, StreamExt};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    cancel::CancelGuard,
    models::{NormalizedRewrite, StreamEvent},
    service::RephraseService,
};

/// How per-style output is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    /// Forward true backend fragments as they arrive.
    Direct,
    /// Compute the full text first, then replay it word by word, each delta
    /// carrying the whole accumulated prefix so far. Stable and replayable
    /// even when the backend only supports full-response generation.
    Staged,
}

/// Inter-word delay for staged replay. A presentation parameter, not a
/// correctness requirement; tests zero it.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub word_delay: Duration,
}

impl Pacing {
    pub fn from_env() -> Self {
        let word_delay_ms = env::var("REWRITE_WORD_DELAY_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(20);
        Self {
            word_delay: Duration::from_millis(word_delay_ms),
        }
    }

    pub fn zero() -> Self {
        Self {
            word_delay: Duration::ZERO,
        }
    }
}

/// Drives one rewrite request: one generation per style, in caller order,
/// multiplexed into a single labeled event stream.
///
/// Styles are processed strictly sequentially. The cancellation flag is
/// checked before each style begins and between emitted units of work; once
/// set, no further style starts, but the terminal `done` event is still
/// produced so consumers always observe a well-formed stream end. The guard
/// lives inside the returned stream, so the registry entry is released
/// whenever the stream finishes or is dropped.
pub fn orchestrate(
    service: RephraseService,
    request: NormalizedRewrite,
    cancel: Option<CancelGuard>,
    mode: EmitMode,
    pacing: Pacing,
) -> BoxStream<'static, StreamEvent> {
    let stream = async_stream::stream! {
        let cancel = cancel;
        let cancelled = |cancel: &Option<CancelGuard>| {
            cancel.as_ref().is_some_and(CancelGuard::is_set)
        };

        yield StreamEvent::Meta {
            request_id: request.request_id.clone(),
        };

        for style in request.styles {
            if cancelled(&cancel) {
                debug!(request_id = %request.request_id, "cancelled before next style");
                break;
            }

            yield StreamEvent::StyleStart {
                style: style.clone(),
            };

            match mode {
                EmitMode::Direct => {
                    match service.stream_style(&style, &request.input_text).await {
                        Ok(mut fragments) => {
                            while let Some(next) = fragments.next().await {
                                if cancelled(&cancel) {
                                    break;
                                }
                                match next {
                                    Ok(delta) => {
                                        yield StreamEvent::Delta {
                                            style: style.clone(),
                                            delta,
                                        };
                                    }
                                    Err(error) => {
                                        warn!(style = %style, error = %error, "stream failed mid-style");
                                        yield StreamEvent::StyleError {
                                            style: style.clone(),
                                            detail: error.to_string(),
                                        };
                                        break;
                                    }
                                }
                            }
                        }
                        Err(error) => {
                            warn!(style = %style, error = %error, "stream could not be started");
                            yield StreamEvent::StyleError {
                                style: style.clone(),
                                detail: error.to_string(),
                            };
                        }
                    }

                    yield StreamEvent::StyleEnd {
                        style,
                        final_text: None,
                    };
                }
                EmitMode::Staged => {
                    let full = match service
                        .backend()
                        .rewrite_full(&style, &request.input_text)
                        .await
                    {
                        Ok(full) => full,
                        Err(error) => {
                            warn!(style = %style, error = %error, "full rewrite failed in staged mode");
                            yield StreamEvent::StyleError {
                                style: style.clone(),
                                detail: error.to_string(),
                            };
                            yield StreamEvent::StyleEnd {
                                style,
                                final_text: None,
                            };
                            continue;
                        }
                    };

                    let mut shown = String::new();
                    for word in full.split_whitespace() {
                        if cancelled(&cancel) {
                            break;
                        }
                        if !pacing.word_delay.is_zero() {
                            sleep(pacing.word_delay).await;
                        }
                        if !shown.is_empty() {
                            shown.push(' ');
                        }
                        shown.push_str(word);
                        yield StreamEvent::Delta {
                            style: style.clone(),
                            delta: shown.clone(),
                        };
                    }

                    yield StreamEvent::StyleEnd {
                        style,
                        final_text: Some(full),
                    };
                }
            }
        }

        yield StreamEvent::Done;
    };

    stream.boxed()
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use futures_util::StreamExt;

    use super::{orchestrate, EmitMode, Pacing};
    use crate::{
        backend::{offline::OfflineBackend, BackendError, RewriteBackend, RewriteStream},
        cancel::CancelRegistry,
        models::{NormalizedRewrite, StreamEvent},
        service::RephraseService,
    };

    /// Offline behavior for all styles except one, which always fails.
    struct PartiallyFailingBackend {
        fail_style: &'static str,
        inner: OfflineBackend,
    }

    impl PartiallyFailingBackend {
        fn new(fail_style: &'static str) -> Self {
            Self {
                fail_style,
                inner: OfflineBackend::paced(Duration::ZERO),
            }
        }
    }

    #[async_trait]
    impl RewriteBackend for PartiallyFailingBackend {
        fn name(&self) -> &str {
            "partially-failing"
        }

        async fn rewrite_full(&self, style: &str, input: &str) -> Result<String, BackendError> {
            if style == self.fail_style {
                return Err(BackendError::Unavailable("boom".to_owned()));
            }
            self.inner.rewrite_full(style, input).await
        }

        async fn rewrite_stream(
            &self,
            style: &str,
            input: &str,
        ) -> Result<RewriteStream, BackendError> {
            if style == self.fail_style {
                return Err(BackendError::Unavailable("boom".to_owned()));
            }
            self.inner.rewrite_stream(style, input).await
        }
    }

    /// Yields one fragment, then fails the way a dropped connection does.
    struct TruncatedStreamBackend;

    #[async_trait]
    impl RewriteBackend for TruncatedStreamBackend {
        fn name(&self) -> &str {
            "truncated-stream"
        }

        async fn rewrite_full(&self, _style: &str, _input: &str) -> Result<String, BackendError> {
            Err(BackendError::Unavailable("connection reset".to_owned()))
        }

        async fn rewrite_stream(
            &self,
            _style: &str,
            _input: &str,
        ) -> Result<RewriteStream, BackendError> {
            let fragments = futures_util::stream::iter(vec![
                Ok("partial ".to_owned()),
                Err(BackendError::Unavailable("connection reset".to_owned())),
            ]);
            Ok(fragments.boxed())
        }
    }

    fn offline_service() -> RephraseService {
        RephraseService::new(Arc::new(OfflineBackend::paced(Duration::ZERO)))
    }

    fn request(styles: &[&str], input: &str) -> NormalizedRewrite {
        NormalizedRewrite {
            request_id: "req-test".to_owned(),
            styles: styles.iter().map(ToString::to_string).collect(),
            input_text: input.to_owned(),
        }
    }

    fn assert_well_formed(events: &[StreamEvent], styles: &[&str]) {
        assert!(matches!(events.first(), Some(StreamEvent::Meta { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        let done_count = events
            .iter()
            .filter(|event| matches!(event, StreamEvent::Done))
            .count();
        assert_eq!(done_count, 1);

        for style in styles {
            let start = events.iter().position(
                |event| matches!(event, StreamEvent::StyleStart { style: s } if s == style),
            );
            let end = events.iter().position(
                |event| matches!(event, StreamEvent::StyleEnd { style: s, .. } if s == style),
            );
            let (start, end) = (
                start.unwrap_or_else(|| panic!("missing style_start for {style}")),
                end.unwrap_or_else(|| panic!("missing style_end for {style}")),
            );
            assert!(start < end);

            for (position, event) in events.iter().enumerate() {
                if let StreamEvent::Delta { style: s, .. } = event {
                    if s == style {
                        assert!(start < position && position < end);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn direct_mode_emits_well_formed_stream() {
        let events = orchestrate(
            offline_service(),
            request(&["professional", "casual"], "Hello team"),
            None,
            EmitMode::Direct,
            Pacing::zero(),
        )
        .collect::<Vec<_>>()
        .await;

        assert_well_formed(&events, &["professional", "casual"]);

        let casual: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Delta { style, delta } if style == "casual" => {
                    Some(delta.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(casual, "[CASUAL] Hello team");
    }

    #[tokio::test]
    async fn staged_mode_replays_cumulative_prefixes() {
        let events = orchestrate(
            offline_service(),
            request(&["polite"], "Hello team"),
            None,
            EmitMode::Staged,
            Pacing::zero(),
        )
        .collect::<Vec<_>>()
        .await;

        assert_well_formed(&events, &["polite"]);

        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Delta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["[POLITE]", "[POLITE] Hello", "[POLITE] Hello team"]);
        for pair in deltas.windows(2) {
            assert!(pair[1].starts_with(pair[0]));
        }

        let final_text = events.iter().find_map(|event| match event {
            StreamEvent::StyleEnd { final_text, .. } => final_text.as_deref(),
            _ => None,
        });
        assert_eq!(final_text, Some("[POLITE] Hello team"));
    }

    #[tokio::test]
    async fn staged_mode_isolates_per_style_failures() {
        let service = RephraseService::new(Arc::new(PartiallyFailingBackend::new("casual")));
        let events = orchestrate(
            service,
            request(&["casual", "polite"], "hi"),
            None,
            EmitMode::Staged,
            Pacing::zero(),
        )
        .collect::<Vec<_>>()
        .await;

        assert_well_formed(&events, &["casual", "polite"]);
        assert!(events.iter().any(
            |event| matches!(event, StreamEvent::StyleError { style, .. } if style == "casual")
        ));
        assert!(events.iter().any(|event| matches!(
            event,
            StreamEvent::StyleEnd { style, final_text: Some(text) }
                if style == "polite" && text == "[POLITE] hi"
        )));
    }

    #[tokio::test]
    async fn direct_mode_isolates_stream_start_failures() {
        let service = RephraseService::new(Arc::new(PartiallyFailingBackend::new("casual")));
        let events = orchestrate(
            service,
            request(&["casual", "polite"], "hi"),
            None,
            EmitMode::Direct,
            Pacing::zero(),
        )
        .collect::<Vec<_>>()
        .await;

        assert_well_formed(&events, &["casual", "polite"]);
        assert!(events.iter().any(
            |event| matches!(event, StreamEvent::StyleError { style, .. } if style == "casual")
        ));
        let polite_deltas: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Delta { style, delta } if style == "polite" => {
                    Some(delta.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(polite_deltas, "[POLITE] hi");
    }

    #[tokio::test]
    async fn direct_mode_keeps_fragments_yielded_before_mid_stream_failure() {
        let service = RephraseService::new(Arc::new(TruncatedStreamBackend));
        let events = orchestrate(
            service,
            request(&["casual"], "hi"),
            None,
            EmitMode::Direct,
            Pacing::zero(),
        )
        .collect::<Vec<_>>()
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Meta {
                    request_id: "req-test".to_owned(),
                },
                StreamEvent::StyleStart {
                    style: "casual".to_owned(),
                },
                StreamEvent::Delta {
                    style: "casual".to_owned(),
                    delta: "partial ".to_owned(),
                },
                StreamEvent::StyleError {
                    style: "casual".to_owned(),
                    detail: "backend unavailable: connection reset".to_owned(),
                },
                StreamEvent::StyleEnd {
                    style: "casual".to_owned(),
                    final_text: None,
                },
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_after_first_style_stops_remaining_styles() {
        let registry = Arc::new(CancelRegistry::default());
        let guard = registry.create("req-test");

        let mut stream = orchestrate(
            offline_service(),
            request(&["professional", "casual"], "Hello team"),
            Some(guard),
            EmitMode::Direct,
            Pacing::zero(),
        );

        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            let first_style_done = matches!(
                &event,
                StreamEvent::StyleEnd { style, .. } if style == "professional"
            );
            seen.push(event);
            if first_style_done {
                registry.signal("req-test");
            }
        }

        assert!(matches!(seen.last(), Some(StreamEvent::Done)));
        assert!(!seen.iter().any(
            |event| matches!(event, StreamEvent::StyleStart { style } if style == "casual")
        ));
        let done_count = seen
            .iter()
            .filter(|event| matches!(event, StreamEvent::Done))
            .count();
        assert_eq!(done_count, 1);
    }

    #[tokio::test]
    async fn registry_entry_is_released_when_stream_completes() {
        let registry = Arc::new(CancelRegistry::default());
        let guard = registry.create("req-test");

        let events = orchestrate(
            offline_service(),
            request(&["casual"], "hi"),
            Some(guard),
            EmitMode::Direct,
            Pacing::zero(),
        )
        .collect::<Vec<_>>()
        .await;

        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        assert!(!registry.contains("req-test"));
    }

    #[tokio::test]
    async fn registry_entry_is_released_when_stream_is_dropped() {
        let registry = Arc::new(CancelRegistry::default());
        let guard = registry.create("req-test");

        let mut stream = orchestrate(
            offline_service(),
            request(&["casual"], "hi"),
            Some(guard),
            EmitMode::Direct,
            Pacing::zero(),
        );

        let first = stream.next().await;
        assert!(matches!(first, Some(StreamEvent::Meta { .. })));
        assert!(registry.contains("req-test"));

        drop(stream);
        assert!(!registry.contains("req-test"));
    }
}
