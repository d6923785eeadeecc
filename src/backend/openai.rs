use std::{env, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    backend::{BackendError, RewriteBackend, RewriteStream},
    limits::CallGate,
    styles,
};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Live chat-completions backend. One network call per invocation, gated by
/// the process-wide [`CallGate`]; the full path retries with exponential
/// backoff, the streaming path does not retry once fragments have flowed.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    full_timeout: Duration,
    gate: Arc<CallGate>,
}

impl OpenAiBackend {
    /// Returns `Ok(None)` when no credential is configured, letting the
    /// caller fall back to the offline substitute.
    pub fn from_env() -> Result<Option<Self>, String> {
        let Some(api_key) = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|value| !value.is_empty())
        else {
            return Ok(None);
        };
        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_owned());
        let temperature = env::var("OPENAI_TEMPERATURE")
            .ok()
            .and_then(|value| value.parse::<f32>().ok())
            .unwrap_or(0.7);
        let timeout_secs = env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60);

        // The streaming call runs without a fixed deadline; its duration
        // tracks generation length, so only the connect phase is bounded.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| format!("failed to build HTTP client: {error}"))?;

        Ok(Some(Self {
            client,
            api_key,
            base_url,
            model,
            temperature,
            full_timeout: Duration::from_secs(timeout_secs),
            gate: Arc::new(CallGate::from_env()),
        }))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn payload(&self, style: &str, input: &str, stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": styles::resolve(style)},
                {"role": "user", "content": input}
            ],
            "temperature": self.temperature,
            "stream": stream
        })
    }

    async fn try_full(&self, style: &str, input: &str) -> Result<String, BackendError> {
        self.gate.acquire().await;

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .timeout(self.full_timeout)
            .json(&self.payload(style, input, false))
            .send()
            .await
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(map_http_error(
                response.status(),
                response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown backend error".to_owned()),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| BackendError::InvalidResponse(error.to_string()))?;

        let choice = parsed.choices.first().ok_or_else(|| {
            BackendError::InvalidResponse("missing choices in response".to_owned())
        })?;

        Ok(choice
            .message
            .content
            .clone()
            .unwrap_or_default()
            .trim()
            .to_owned())
    }
}

#[async_trait]
impl RewriteBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn rewrite_full(&self, style: &str, input: &str) -> Result<String, BackendError> {
        let mut attempt = 0;
        loop {
            match self.try_full(style, input).await {
                Ok(text) => return Ok(text),
                Err(BackendError::Unavailable(reason)) if attempt + 1 < MAX_ATTEMPTS => {
                    let delay = BACKOFF_BASE * 2u32.pow(attempt);
                    warn!(
                        backend = self.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "full rewrite attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn rewrite_stream(
        &self,
        style: &str,
        input: &str,
    ) -> Result<RewriteStream, BackendError> {
        self.gate.acquire().await;

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&self.payload(style, input, true))
            .send()
            .await
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(map_http_error(
                response.status(),
                response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown backend error".to_owned()),
            ));
        }

        let mut upstream = response.bytes_stream();
        // Raw bytes, split at newlines only: a multi-byte character may
        // straddle two transport chunks, so decoding happens per line.
        let mut buffer: Vec<u8> = Vec::new();

        let stream = async_stream::stream! {
            'transport: while let Some(next) = upstream.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        yield Err(BackendError::Unavailable(error.to_string()));
                        break;
                    }
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line) = take_line(&mut buffer) {
                    match parse_stream_line(&line) {
                        // Sentinel ends the sequence before any
                        // connection-close signal is observed.
                        Some(StreamLine::Done) => break 'transport,
                        Some(StreamLine::Fragment(fragment)) => yield Ok(fragment),
                        None => continue,
                    }
                }
            }
        };

        debug!(backend = self.name(), "stream prepared");
        Ok(stream.boxed())
    }
}

enum StreamLine {
    Fragment(String),
    Done,
}

/// Drains one newline-terminated line from the buffer, or `None` when no
/// complete line has arrived yet.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let index = buffer.iter().position(|byte| *byte == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=index).collect();
    Some(String::from_utf8_lossy(&line).trim().to_owned())
}

/// Parses one line of the event-delimited response. Malformed or empty lines
/// return `None` and are skipped rather than aborting the sequence.
fn parse_stream_line(line: &str) -> Option<StreamLine> {
    let payload = line.strip_prefix("data:")?.trim();

    if payload == "[DONE]" {
        return Some(StreamLine::Done);
    }

    let parsed: StreamResponse = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(error) => {
            debug!(error = %error, "skipping malformed stream event");
            return None;
        }
    };

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|fragment| !fragment.is_empty())
        .map(StreamLine::Fragment)
}

fn map_http_error(status: StatusCode, body: String) -> BackendError {
    let trimmed = body.chars().take(400).collect::<String>();
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Unavailable(format!("rate limited: {trimmed}"))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::Unavailable(format!("upstream timeout: {trimmed}"))
        }
        status if status.is_server_error() => {
            BackendError::Unavailable(format!("status {}: {trimmed}", status.as_u16()))
        }
        _ => BackendError::InvalidResponse(format!("status {}: {trimmed}", status.as_u16())),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
