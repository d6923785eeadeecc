use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::styles::DEFAULT_STYLES;

pub const MAX_INPUT_CHARS: usize = 8_000;

#[derive(Debug, Clone, Deserialize)]
pub struct RewriteRequest {
    pub input_text: String,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Request shape after validation: text bounds enforced, style list never
/// empty, request id always present.
#[derive(Debug, Clone)]
pub struct NormalizedRewrite {
    pub request_id: String,
    pub styles: Vec<String>,
    pub input_text: String,
}

impl RewriteRequest {
    pub fn into_normalized(self) -> Result<NormalizedRewrite, String> {
        if self.input_text.trim().is_empty() {
            return Err("input_text must not be empty".to_owned());
        }
        if self.input_text.chars().count() > MAX_INPUT_CHARS {
            return Err(format!(
                "input_text must not exceed {MAX_INPUT_CHARS} characters"
            ));
        }

        let styles = if self.styles.is_empty() {
            DEFAULT_STYLES.map(ToOwned::to_owned).to_vec()
        } else {
            self.styles
        };

        let request_id = self
            .request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(NormalizedRewrite {
            request_id,
            styles,
            input_text: self.input_text,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RewriteResponse {
    pub request_id: String,
    pub results: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub request_id: String,
    pub cancelled: bool,
}

/// One record in the outbound stream. `Meta` always comes first, `Done` is
/// always last and emitted exactly once; for a given style every `Delta`
/// precedes its `StyleEnd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Meta { request_id: String },
    StyleStart { style: String },
    Delta { style: String, delta: String },
    StyleEnd { style: String, final_text: Option<String> },
    StyleError { style: String, detail: String },
    Done,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Meta { .. } => "meta",
            Self::StyleStart { .. } => "style_start",
            Self::Delta { .. } => "delta",
            Self::StyleEnd { .. } => "style_end",
            Self::StyleError { .. } => "error",
            Self::Done => "done",
        }
    }

    /// Serialized SSE data payload. `Done` carries the literal sentinel so
    /// clients can terminate on it without parsing JSON.
    pub fn payload(&self) -> String {
        match self {
            Self::Meta { request_id } => json!({ "request_id": request_id }).to_string(),
            Self::StyleStart { style } => json!({ "style": style }).to_string(),
            Self::Delta { style, delta } => {
                json!({ "style": style, "delta": delta }).to_string()
            }
            Self::StyleEnd { style, final_text } => {
                json!({ "style": style, "final": final_text }).to_string()
            }
            Self::StyleError { style, detail } => {
                json!({ "style": style, "detail": detail }).to_string()
            }
            Self::Done => "[DONE]".to_owned(),
        }
    }
}
