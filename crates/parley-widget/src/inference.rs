//! Inference service protocol and HTTP client.
//!
//! Replies are validated against a strict schema on receipt. Anything that
//! does not fit is `ParsedReply::Malformed` and is handled exactly like a
//! transport failure.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parley_core::types::{FileMeta, MessageType, QuickAction};

use crate::error::InferenceError;

/// Body posted to the inference endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub message: String,
    pub conversation_id: String,
    pub visitor_id: String,
    pub visitor_profile_id: Option<String>,
    pub file: Option<FileMeta>,
}

/// Raw reply as it appears on the wire.
#[derive(Debug, Deserialize)]
struct WireReply {
    response: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(rename = "leadScore", default)]
    lead_score: Option<f64>,
    #[serde(default)]
    escalated: Option<bool>,
    #[serde(rename = "quickActions", default)]
    quick_actions: Option<Vec<QuickAction>>,
    #[serde(default)]
    powered_by: Option<String>,
    #[serde(default)]
    error_fallback: Option<bool>,
}

/// A validated inference reply.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceReply {
    pub text: String,
    pub message_type: MessageType,
    /// Within `0.0..=1.0` when present.
    pub confidence: Option<f64>,
    pub intent: Option<String>,
    /// Raw backend value; clamped when adopted into lead state.
    pub lead_score: Option<f64>,
    pub escalated: bool,
    /// `None` keeps the active set, `Some` replaces it wholesale.
    pub quick_actions: Option<Vec<QuickAction>>,
    pub powered_by: Option<String>,
    pub error_fallback: bool,
}

impl InferenceReply {
    /// Plain text reply with no metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            message_type: MessageType::Text,
            confidence: None,
            intent: None,
            lead_score: None,
            escalated: false,
            quick_actions: None,
            powered_by: None,
            error_fallback: false,
        }
    }
}

/// Outcome of schema validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    Success(InferenceReply),
    Malformed { reason: String },
}

impl ParsedReply {
    pub fn from_slice(body: &[u8]) -> Self {
        let wire: WireReply = match serde_json::from_slice(body) {
            Ok(wire) => wire,
            Err(e) => {
                return ParsedReply::Malformed {
                    reason: e.to_string(),
                }
            }
        };

        if wire.response.trim().is_empty() {
            return ParsedReply::Malformed {
                reason: "empty `response`".to_string(),
            };
        }
        if let Some(score) = wire.lead_score {
            if !score.is_finite() {
                return ParsedReply::Malformed {
                    reason: "non-finite `leadScore`".to_string(),
                };
            }
        }
        if let Some(actions) = &wire.quick_actions {
            if actions
                .iter()
                .any(|a| a.text.trim().is_empty() || a.value.trim().is_empty())
            {
                return ParsedReply::Malformed {
                    reason: "quick action without text or value".to_string(),
                };
            }
        }

        let message_type = match wire.kind.as_deref() {
            None => MessageType::Text,
            Some(kind) => MessageType::from_wire(kind).unwrap_or_else(|| {
                tracing::debug!(kind, "Unknown reply type, rendering as text");
                MessageType::Text
            }),
        };

        ParsedReply::Success(InferenceReply {
            text: wire.response,
            message_type,
            confidence: wire
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0)),
            intent: wire.intent.filter(|i| !i.is_empty()),
            lead_score: wire.lead_score,
            escalated: wire.escalated.unwrap_or(false),
            quick_actions: wire.quick_actions,
            powered_by: wire.powered_by,
            error_fallback: wire.error_fallback.unwrap_or(false),
        })
    }

    pub fn into_result(self) -> Result<InferenceReply, InferenceError> {
        match self {
            ParsedReply::Success(reply) => Ok(reply),
            ParsedReply::Malformed { reason } => Err(InferenceError::Malformed(reason)),
        }
    }
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError>;
}

/// `reqwest` client posting JSON to the configured endpoint.
pub struct HttpInferenceClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(&self, err: reqwest::Error) -> InferenceError {
        if err.is_timeout() {
            InferenceError::Timeout(self.timeout.as_millis() as u64)
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        ParsedReply::from_slice(&body).into_result()
    }
}
