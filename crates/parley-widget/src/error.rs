//! Error types for the widget engine.
//!
//! None of these ever reach the transcript. `WidgetError` is returned to the
//! embedding view layer from controller commands; `InferenceError` always
//! resolves into the fixed fallback reply.

use parley_core::error::ParleyError;
use parley_core::types::SessionEpoch;

/// Errors from controller commands.
#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    #[error("session is not ready")]
    NotReady,
    #[error("a message is already awaiting a reply")]
    SendInFlight,
    #[error("reply for epoch {reply} does not match current epoch {current}")]
    StaleEpoch {
        reply: SessionEpoch,
        current: SessionEpoch,
    },
    #[error("widget content is invalid: {0}")]
    InvalidContent(String),
    #[error("navigation rejected: {0}")]
    Navigation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ParleyError> for WidgetError {
    fn from(err: ParleyError) -> Self {
        WidgetError::Storage(err.to_string())
    }
}

/// Failures of a single inference round-trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("no inference endpoint configured")]
    NotConfigured,
    #[error("inference service returned status {0}")]
    Status(u16),
    #[error("inference transport failed: {0}")]
    Transport(String),
    #[error("inference request timed out after {0} ms")]
    Timeout(u64),
    #[error("malformed inference reply: {0}")]
    Malformed(String),
    #[error("inference request was cancelled")]
    Cancelled,
}

/// Timeouts are classified by the client, which knows its configured budget.
impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            InferenceError::Status(status.as_u16())
        } else {
            InferenceError::Transport(err.to_string())
        }
    }
}
