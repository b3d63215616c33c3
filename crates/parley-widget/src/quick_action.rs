//! Quick action engine.
//!
//! Maps a selected [`QuickAction`] to what the controller should do with it.
//! Navigation goes through the [`Navigator`] seam so the embedding shell
//! decides how a `tel:` or `mailto:` URI is actually opened.

use async_trait::async_trait;

use parley_core::config::ContactConfig;
use parley_core::types::{ConversationSession, QuickAction};

use crate::content::{ACTION_CALL, ACTION_EMAIL, ACTION_HUMAN, ACTION_RETRY, HUMAN_REQUEST_PHRASE};
use crate::dispatcher::TurnOutcome;
use crate::error::WidgetError;

/// What a quick action resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickActionCommand {
    /// Re-run initialization under a new epoch.
    Reset,
    /// Open an external URI. No conversational side effect.
    Navigate(String),
    /// Send text through the dispatcher as if typed.
    Send(String),
}

impl QuickActionCommand {
    pub fn resolve(action: &QuickAction, contact: &ContactConfig) -> Self {
        match action.value.as_str() {
            ACTION_RETRY => QuickActionCommand::Reset,
            ACTION_CALL => QuickActionCommand::Navigate(tel_uri(&contact.phone)),
            ACTION_EMAIL => QuickActionCommand::Navigate(format!("mailto:{}", contact.email.trim())),
            ACTION_HUMAN => QuickActionCommand::Send(HUMAN_REQUEST_PHRASE.to_string()),
            _ => QuickActionCommand::Send(action.text.clone()),
        }
    }
}

/// `tel:` URI keeping only the leading `+` and digits.
fn tel_uri(phone: &str) -> String {
    let number: String = phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    format!("tel:{}", number)
}

/// Result of selecting a quick action.
#[derive(Debug, Clone, PartialEq)]
pub enum QuickActionOutcome {
    /// The session was reset.
    Reset(ConversationSession),
    Navigated(String),
    /// Sent through the dispatcher; `None` when the reply was discarded.
    Sent(Option<TurnOutcome>),
}

/// Opens external URIs on behalf of the widget.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn open(&self, uri: &str) -> Result<(), WidgetError>;
}

/// Navigator that validates the scheme and records the request in the log.
///
/// Only `tel:` and `mailto:` are accepted, each with a non-empty target.
pub struct LoggingNavigator;

#[async_trait]
impl Navigator for LoggingNavigator {
    async fn open(&self, uri: &str) -> Result<(), WidgetError> {
        let target = uri
            .strip_prefix("tel:")
            .or_else(|| uri.strip_prefix("mailto:"))
            .ok_or_else(|| {
                WidgetError::Navigation(format!(
                    "Unsupported URI scheme. Only tel: and mailto: are allowed, got: {}",
                    uri
                ))
            })?;

        if target.is_empty() {
            return Err(WidgetError::Navigation(format!("URI has no target: {}", uri)));
        }

        tracing::info!(uri = %uri, "Opened contact URI");
        Ok(())
    }
}
