//! Session initializer.
//!
//! Probes durable storage, opens a visitor profile and conversation when it
//! can, and otherwise synthesizes an ephemeral session. Sub-step failures
//! are logged and skipped. Only a failure of the initializer as a whole
//! (an error or a panic escaping the steps) triggers the minimal `error_`
//! session, so a caller always gets something usable back.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;

use parley_core::config::WidgetConfig;
use parley_core::events::{EventBus, WidgetEvent};
use parley_core::types::{
    ConversationId, ConversationSession, Message, MessageType, QuickAction, SessionEpoch,
    SessionMode, Timestamp, VisitorIdentity,
};
use parley_storage::{DurableBackend, NewConversation};

use crate::content::{error_quick_actions, ERROR_WELCOME};
use crate::error::WidgetError;

static LAST_SYNTHETIC_MS: AtomicI64 = AtomicI64::new(0);

/// Timestamp for a synthetic id, strictly increasing within the process so
/// a reset never reproduces the previous id.
pub(crate) fn next_synthetic_timestamp() -> Timestamp {
    let now = Timestamp::now().0;
    let prev = match LAST_SYNTHETIC_MS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last + 1))
    }) {
        Ok(prev) | Err(prev) => prev,
    };
    Timestamp(now.max(prev + 1))
}

/// Result of the connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// No durable backend configured.
    NotConfigured,
    Connected,
    Disconnected,
}

/// Everything a fresh session starts with.
#[derive(Debug, Clone)]
pub struct InitOutcome {
    pub session: ConversationSession,
    pub welcome: Message,
    pub quick_actions: Vec<QuickAction>,
    pub probe: ProbeStatus,
    /// True when the minimal fallback session was produced.
    pub fatal: bool,
}

pub struct SessionInitializer {
    backend: Option<Arc<dyn DurableBackend>>,
    widget: WidgetConfig,
    events: EventBus,
}

impl SessionInitializer {
    pub fn new(
        backend: Option<Arc<dyn DurableBackend>>,
        widget: WidgetConfig,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            widget,
            events,
        }
    }

    /// Run the full initialization. Never fails.
    pub async fn run(&self, visitor: &VisitorIdentity, epoch: SessionEpoch) -> InitOutcome {
        let attempt = AssertUnwindSafe(self.try_run(visitor, epoch))
            .catch_unwind()
            .await;

        match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(error = %e, epoch = %epoch, "Session initialization failed, using minimal session");
                Self::fatal_outcome(epoch)
            }
            Err(_) => {
                tracing::error!(epoch = %epoch, "Session initialization panicked, using minimal session");
                Self::fatal_outcome(epoch)
            }
        }
    }

    async fn try_run(
        &self,
        visitor: &VisitorIdentity,
        epoch: SessionEpoch,
    ) -> Result<InitOutcome, WidgetError> {
        let probe = self.probe().await;

        let mut visitor_profile_id = None;
        let mut conversation_id = None;

        if let (ProbeStatus::Connected, Some(backend)) = (probe, &self.backend) {
            match backend.upsert_visitor_profile(&visitor.visitor_id).await {
                Ok(id) => visitor_profile_id = Some(id),
                Err(e) => {
                    tracing::warn!(error = %e, visitor_id = %visitor.visitor_id, "Visitor profile upsert failed")
                }
            }

            let new_conversation = NewConversation {
                visitor_id: visitor.visitor_id.clone(),
                visitor_profile_id: visitor_profile_id.clone(),
                page: self.widget.page.clone(),
            };
            match backend.insert_conversation(&new_conversation).await {
                Ok(id) if !id.trim().is_empty() => {
                    conversation_id = Some(ConversationId::persisted(id));
                }
                Ok(_) => tracing::warn!("Backend returned an empty conversation id"),
                Err(e) => tracing::warn!(error = %e, "Conversation insert failed"),
            }
        }

        let conversation_id = conversation_id
            .unwrap_or_else(|| ConversationId::offline(next_synthetic_timestamp()));
        let mode = if conversation_id.is_synthetic() {
            SessionMode::Ephemeral
        } else {
            SessionMode::Persisted
        };

        let welcome = self.welcome_message()?;
        let quick_actions = self.initial_quick_actions()?;

        let session = ConversationSession {
            conversation_id,
            mode,
            visitor_profile_id,
            connected: probe == ProbeStatus::Connected,
            epoch,
        };

        self.events.publish(WidgetEvent::SessionOpened {
            conversation_id: session.conversation_id.clone(),
            visitor_id: visitor.visitor_id.clone(),
            epoch,
            timestamp: Timestamp::now(),
        });
        tracing::info!(
            conversation_id = %session.conversation_id,
            mode = ?session.mode,
            probe = ?probe,
            epoch = %epoch,
            "Session opened"
        );

        Ok(InitOutcome {
            session,
            welcome,
            quick_actions,
            probe,
            fatal: false,
        })
    }

    async fn probe(&self) -> ProbeStatus {
        let Some(backend) = &self.backend else {
            return ProbeStatus::NotConfigured;
        };
        match backend.probe().await {
            Ok(()) => ProbeStatus::Connected,
            Err(e) => {
                tracing::info!(error = %e, "Durable storage unreachable, continuing offline");
                ProbeStatus::Disconnected
            }
        }
    }

    fn welcome_message(&self) -> Result<Message, WidgetError> {
        let text = self.widget.welcome_message.trim();
        if text.is_empty() {
            return Err(WidgetError::InvalidContent("empty welcome message".into()));
        }
        Ok(Message::bot(text, MessageType::Text))
    }

    fn initial_quick_actions(&self) -> Result<Vec<QuickAction>, WidgetError> {
        if self.widget.quick_actions.is_empty() {
            return Err(WidgetError::InvalidContent("no quick actions configured".into()));
        }
        Ok(self.widget.quick_actions.clone())
    }

    fn fatal_outcome(epoch: SessionEpoch) -> InitOutcome {
        InitOutcome {
            session: ConversationSession {
                conversation_id: ConversationId::error(next_synthetic_timestamp()),
                mode: SessionMode::Ephemeral,
                visitor_profile_id: None,
                connected: false,
                epoch,
            },
            welcome: Message::bot(ERROR_WELCOME, MessageType::Text),
            quick_actions: error_quick_actions(),
            probe: ProbeStatus::Disconnected,
            fatal: true,
        }
    }
}
