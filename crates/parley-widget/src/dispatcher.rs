//! Message dispatcher.
//!
//! A send is split in two so the caller never holds store state across the
//! network round-trip:
//!
//! 1. [`MessageDispatcher::prepare`] applies the optimistic update and
//!    returns a [`PendingTurn`] tagged with the current session epoch.
//! 2. [`PendingTurn::send`] performs the inference call (bounded by the
//!    configured timeout) and yields a [`TurnReply`].
//! 3. [`MessageDispatcher::apply`] folds the reply back into the store,
//!    refusing replies from an earlier epoch.
//!
//! Every failure of step 2 resolves into the fixed fallback reply.

use std::sync::Arc;
use std::time::Duration;

use parley_core::config::ContactConfig;
use parley_core::events::{EventBus, WidgetEvent};
use parley_core::types::{
    ConversationSession, FileMeta, Message, MessageType, SessionEpoch, Timestamp,
    VisitorIdentity,
};

use crate::content::{fallback_message, recovery_quick_actions, HANDOFF_ANNOUNCEMENT};
use crate::error::{InferenceError, WidgetError};
use crate::inference::{InferenceClient, InferenceReply, InferenceRequest};
use crate::persistence::PersistenceQueue;
use crate::store::ConversationStore;

/// An inference request waiting to be sent.
pub struct PendingTurn {
    pub epoch: SessionEpoch,
    pub request: InferenceRequest,
    client: Option<Arc<dyn InferenceClient>>,
    timeout: Duration,
}

impl PendingTurn {
    /// Perform the round-trip. Never fails: errors are carried in the reply.
    pub async fn send(self) -> TurnReply {
        let outcome = match &self.client {
            None => Err(InferenceError::NotConfigured),
            Some(client) => {
                match tokio::time::timeout(self.timeout, client.infer(&self.request)).await {
                    Ok(result) => result,
                    Err(_) => Err(InferenceError::Timeout(self.timeout.as_millis() as u64)),
                }
            }
        };
        TurnReply {
            epoch: self.epoch,
            outcome,
        }
    }
}

/// Result of one inference round-trip, tagged with the epoch it was sent in.
#[derive(Debug)]
pub struct TurnReply {
    pub epoch: SessionEpoch,
    pub outcome: Result<InferenceReply, InferenceError>,
}

/// How a reply was folded into the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Replied {
        /// True when this reply latched escalation.
        escalated_now: bool,
    },
    Fallback {
        error: InferenceError,
    },
}

pub struct MessageDispatcher {
    client: Option<Arc<dyn InferenceClient>>,
    timeout: Duration,
    persistence: Option<Arc<PersistenceQueue>>,
    contact: ContactConfig,
    events: EventBus,
}

impl MessageDispatcher {
    pub fn new(
        client: Option<Arc<dyn InferenceClient>>,
        timeout: Duration,
        persistence: Option<Arc<PersistenceQueue>>,
        contact: ContactConfig,
        events: EventBus,
    ) -> Self {
        Self {
            client,
            timeout,
            persistence,
            contact,
            events,
        }
    }

    /// Optimistically record a user message and build its inference request.
    ///
    /// Returns `Ok(None)` for an empty send (no text, no attachment).
    pub fn prepare(
        &self,
        store: &mut ConversationStore,
        visitor: &VisitorIdentity,
        text: &str,
        file: Option<FileMeta>,
    ) -> Result<Option<PendingTurn>, WidgetError> {
        let text = text.trim();
        if text.is_empty() && file.is_none() {
            return Ok(None);
        }
        let session = store.session().cloned().ok_or(WidgetError::NotReady)?;
        if store.is_composing() {
            return Err(WidgetError::SendInFlight);
        }

        let shown = match (&file, text.is_empty()) {
            (Some(meta), true) => meta.name.clone(),
            _ => text.to_string(),
        };

        let message = Message::user(shown.clone(), file.clone());
        store.append(message.clone());
        store.clear_draft();
        store.clear_quick_actions();
        store.set_composing(true);
        self.persist(&session, &message);

        tracing::debug!(
            conversation_id = %session.conversation_id,
            epoch = %session.epoch,
            has_file = file.is_some(),
            "Dispatching message"
        );

        Ok(Some(PendingTurn {
            epoch: session.epoch,
            request: InferenceRequest {
                message: shown,
                conversation_id: session.conversation_id.to_string(),
                visitor_id: visitor.visitor_id.clone(),
                visitor_profile_id: session.visitor_profile_id.clone(),
                file,
            },
            client: self.client.clone(),
            timeout: self.timeout,
        }))
    }

    /// Fold a reply into the store.
    pub fn apply(
        &self,
        store: &mut ConversationStore,
        reply: TurnReply,
    ) -> Result<TurnOutcome, WidgetError> {
        let session = store.session().cloned().ok_or(WidgetError::NotReady)?;
        if reply.epoch != session.epoch {
            tracing::debug!(
                reply_epoch = %reply.epoch,
                current_epoch = %session.epoch,
                "Discarding reply from a previous session"
            );
            return Err(WidgetError::StaleEpoch {
                reply: reply.epoch,
                current: session.epoch,
            });
        }

        store.set_composing(false);
        match reply.outcome {
            Ok(inference) => Ok(self.apply_success(store, &session, inference)),
            Err(error) => {
                self.apply_fallback(store, &session, &error);
                Ok(TurnOutcome::Fallback { error })
            }
        }
    }

    fn apply_success(
        &self,
        store: &mut ConversationStore,
        session: &ConversationSession,
        reply: InferenceReply,
    ) -> TurnOutcome {
        let message = Message::bot(reply.text, reply.message_type)
            .with_confidence(reply.confidence)
            .with_intent(reply.intent.clone());
        store.append(message.clone());
        self.persist(session, &message);

        if let Some(score) = reply.lead_score {
            store.apply_lead_score(score);
        }

        let mut escalated_now = false;
        if reply.escalated && store.escalate() {
            escalated_now = true;
            let announcement = Message::system(HANDOFF_ANNOUNCEMENT);
            store.append(announcement.clone());
            self.persist(session, &announcement);

            tracing::info!(
                conversation_id = %session.conversation_id,
                lead_score = store.lead().score,
                "Conversation escalated to a human"
            );
            self.events.publish(WidgetEvent::ConversationEscalated {
                conversation_id: session.conversation_id.clone(),
                lead_score: store.lead().score,
                timestamp: Timestamp::now(),
            });
        }

        if let Some(actions) = reply.quick_actions {
            store.replace_quick_actions(actions);
        }

        if reply.error_fallback {
            tracing::warn!(
                conversation_id = %session.conversation_id,
                powered_by = reply.powered_by.as_deref().unwrap_or("unknown"),
                "Inference service answered with its own fallback"
            );
        }

        let lead = store.lead();
        self.events.publish(WidgetEvent::MessageReceived {
            conversation_id: session.conversation_id.clone(),
            intent: reply.intent,
            confidence: reply.confidence,
            lead_score: lead.score,
            escalated: lead.escalated,
            powered_by: reply.powered_by,
            error_fallback: reply.error_fallback,
            timestamp: Timestamp::now(),
        });

        TurnOutcome::Replied { escalated_now }
    }

    fn apply_fallback(
        &self,
        store: &mut ConversationStore,
        session: &ConversationSession,
        error: &InferenceError,
    ) {
        tracing::warn!(
            error = %error,
            conversation_id = %session.conversation_id,
            "Inference failed, showing fallback reply"
        );
        store.append(Message::bot(fallback_message(&self.contact), MessageType::Error));
        store.replace_quick_actions(recovery_quick_actions());

        self.events.publish(WidgetEvent::InferenceFailed {
            conversation_id: session.conversation_id.clone(),
            reason: error.to_string(),
            timestamp: Timestamp::now(),
        });
    }

    fn persist(&self, session: &ConversationSession, message: &Message) {
        if !session.is_persisted() {
            return;
        }
        if let Some(queue) = &self.persistence {
            queue.enqueue(&session.conversation_id, message);
        }
    }
}
