use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ConversationId, SessionEpoch, Timestamp};

/// Observability events emitted by the widget engine.
///
/// Events are fire-and-forget: they are consumed by external analytics and
/// by the application's event logger, and no response is ever expected.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum WidgetEvent {
    /// A session finished initializing.
    SessionOpened {
        conversation_id: ConversationId,
        visitor_id: String,
        epoch: SessionEpoch,
        timestamp: Timestamp,
    },

    /// A bot reply from the inference service was applied.
    MessageReceived {
        conversation_id: ConversationId,
        intent: Option<String>,
        confidence: Option<f64>,
        lead_score: u8,
        escalated: bool,
        powered_by: Option<String>,
        error_fallback: bool,
        timestamp: Timestamp,
    },

    /// The conversation was handed off to a human.
    ConversationEscalated {
        conversation_id: ConversationId,
        lead_score: u8,
        timestamp: Timestamp,
    },

    /// The inference request failed and the fallback reply was shown.
    InferenceFailed {
        conversation_id: ConversationId,
        reason: String,
        timestamp: Timestamp,
    },
}

impl WidgetEvent {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            WidgetEvent::SessionOpened { timestamp, .. }
            | WidgetEvent::MessageReceived { timestamp, .. }
            | WidgetEvent::ConversationEscalated { timestamp, .. }
            | WidgetEvent::InferenceFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a stable event name for logging and analytics.
    pub fn event_name(&self) -> &'static str {
        match self {
            WidgetEvent::SessionOpened { .. } => "session_opened",
            WidgetEvent::MessageReceived { .. } => "message_received",
            WidgetEvent::ConversationEscalated { .. } => "conversation_escalated",
            WidgetEvent::InferenceFailed { .. } => "inference_failed",
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            WidgetEvent::SessionOpened {
                conversation_id, ..
            }
            | WidgetEvent::MessageReceived {
                conversation_id, ..
            }
            | WidgetEvent::ConversationEscalated {
                conversation_id, ..
            }
            | WidgetEvent::InferenceFailed {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Broadcast bus for [`WidgetEvent`]s.
///
/// Publishing never fails: with no subscribers the event is dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<WidgetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: WidgetEvent) {
        let name = event.event_name();
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, "No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
