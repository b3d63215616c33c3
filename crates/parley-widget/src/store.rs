//! Conversation state store.
//!
//! Owns everything that belongs to one session epoch: the session metadata,
//! the append-only transcript, lead state, and the transient view state
//! (active quick actions, composing indicator, draft input). A reset
//! replaces the whole store.

use parley_core::types::{ConversationSession, LeadState, Message, QuickAction};

use crate::content::ACTION_HUMAN;
use crate::lead::LeadTracker;

#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    session: Option<ConversationSession>,
    messages: Vec<Message>,
    quick_actions: Vec<QuickAction>,
    lead: LeadTracker,
    composing: bool,
    draft: String,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a freshly initialized session.
    pub fn opened(
        session: ConversationSession,
        welcome: Message,
        quick_actions: Vec<QuickAction>,
    ) -> Self {
        let mut store = Self {
            session: Some(session),
            ..Self::default()
        };
        store.append(welcome);
        store.replace_quick_actions(quick_actions);
        store
    }

    pub fn session(&self) -> Option<&ConversationSession> {
        self.session.as_ref()
    }

    /// Append to the transcript. Insertion order is chronological order.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Replace the active set wholesale. Sets are never merged, and the
    /// human-request action is dropped once the conversation is escalated.
    pub fn replace_quick_actions(&mut self, actions: Vec<QuickAction>) {
        self.quick_actions = actions;
        if self.lead.is_escalated() {
            self.quick_actions.retain(|a| a.value != ACTION_HUMAN);
        }
    }

    pub fn clear_quick_actions(&mut self) {
        self.quick_actions.clear();
    }

    pub fn quick_actions(&self) -> &[QuickAction] {
        &self.quick_actions
    }

    pub fn lead(&self) -> LeadState {
        self.lead.state()
    }

    pub fn apply_lead_score(&mut self, raw: f64) {
        self.lead.apply_score(raw);
    }

    /// Latch escalation. Returns `true` only on the false→true transition.
    pub fn escalate(&mut self) -> bool {
        if !self.lead.escalate() {
            return false;
        }
        self.quick_actions.retain(|a| a.value != ACTION_HUMAN);
        true
    }

    pub fn set_composing(&mut self, composing: bool) {
        self.composing = composing;
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }
}
