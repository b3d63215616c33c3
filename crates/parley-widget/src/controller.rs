//! Widget controller: the single entry point the view layer talks to.
//!
//! Owns the visitor identity, the current session epoch and the
//! conversation store, and wires the initializer, dispatcher and quick
//! action engine together. State lives behind one mutex that is never held
//! across an await; every network round-trip happens outside the lock and
//! is folded back in only if its epoch is still current.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use parley_core::config::{ContactConfig, ParleyConfig, WidgetConfig};
use parley_core::events::{EventBus, WidgetEvent};
use parley_core::types::{
    ConversationSession, FileMeta, LeadState, Message, QuickAction, SessionEpoch,
    VisitorIdentity,
};
use parley_storage::{DurableBackend, KeyValueStore};
use tokio::sync::broadcast;

use crate::content::ACTION_HUMAN;
use crate::dispatcher::{MessageDispatcher, PendingTurn, TurnOutcome, TurnReply};
use crate::error::{InferenceError, WidgetError};
use crate::identity::VisitorIdentityManager;
use crate::inference::InferenceClient;
use crate::persistence::PersistenceQueue;
use crate::quick_action::{LoggingNavigator, Navigator, QuickActionCommand, QuickActionOutcome};
use crate::session::SessionInitializer;
use crate::store::ConversationStore;

/// Initialization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    Idle,
    Initializing,
    Ready,
}

/// External collaborators of the widget.
pub struct WidgetDeps {
    pub local_store: Arc<dyn KeyValueStore>,
    pub backend: Option<Arc<dyn DurableBackend>>,
    pub inference: Option<Arc<dyn InferenceClient>>,
    pub navigator: Arc<dyn Navigator>,
    pub events: EventBus,
}

impl WidgetDeps {
    /// Offline defaults: no durable backend, no inference client.
    pub fn new(local_store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            local_store,
            backend: None,
            inference: None,
            navigator: Arc::new(LoggingNavigator),
            events: EventBus::default(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn DurableBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.inference = Some(client);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

/// Read-only view of the widget for rendering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSnapshot {
    pub phase: InitPhase,
    pub visitor_id: String,
    pub session: Option<ConversationSession>,
    pub messages: Vec<Message>,
    pub quick_actions: Vec<QuickAction>,
    pub lead: LeadState,
    pub composing: bool,
    pub draft: String,
    pub input_placeholder: String,
    pub human_available: bool,
}

struct ControllerState {
    phase: InitPhase,
    epoch: SessionEpoch,
    store: ConversationStore,
}

pub struct WidgetController {
    visitor: VisitorIdentity,
    initializer: SessionInitializer,
    dispatcher: MessageDispatcher,
    navigator: Arc<dyn Navigator>,
    persistence: Option<Arc<PersistenceQueue>>,
    events: EventBus,
    widget: WidgetConfig,
    contact: ContactConfig,
    state: Mutex<ControllerState>,
}

/// Abandons the turn if the sending future is dropped mid-flight.
struct InFlightTurn<'a> {
    controller: &'a WidgetController,
    epoch: Option<SessionEpoch>,
}

impl<'a> InFlightTurn<'a> {
    fn new(controller: &'a WidgetController, epoch: SessionEpoch) -> Self {
        Self {
            controller,
            epoch: Some(epoch),
        }
    }

    fn finish(mut self) {
        self.epoch = None;
    }
}

impl Drop for InFlightTurn<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.epoch.take() {
            self.controller.abandon_send(epoch);
        }
    }
}

impl WidgetController {
    /// Resolve the visitor identity and wire the engine.
    ///
    /// Must be called from within a tokio runtime when a durable backend is
    /// supplied, since that starts the persistence worker.
    pub fn new(config: &ParleyConfig, deps: WidgetDeps) -> Self {
        let visitor = VisitorIdentityManager::get_or_create(deps.local_store.as_ref());

        let backend = if config.storage.durable_enabled {
            deps.backend
        } else {
            if deps.backend.is_some() {
                tracing::info!("Durable storage disabled by configuration");
            }
            None
        };
        let persistence = backend
            .as_ref()
            .map(|b| Arc::new(PersistenceQueue::spawn(Arc::clone(b))));

        let initializer =
            SessionInitializer::new(backend, config.widget.clone(), deps.events.clone());
        let dispatcher = MessageDispatcher::new(
            deps.inference,
            Duration::from_millis(config.inference.timeout_ms),
            persistence.clone(),
            config.contact.clone(),
            deps.events.clone(),
        );

        Self {
            visitor,
            initializer,
            dispatcher,
            navigator: deps.navigator,
            persistence,
            events: deps.events,
            widget: config.widget.clone(),
            contact: config.contact.clone(),
            state: Mutex::new(ControllerState {
                phase: InitPhase::Idle,
                epoch: SessionEpoch::default(),
                store: ConversationStore::new(),
            }),
        }
    }

    // Every mutation is a complete step under the lock, so a poisoned
    // guard still holds consistent state.
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new session under a fresh epoch. Always ends `Ready`.
    pub async fn initialize(&self) -> ConversationSession {
        let epoch = {
            let mut state = self.lock();
            state.epoch = state.epoch.next();
            state.phase = InitPhase::Initializing;
            state.store = ConversationStore::new();
            state.epoch
        };

        let outcome = self.initializer.run(&self.visitor, epoch).await;

        let mut state = self.lock();
        if state.epoch != epoch {
            tracing::debug!(epoch = %epoch, current = %state.epoch, "Initialization superseded");
            return outcome.session;
        }
        state.store = ConversationStore::opened(
            outcome.session.clone(),
            outcome.welcome,
            outcome.quick_actions,
        );
        state.phase = InitPhase::Ready;
        outcome.session
    }

    /// Discard the current session and initialize from scratch.
    pub async fn reset(&self) -> ConversationSession {
        {
            let mut state = self.lock();
            tracing::info!(epoch = %state.epoch, "Resetting session");
            state.phase = InitPhase::Idle;
        }
        self.initialize().await
    }

    /// Record the user message and build its request. `Ok(None)` for an
    /// empty send.
    ///
    /// The session stays composing until the turn is completed. A caller
    /// that drops the [`PendingTurn`] unsent must call
    /// [`abandon_send`](Self::abandon_send).
    pub fn begin_send(
        &self,
        text: &str,
        file: Option<FileMeta>,
    ) -> Result<Option<PendingTurn>, WidgetError> {
        let mut state = self.lock();
        if state.phase != InitPhase::Ready {
            if text.trim().is_empty() && file.is_none() {
                return Ok(None);
            }
            return Err(WidgetError::NotReady);
        }
        self.dispatcher
            .prepare(&mut state.store, &self.visitor, text, file)
    }

    /// Fold a reply into the current session.
    pub fn complete_send(&self, reply: TurnReply) -> Result<TurnOutcome, WidgetError> {
        let mut state = self.lock();
        if reply.epoch != state.epoch {
            return Err(WidgetError::StaleEpoch {
                reply: reply.epoch,
                current: state.epoch,
            });
        }
        self.dispatcher.apply(&mut state.store, reply)
    }

    /// Close out a turn whose reply will never arrive, as if the inference
    /// call had failed. No-op if the epoch has moved on or nothing is
    /// composing.
    pub fn abandon_send(&self, epoch: SessionEpoch) -> Option<TurnOutcome> {
        let mut state = self.lock();
        if state.epoch != epoch || !state.store.is_composing() {
            return None;
        }
        tracing::warn!(epoch = %epoch, "Send abandoned before its reply arrived");
        let reply = TurnReply {
            epoch,
            outcome: Err(InferenceError::Cancelled),
        };
        self.dispatcher.apply(&mut state.store, reply).ok()
    }

    /// Send a message and apply its reply. `Ok(None)` when nothing was
    /// sent or the reply belonged to a session that has since been reset.
    pub async fn send_message(
        &self,
        text: &str,
        file: Option<FileMeta>,
    ) -> Result<Option<TurnOutcome>, WidgetError> {
        let Some(turn) = self.begin_send(text, file)? else {
            return Ok(None);
        };
        let guard = InFlightTurn::new(self, turn.epoch);
        let reply = turn.send().await;
        guard.finish();
        match self.complete_send(reply) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(WidgetError::StaleEpoch { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn select_quick_action(
        &self,
        action: &QuickAction,
    ) -> Result<QuickActionOutcome, WidgetError> {
        if action.value == ACTION_HUMAN && self.lead().escalated {
            return Err(WidgetError::InvalidContent(
                "conversation is already with a human".into(),
            ));
        }

        match QuickActionCommand::resolve(action, &self.contact) {
            QuickActionCommand::Reset => Ok(QuickActionOutcome::Reset(self.reset().await)),
            QuickActionCommand::Navigate(uri) => {
                self.navigator.open(&uri).await?;
                Ok(QuickActionOutcome::Navigated(uri))
            }
            QuickActionCommand::Send(text) => {
                Ok(QuickActionOutcome::Sent(self.send_message(&text, None).await?))
            }
        }
    }

    pub fn set_draft(&self, draft: &str) {
        self.lock().store.set_draft(draft);
    }

    pub fn snapshot(&self) -> WidgetSnapshot {
        let state = self.lock();
        let lead = state.store.lead();
        let input_placeholder = if lead.escalated {
            &self.widget.escalated_placeholder
        } else {
            &self.widget.input_placeholder
        };
        WidgetSnapshot {
            phase: state.phase,
            visitor_id: self.visitor.visitor_id.clone(),
            session: state.store.session().cloned(),
            messages: state.store.messages().to_vec(),
            quick_actions: state.store.quick_actions().to_vec(),
            lead,
            composing: state.store.is_composing(),
            draft: state.store.draft().to_string(),
            input_placeholder: input_placeholder.clone(),
            human_available: !lead.escalated,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.events.subscribe()
    }

    pub fn visitor(&self) -> &VisitorIdentity {
        &self.visitor
    }

    pub fn epoch(&self) -> SessionEpoch {
        self.lock().epoch
    }

    pub fn phase(&self) -> InitPhase {
        self.lock().phase
    }

    pub fn lead(&self) -> LeadState {
        self.lock().store.lead()
    }

    pub fn persistence(&self) -> Option<&Arc<PersistenceQueue>> {
        self.persistence.as_ref()
    }

    /// Wait until every queued persistence write has been attempted.
    pub async fn flush_persistence(&self) {
        if let Some(queue) = &self.persistence {
            queue.wait_idle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::types::{MessageType, Sender};
    use parley_storage::MemoryKeyValueStore;

    use crate::content::{fallback_message, recovery_quick_actions};
    use crate::inference::{InferenceReply, InferenceRequest};
    use parley_core::config::ContactConfig;

    struct EchoClient;

    #[async_trait]
    impl InferenceClient for EchoClient {
        async fn infer(
            &self,
            request: &InferenceRequest,
        ) -> Result<InferenceReply, InferenceError> {
            Ok(InferenceReply::text(format!("echo: {}", request.message)))
        }
    }

    struct SlowClient;

    #[async_trait]
    impl InferenceClient for SlowClient {
        async fn infer(
            &self,
            _request: &InferenceRequest,
        ) -> Result<InferenceReply, InferenceError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(InferenceReply::text("too late"))
        }
    }

    fn controller() -> WidgetController {
        let deps = WidgetDeps::new(Arc::new(MemoryKeyValueStore::new()))
            .with_inference(Arc::new(EchoClient));
        WidgetController::new(&ParleyConfig::default(), deps)
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let c = controller();
        assert_eq!(c.phase(), InitPhase::Idle);
        assert_eq!(c.epoch(), SessionEpoch(0));
        let err = c.send_message("hi", None).await.unwrap_err();
        assert!(matches!(err, WidgetError::NotReady));
    }

    #[tokio::test]
    async fn test_initialize_reaches_ready() {
        let c = controller();
        let session = c.initialize().await;
        assert_eq!(c.phase(), InitPhase::Ready);
        assert_eq!(session.epoch, SessionEpoch(1));

        let snap = c.snapshot();
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.quick_actions.len(), 4);
        assert_eq!(snap.input_placeholder, "Type your message...");
        assert!(snap.human_available);
        assert!(snap.visitor_id.starts_with("visitor_"));
    }

    #[tokio::test]
    async fn test_send_message_round_trip() {
        let c = controller();
        c.initialize().await;
        let outcome = c.send_message("hello", None).await.unwrap();
        assert_eq!(outcome, Some(TurnOutcome::Replied { escalated_now: false }));

        let snap = c.snapshot();
        assert_eq!(snap.messages.len(), 3);
        assert_eq!(snap.messages[1].sender, Sender::User);
        assert_eq!(snap.messages[2].text, "echo: hello");
        assert!(!snap.composing);
    }

    #[tokio::test]
    async fn test_cancelled_send_releases_session() {
        let deps = WidgetDeps::new(Arc::new(MemoryKeyValueStore::new()))
            .with_inference(Arc::new(SlowClient));
        let c = WidgetController::new(&ParleyConfig::default(), deps);
        c.initialize().await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), c.send_message("hi", None)).await;
        assert!(cancelled.is_err());

        let snap = c.snapshot();
        assert!(!snap.composing);
        assert_eq!(snap.messages.len(), 3);
        let last = snap.messages.last().unwrap();
        assert_eq!(last.message_type, MessageType::Error);
        assert_eq!(last.text, fallback_message(&ContactConfig::default()));
        assert_eq!(snap.quick_actions, recovery_quick_actions());

        let next = c.begin_send("again", None).unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_abandon_send_ignores_stale_epoch() {
        let c = controller();
        c.initialize().await;
        let turn = c.begin_send("hello", None).unwrap().unwrap();
        c.reset().await;

        assert!(c.abandon_send(turn.epoch).is_none());
        assert_eq!(c.snapshot().messages.len(), 1);
        assert!(!c.snapshot().composing);
    }

    #[tokio::test]
    async fn test_abandon_send_after_completion_is_noop() {
        let c = controller();
        c.initialize().await;
        let turn = c.begin_send("hello", None).unwrap().unwrap();
        let epoch = turn.epoch;
        c.complete_send(turn.send().await).unwrap();

        assert!(c.abandon_send(epoch).is_none());
        assert_eq!(c.snapshot().messages.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_send_before_ready_is_noop() {
        let c = controller();
        assert!(c.send_message("", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_after_reset_is_discarded() {
        let c = controller();
        c.initialize().await;
        let turn = c.begin_send("hello", None).unwrap().unwrap();
        c.reset().await;

        let reply = turn.send().await;
        let err = c.complete_send(reply).unwrap_err();
        assert!(matches!(err, WidgetError::StaleEpoch { .. }));
        assert_eq!(c.snapshot().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_quick_action_resets() {
        let c = controller();
        let first = c.initialize().await;
        let retry = QuickAction::new("🔄", "Try Again", "retry");
        let outcome = c.select_quick_action(&retry).await.unwrap();
        match outcome {
            QuickActionOutcome::Reset(session) => {
                assert_ne!(session.conversation_id, first.conversation_id);
                assert_eq!(session.epoch, SessionEpoch(2));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_navigation_has_no_conversational_effect() {
        let c = controller();
        c.initialize().await;
        let before = c.snapshot();
        let call = QuickAction::new("📞", "Call Us", "call");
        let outcome = c.select_quick_action(&call).await.unwrap();
        assert!(matches!(outcome, QuickActionOutcome::Navigated(ref uri) if uri.starts_with("tel:")));
        let after = c.snapshot();
        assert_eq!(before.messages.len(), after.messages.len());
        assert_eq!(before.quick_actions, after.quick_actions);
    }

    #[tokio::test]
    async fn test_fatal_init_still_ready() {
        let mut config = ParleyConfig::default();
        config.widget.welcome_message = String::new();
        let c = WidgetController::new(&config, WidgetDeps::new(Arc::new(MemoryKeyValueStore::new())));
        let session = c.initialize().await;
        assert!(session.conversation_id.as_str().starts_with("error_"));
        assert_eq!(c.phase(), InitPhase::Ready);
        assert_eq!(c.snapshot().messages[0].message_type, MessageType::Text);
    }

    #[tokio::test]
    async fn test_visitor_id_stable_across_controllers() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let a = WidgetController::new(&ParleyConfig::default(), WidgetDeps::new(Arc::clone(&store)));
        let b = WidgetController::new(&ParleyConfig::default(), WidgetDeps::new(store));
        assert_eq!(a.visitor().visitor_id, b.visitor().visitor_id);
    }

    #[tokio::test]
    async fn test_draft_in_snapshot() {
        let c = controller();
        c.initialize().await;
        c.set_draft("typing");
        assert_eq!(c.snapshot().draft, "typing");
    }
}
