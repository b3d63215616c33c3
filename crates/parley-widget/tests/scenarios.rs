//! End-to-end behavior of the widget controller with scripted
//! collaborators and a real SQLite backend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use parley_core::config::{ContactConfig, ParleyConfig};
use parley_core::error::ParleyError;
use parley_core::events::{EventBus, WidgetEvent};
use parley_core::types::{Message, MessageType, QuickAction, Sender, SessionMode};
use parley_storage::{
    Database, DurableBackend, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore,
    NewConversation, SqliteBackend,
};
use parley_widget::content::{fallback_message, recovery_quick_actions, HUMAN_REQUEST_PHRASE};
use parley_widget::{
    InferenceClient, InferenceError, InferenceReply, InferenceRequest, InitPhase,
    QuickActionOutcome, TurnOutcome, WidgetController, WidgetDeps, WidgetError,
};

// =============================================================================
// Helpers
// =============================================================================

/// Inference client that records requests and replays scripted replies.
/// Once the script runs out it answers with plain text.
#[derive(Default)]
struct ScriptedInference {
    replies: Mutex<VecDeque<Result<InferenceReply, InferenceError>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInference {
    fn with(replies: Vec<Result<InferenceReply, InferenceError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn messages(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.message.clone())
            .collect()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceReply, InferenceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(InferenceReply::text("Happy to help.")))
    }
}

/// Backend whose profile upsert always fails.
#[derive(Default)]
struct UpsertFailsBackend {
    conversations: Mutex<Vec<NewConversation>>,
}

#[async_trait]
impl DurableBackend for UpsertFailsBackend {
    async fn probe(&self) -> Result<(), ParleyError> {
        Ok(())
    }
    async fn upsert_visitor_profile(&self, _visitor_id: &str) -> Result<String, ParleyError> {
        Err(ParleyError::Storage("duplicate key".into()))
    }
    async fn insert_conversation(&self, c: &NewConversation) -> Result<String, ParleyError> {
        self.conversations.lock().unwrap().push(c.clone());
        Ok("conv-b".into())
    }
    async fn insert_message(&self, _cid: &str, _m: &Message) -> Result<(), ParleyError> {
        Ok(())
    }
}

/// Backend that is unreachable.
struct DownBackend;

#[async_trait]
impl DurableBackend for DownBackend {
    async fn probe(&self) -> Result<(), ParleyError> {
        Err(ParleyError::Unavailable("connection refused".into()))
    }
    async fn upsert_visitor_profile(&self, _visitor_id: &str) -> Result<String, ParleyError> {
        panic!("upsert must not run when the probe fails");
    }
    async fn insert_conversation(&self, _c: &NewConversation) -> Result<String, ParleyError> {
        panic!("insert must not run when the probe fails");
    }
    async fn insert_message(&self, _cid: &str, _m: &Message) -> Result<(), ParleyError> {
        panic!("messages must not be written for an offline session");
    }
}

fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryKeyValueStore::new())
}

fn reply_with_score(text: &str, score: f64) -> InferenceReply {
    let mut reply = InferenceReply::text(text);
    reply.lead_score = Some(score);
    reply
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<WidgetEvent>) -> Vec<WidgetEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// Initialization
// =============================================================================

#[tokio::test]
async fn test_no_backend_opens_offline_session() {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_events(events),
    );

    let session = c.initialize().await;
    assert!(session.conversation_id.as_str().starts_with("offline_"));
    assert!(!session.connected);
    assert_eq!(session.mode, SessionMode::Ephemeral);

    let snap = c.snapshot();
    assert_eq!(snap.phase, InitPhase::Ready);
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(snap.messages[0].sender, Sender::Bot);
    assert_eq!(snap.quick_actions.len(), 4);

    let opened = drain(&mut rx);
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].event_name(), "session_opened");
    assert_eq!(opened[0].conversation_id(), &session.conversation_id);
}

#[tokio::test]
async fn test_unreachable_backend_opens_offline_session() {
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_backend(Arc::new(DownBackend)),
    );
    let session = c.initialize().await;
    assert!(session.conversation_id.is_synthetic());
    assert!(!session.connected);

    c.send_message("hello", None).await.unwrap();
    c.flush_persistence().await;
}

#[tokio::test]
async fn test_failed_upsert_keeps_conversation() {
    let backend = Arc::new(UpsertFailsBackend::default());
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_backend(backend.clone()),
    );

    let session = c.initialize().await;
    assert_eq!(session.conversation_id.as_str(), "conv-b");
    assert!(session.connected);
    assert_eq!(session.mode, SessionMode::Persisted);
    assert!(session.visitor_profile_id.is_none());

    let inserted = backend.conversations.lock().unwrap();
    assert_eq!(inserted.len(), 1);
    assert!(inserted[0].visitor_profile_id.is_none());
    assert_eq!(inserted[0].visitor_id, c.visitor().visitor_id);
}

#[tokio::test]
async fn test_durable_disabled_ignores_backend() {
    let mut config = ParleyConfig::default();
    config.storage.durable_enabled = false;
    let backend = Arc::new(UpsertFailsBackend::default());
    let c = WidgetController::new(
        &config,
        WidgetDeps::new(memory_store()).with_backend(backend.clone()),
    );
    let session = c.initialize().await;
    assert!(session.conversation_id.as_str().starts_with("offline_"));
    assert!(backend.conversations.lock().unwrap().is_empty());
    assert!(c.persistence().is_none());
}

#[tokio::test]
async fn test_visitor_id_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local_store.json");

    let first = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(Arc::new(FileKeyValueStore::new(&path))),
    );
    let second = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(Arc::new(FileKeyValueStore::new(&path))),
    );
    assert!(first.visitor().persisted);
    assert_eq!(first.visitor().visitor_id, second.visitor().visitor_id);
}

// =============================================================================
// Quick actions
// =============================================================================

#[tokio::test]
async fn test_pricing_quick_action_sends_label() {
    let inference = ScriptedInference::with(vec![]);
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_inference(inference.clone()),
    );
    c.initialize().await;

    let pricing = c.snapshot().quick_actions[0].clone();
    assert_eq!(pricing.value, "pricing");
    let outcome = c.select_quick_action(&pricing).await.unwrap();
    assert!(matches!(outcome, QuickActionOutcome::Sent(Some(TurnOutcome::Replied { .. }))));

    assert_eq!(inference.messages(), vec!["Pricing Info"]);
    let snap = c.snapshot();
    assert_eq!(snap.messages[1].sender, Sender::User);
    assert_eq!(snap.messages[1].text, "Pricing Info");
    assert_eq!(snap.messages[2].sender, Sender::Bot);
}

#[tokio::test]
async fn test_human_quick_action_sends_phrase() {
    let inference = ScriptedInference::with(vec![]);
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_inference(inference.clone()),
    );
    c.initialize().await;

    let human = QuickAction::new("👤", "Talk to a Human", "human");
    c.select_quick_action(&human).await.unwrap();
    assert_eq!(inference.messages(), vec![HUMAN_REQUEST_PHRASE]);
}

#[tokio::test]
async fn test_email_quick_action_navigates_only() {
    let inference = ScriptedInference::with(vec![]);
    let mut config = ParleyConfig::default();
    config.contact = ContactConfig {
        phone: "+1 555 0100".into(),
        email: "sales@acme.test".into(),
    };
    let c = WidgetController::new(
        &config,
        WidgetDeps::new(memory_store()).with_inference(inference.clone()),
    );
    c.initialize().await;

    let email = QuickAction::new("✉️", "Email Us", "email");
    let outcome = c.select_quick_action(&email).await.unwrap();
    assert_eq!(
        outcome,
        QuickActionOutcome::Navigated("mailto:sales@acme.test".into())
    );
    assert!(inference.messages().is_empty());
    assert_eq!(c.snapshot().messages.len(), 1);
}

#[tokio::test]
async fn test_retry_yields_new_epoch_and_id() {
    let c = WidgetController::new(&ParleyConfig::default(), WidgetDeps::new(memory_store()));
    let first = c.initialize().await;
    c.send_message("hello", None).await.unwrap();

    let retry = QuickAction::new("🔄", "Try Again", "retry");
    let QuickActionOutcome::Reset(second) = c.select_quick_action(&retry).await.unwrap() else {
        panic!("retry must reset");
    };

    assert!(second.epoch > first.epoch);
    assert_ne!(second.conversation_id, first.conversation_id);
    assert_eq!(c.snapshot().messages.len(), 1);
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_inference_failure_shows_fallback_and_recovery_actions() {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let inference = ScriptedInference::with(vec![Err(InferenceError::Transport(
        "connection reset".into(),
    ))]);
    let config = ParleyConfig::default();
    let c = WidgetController::new(
        &config,
        WidgetDeps::new(memory_store())
            .with_inference(inference)
            .with_events(events),
    );
    c.initialize().await;
    drain(&mut rx);

    let outcome = c.send_message("hello", None).await.unwrap();
    assert!(matches!(outcome, Some(TurnOutcome::Fallback { .. })));

    let snap = c.snapshot();
    let last = snap.messages.last().unwrap();
    assert_eq!(last.sender, Sender::Bot);
    assert_eq!(last.message_type, MessageType::Error);
    assert_eq!(last.text, fallback_message(&config.contact));
    assert_eq!(snap.quick_actions, recovery_quick_actions());
    assert!(!snap.composing);

    let names: Vec<_> = drain(&mut rx).iter().map(|e| e.event_name()).collect();
    assert_eq!(names, vec!["inference_failed"]);
}

#[tokio::test]
async fn test_lead_score_is_absolute_and_clamped() {
    let inference = ScriptedInference::with(vec![
        Ok(reply_with_score("a", 40.0)),
        Ok(reply_with_score("b", 73.0)),
        Ok(reply_with_score("c", 180.0)),
        Ok(InferenceReply::text("d")),
    ]);
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_inference(inference),
    );
    c.initialize().await;

    c.send_message("one", None).await.unwrap();
    c.send_message("two", None).await.unwrap();
    assert_eq!(c.lead().score, 73);
    c.send_message("three", None).await.unwrap();
    assert_eq!(c.lead().score, 100);
    c.send_message("four", None).await.unwrap();
    assert_eq!(c.lead().score, 100);
}

#[tokio::test]
async fn test_escalation_latches_and_hides_human_action() {
    let mut escalate = InferenceReply::text("A teammate will join shortly.");
    escalate.escalated = true;
    escalate.quick_actions = Some(vec![
        QuickAction::new("👤", "Talk to a Human", "human"),
        QuickAction::new("📅", "Book a Consultation", "consultation"),
    ]);
    let inference = ScriptedInference::with(vec![
        Ok(escalate),
        Ok(InferenceReply::text("Still with you.")),
    ]);
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_inference(inference),
    );
    c.initialize().await;

    let outcome = c.send_message("I want to buy", None).await.unwrap();
    assert_eq!(outcome, Some(TurnOutcome::Replied { escalated_now: true }));

    let snap = c.snapshot();
    assert!(snap.lead.escalated);
    assert!(!snap.human_available);
    assert_eq!(snap.input_placeholder, ParleyConfig::default().widget.escalated_placeholder);
    assert!(snap.quick_actions.iter().all(|a| a.value != "human"));
    assert_eq!(snap.quick_actions.len(), 1);
    assert_eq!(snap.messages.last().unwrap().sender, Sender::System);

    c.send_message("hello?", None).await.unwrap();
    assert!(c.lead().escalated);

    let human = QuickAction::new("👤", "Talk to a Human", "human");
    let err = c.select_quick_action(&human).await.unwrap_err();
    assert!(matches!(err, WidgetError::InvalidContent(_)));
}

#[tokio::test]
async fn test_message_received_event_carries_reply_metadata() {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let mut reply = reply_with_score("Our plans start at $49.", 55.0);
    reply.intent = Some("pricing".into());
    reply.confidence = Some(0.9);
    reply.powered_by = Some("mock-llm".into());
    reply.error_fallback = true;
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store())
            .with_inference(ScriptedInference::with(vec![Ok(reply)]))
            .with_events(events),
    );
    c.initialize().await;
    drain(&mut rx);

    c.send_message("pricing?", None).await.unwrap();
    let events = drain(&mut rx);
    match &events[0] {
        WidgetEvent::MessageReceived {
            intent,
            confidence,
            lead_score,
            escalated,
            powered_by,
            error_fallback,
            ..
        } => {
            assert_eq!(intent.as_deref(), Some("pricing"));
            assert_eq!(*confidence, Some(0.9));
            assert_eq!(*lead_score, 55);
            assert!(!escalated);
            assert_eq!(powered_by.as_deref(), Some("mock-llm"));
            assert!(*error_fallback);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_stale_reply_after_reset_is_ignored() {
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_inference(ScriptedInference::with(vec![])),
    );
    c.initialize().await;
    let turn = c.begin_send("before reset", None).unwrap().unwrap();
    let new_session = c.reset().await;

    let reply = turn.send().await;
    assert!(matches!(
        c.complete_send(reply),
        Err(WidgetError::StaleEpoch { .. })
    ));
    let snap = c.snapshot();
    assert_eq!(snap.session.unwrap(), new_session);
    assert_eq!(snap.messages.len(), 1);
    assert!(!snap.composing);
}

#[tokio::test]
async fn test_send_in_flight_rejected() {
    let c = WidgetController::new(&ParleyConfig::default(), WidgetDeps::new(memory_store()));
    c.initialize().await;
    let _turn = c.begin_send("first", None).unwrap().unwrap();
    let err = c.begin_send("second", None).err().unwrap();
    assert!(matches!(err, WidgetError::SendInFlight));
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_persisted_session_writes_transcript_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new(&dir.path().join("parley.db")).unwrap());
    let backend = Arc::new(SqliteBackend::new(Arc::clone(&db)));

    let mut escalate = reply_with_score("Connecting you with our team.", 90.0);
    escalate.escalated = true;
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store())
            .with_backend(backend.clone())
            .with_inference(ScriptedInference::with(vec![Ok(escalate)])),
    );

    let session = c.initialize().await;
    assert_eq!(session.mode, SessionMode::Persisted);
    assert!(session.visitor_profile_id.is_some());

    c.send_message("I need a quote", None).await.unwrap();
    c.flush_persistence().await;

    let stored = backend
        .messages()
        .list_for_conversation(session.conversation_id.as_str())
        .unwrap();
    let senders: Vec<_> = stored.iter().map(|m| m.sender).collect();
    assert_eq!(senders, vec![Sender::User, Sender::Bot, Sender::System]);
    assert_eq!(stored[0].text, "I need a quote");

    let row = backend
        .conversations()
        .find_by_id(session.conversation_id.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(row.visitor_id, c.visitor().visitor_id);
    assert_eq!(c.persistence().unwrap().failures(), 0);
}

#[tokio::test]
async fn test_fallback_reply_is_not_persisted() {
    let db = Arc::new(Database::in_memory().unwrap());
    let backend = Arc::new(SqliteBackend::new(Arc::clone(&db)));
    let c = WidgetController::new(
        &ParleyConfig::default(),
        WidgetDeps::new(memory_store()).with_backend(backend.clone()),
    );
    let session = c.initialize().await;

    let outcome = c.send_message("anyone there?", None).await.unwrap();
    assert!(matches!(
        outcome,
        Some(TurnOutcome::Fallback {
            error: InferenceError::NotConfigured
        })
    ));
    c.flush_persistence().await;

    let count = backend
        .messages()
        .count_for_conversation(session.conversation_id.as_str())
        .unwrap();
    assert_eq!(count, 1);
}
