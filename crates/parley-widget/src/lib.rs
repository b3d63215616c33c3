//! Resilient conversational widget engine.
//!
//! Establishes a chat session, exchanges messages with the inference
//! service, tracks lead qualification and human handoff, and degrades
//! gracefully when connectivity, durable storage, or inference fail.

pub mod content;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod inference;
pub mod lead;
pub mod persistence;
pub mod quick_action;
pub mod session;
pub mod store;

pub use controller::{InitPhase, WidgetController, WidgetDeps, WidgetSnapshot};
pub use dispatcher::{PendingTurn, TurnOutcome, TurnReply};
pub use error::{InferenceError, WidgetError};
pub use identity::VisitorIdentityManager;
pub use inference::{HttpInferenceClient, InferenceClient, InferenceReply, InferenceRequest, ParsedReply};
pub use lead::LeadTracker;
pub use persistence::PersistenceQueue;
pub use quick_action::{LoggingNavigator, Navigator, QuickActionCommand, QuickActionOutcome};
pub use session::{InitOutcome, ProbeStatus, SessionInitializer};
pub use store::ConversationStore;
