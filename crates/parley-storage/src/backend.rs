//! Durable persistence backend.
//!
//! `DurableBackend` is the seam between the widget engine and whatever
//! hosted store keeps conversations. Every call is best-effort from the
//! engine's point of view: failures are logged and never reach the visitor.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::OptionalExtension;

use parley_core::error::ParleyError;
use parley_core::types::{Message, PageContext};

use crate::db::Database;
use crate::repository::{ConversationRepository, MessageRepository, VisitorProfileRepository};

/// Data needed to open a conversation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub visitor_id: String,
    pub visitor_profile_id: Option<String>,
    pub page: PageContext,
}

#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Minimal read-only request proving the store is reachable.
    async fn probe(&self) -> Result<(), ParleyError>;

    /// Conflict-safe upsert keyed by `visitor_id`. Returns the profile id.
    async fn upsert_visitor_profile(&self, visitor_id: &str) -> Result<String, ParleyError>;

    /// Insert a conversation row. Returns the backend-issued id.
    async fn insert_conversation(&self, conversation: &NewConversation) -> Result<String, ParleyError>;

    async fn insert_message(&self, conversation_id: &str, message: &Message) -> Result<(), ParleyError>;
}

/// SQLite implementation of [`DurableBackend`].
pub struct SqliteBackend {
    db: Arc<Database>,
    profiles: VisitorProfileRepository,
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl SqliteBackend {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            profiles: VisitorProfileRepository::new(Arc::clone(&db)),
            conversations: ConversationRepository::new(Arc::clone(&db)),
            messages: MessageRepository::new(Arc::clone(&db)),
            db,
        }
    }

    pub fn messages(&self) -> &MessageRepository {
        &self.messages
    }

    pub fn conversations(&self) -> &ConversationRepository {
        &self.conversations
    }

    pub fn profiles(&self) -> &VisitorProfileRepository {
        &self.profiles
    }
}

// rusqlite is blocking; every call runs on the blocking pool.
async fn run_blocking<F, T>(f: F) -> Result<T, ParleyError>
where
    F: FnOnce() -> Result<T, ParleyError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ParleyError::Storage(format!("Storage task panicked: {}", e)))?
}

#[async_trait]
impl DurableBackend for SqliteBackend {
    async fn probe(&self) -> Result<(), ParleyError> {
        let db = Arc::clone(&self.db);
        run_blocking(move || {
            db.with_conn(|conn| {
                conn.query_row("SELECT id FROM conversations LIMIT 1", [], |row| {
                    row.get::<_, String>(0)
                })
                .optional()
                .map_err(|e| ParleyError::Unavailable(e.to_string()))?;
                Ok(())
            })
        })
        .await
    }

    async fn upsert_visitor_profile(&self, visitor_id: &str) -> Result<String, ParleyError> {
        let profiles = self.profiles.clone();
        let visitor_id = visitor_id.to_string();
        run_blocking(move || profiles.upsert(&visitor_id)).await
    }

    async fn insert_conversation(&self, conversation: &NewConversation) -> Result<String, ParleyError> {
        let conversations = self.conversations.clone();
        let conversation = conversation.clone();
        run_blocking(move || {
            conversations.insert(
                &conversation.visitor_id,
                conversation.visitor_profile_id.as_deref(),
                &conversation.page,
            )
        })
        .await
    }

    async fn insert_message(&self, conversation_id: &str, message: &Message) -> Result<(), ParleyError> {
        let messages = self.messages.clone();
        let conversation_id = conversation_id.to_string();
        let message = message.clone();
        run_blocking(move || messages.insert(&conversation_id, &message)).await
    }
}
