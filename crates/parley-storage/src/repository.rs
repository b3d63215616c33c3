//! Repository implementations for SQLite-backed persistence.
//!
//! Provides VisitorProfileRepository, ConversationRepository and
//! MessageRepository that operate on the Database struct using raw SQL.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use uuid::Uuid;

use parley_core::error::ParleyError;
use parley_core::types::{FileMeta, Message, MessageType, PageContext, Sender, Timestamp};

use crate::db::Database;

/// A stored visitor profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorProfileRow {
    pub id: String,
    pub visitor_id: String,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
}

/// A stored conversation header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub id: String,
    pub visitor_id: String,
    pub visitor_profile_id: Option<String>,
    pub page: PageContext,
    pub started_at: i64,
}

/// Repository for visitor profiles.
#[derive(Clone)]
pub struct VisitorProfileRepository {
    db: Arc<Database>,
}

impl VisitorProfileRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or refresh the profile keyed by `visitor_id`, returning its id.
    ///
    /// Conflict-safe: repeated calls for the same visitor return the same id
    /// and only bump `last_seen_at`.
    pub fn upsert(&self, visitor_id: &str) -> Result<String, ParleyError> {
        let now = Timestamp::now().0;
        self.db.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO visitor_profiles (id, visitor_id, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT (visitor_id) DO UPDATE SET last_seen_at = excluded.last_seen_at
                 RETURNING id",
                rusqlite::params![Uuid::new_v4().to_string(), visitor_id, now],
                |row| row.get(0),
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to upsert visitor profile: {}", e)))
        })
    }

    pub fn find_by_visitor(&self, visitor_id: &str) -> Result<Option<VisitorProfileRow>, ParleyError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, visitor_id, first_seen_at, last_seen_at
                 FROM visitor_profiles WHERE visitor_id = ?1",
                rusqlite::params![visitor_id],
                |row| {
                    Ok(VisitorProfileRow {
                        id: row.get(0)?,
                        visitor_id: row.get(1)?,
                        first_seen_at: row.get(2)?,
                        last_seen_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| ParleyError::Storage(e.to_string()))
        })
    }

    pub fn count(&self) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM visitor_profiles", [], |row| row.get(0))
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Repository for conversation headers.
#[derive(Clone)]
pub struct ConversationRepository {
    db: Arc<Database>,
}

impl ConversationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new conversation and return its generated id.
    pub fn insert(
        &self,
        visitor_id: &str,
        visitor_profile_id: Option<&str>,
        page: &PageContext,
    ) -> Result<String, ParleyError> {
        let id = Uuid::new_v4().to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations
                    (id, visitor_id, visitor_profile_id, page_url, page_title, referrer, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    visitor_id,
                    visitor_profile_id,
                    page.url,
                    page.title,
                    page.referrer,
                    Timestamp::now().0,
                ],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to insert conversation: {}", e)))?;
            Ok(())
        })?;
        Ok(id)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<ConversationRow>, ParleyError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, visitor_id, visitor_profile_id, page_url, page_title, referrer, started_at
                 FROM conversations WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        visitor_id: row.get(1)?,
                        visitor_profile_id: row.get(2)?,
                        page: PageContext {
                            url: row.get(3)?,
                            title: row.get(4)?,
                            referrer: row.get(5)?,
                        },
                        started_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(|e| ParleyError::Storage(e.to_string()))
        })
    }

    pub fn count(&self) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Repository for transcript messages.
#[derive(Clone)]
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a message to a conversation. Insertion order is preserved.
    pub fn insert(&self, conversation_id: &str, message: &Message) -> Result<(), ParleyError> {
        let file = message.file.as_ref();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, conversation_id, sender, message_type, text, file_name, file_size,
                     file_type, confidence, intent, created_at, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                     (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?2))",
                rusqlite::params![
                    message.id.to_string(),
                    conversation_id,
                    message.sender.as_str(),
                    message.message_type.as_str(),
                    message.text,
                    file.map(|f| f.name.as_str()),
                    file.map(|f| f.size as i64),
                    file.map(|f| f.mime_type.as_str()),
                    message.confidence,
                    message.intent,
                    message.timestamp.0,
                ],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to insert message: {}", e)))?;
            Ok(())
        })
    }

    /// All messages of a conversation in insertion order.
    pub fn list_for_conversation(&self, conversation_id: &str) -> Result<Vec<Message>, ParleyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, sender, message_type, text, file_name, file_size, file_type,
                            confidence, intent, created_at
                     FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC",
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![conversation_id], |row| {
                    Ok(row_to_message(row))
                })
                .map_err(|e| ParleyError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                let message = row.map_err(|e| ParleyError::Storage(e.to_string()))??;
                messages.push(message);
            }
            Ok(messages)
        })
    }

    pub fn count_for_conversation(&self, conversation_id: &str) -> Result<u64, ParleyError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    rusqlite::params![conversation_id],
                    |row| row.get(0),
                )
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, ParleyError> {
    let storage = |e: rusqlite::Error| ParleyError::Storage(e.to_string());

    let id: String = row.get(0).map_err(storage)?;
    let sender: String = row.get(1).map_err(storage)?;
    let message_type: String = row.get(2).map_err(storage)?;
    let file_name: Option<String> = row.get(4).map_err(storage)?;
    let file_size: Option<i64> = row.get(5).map_err(storage)?;
    let file_type: Option<String> = row.get(6).map_err(storage)?;

    let sender = match sender.as_str() {
        "user" => Sender::User,
        "bot" => Sender::Bot,
        "system" => Sender::System,
        other => return Err(ParleyError::Storage(format!("Unknown sender: {}", other))),
    };
    let message_type = MessageType::from_wire(&message_type)
        .ok_or_else(|| ParleyError::Storage(format!("Unknown message type: {}", message_type)))?;

    Ok(Message {
        id: Uuid::parse_str(&id).map_err(|e| ParleyError::Storage(e.to_string()))?,
        text: row.get(3).map_err(storage)?,
        sender,
        timestamp: Timestamp(row.get(9).map_err(storage)?),
        message_type,
        file: file_name.map(|name| FileMeta {
            name,
            size: file_size.unwrap_or_default().max(0) as u64,
            mime_type: file_type.unwrap_or_default(),
        }),
        confidence: row.get(7).map_err(storage)?,
        intent: row.get(8).map_err(storage)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let repo = VisitorProfileRepository::new(db());
        let first = repo.upsert("visitor_1_abc").unwrap();
        let second = repo.upsert("visitor_1_abc").unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.count().unwrap(), 1);

        let row = repo.find_by_visitor("visitor_1_abc").unwrap().unwrap();
        assert_eq!(row.id, first);
        assert!(row.last_seen_at >= row.first_seen_at);
    }

    #[test]
    fn test_find_missing_profile() {
        let repo = VisitorProfileRepository::new(db());
        assert!(repo.find_by_visitor("nobody").unwrap().is_none());
    }

    #[test]
    fn test_insert_conversation_with_page_context() {
        let db = db();
        let profiles = VisitorProfileRepository::new(Arc::clone(&db));
        let conversations = ConversationRepository::new(Arc::clone(&db));

        let profile_id = profiles.upsert("v1").unwrap();
        let page = PageContext {
            url: "https://example.com/pricing".into(),
            title: "Pricing".into(),
            referrer: Some("https://search.example".into()),
        };
        let id = conversations.insert("v1", Some(&profile_id), &page).unwrap();

        let row = conversations.find_by_id(&id).unwrap().unwrap();
        assert_eq!(row.visitor_profile_id.as_deref(), Some(profile_id.as_str()));
        assert_eq!(row.page, page);
        assert_eq!(conversations.count().unwrap(), 1);
    }

    #[test]
    fn test_insert_conversation_without_profile() {
        let conversations = ConversationRepository::new(db());
        let id = conversations
            .insert("v2", None, &PageContext::default())
            .unwrap();
        let row = conversations.find_by_id(&id).unwrap().unwrap();
        assert!(row.visitor_profile_id.is_none());
    }

    #[test]
    fn test_messages_preserve_order_and_fields() {
        let db = db();
        let conversations = ConversationRepository::new(Arc::clone(&db));
        let messages = MessageRepository::new(Arc::clone(&db));
        let cid = conversations.insert("v3", None, &PageContext::default()).unwrap();

        let user = Message::user(
            "quote please",
            Some(FileMeta {
                name: "specs.pdf".into(),
                size: 1024,
                mime_type: "application/pdf".into(),
            }),
        );
        let bot = Message::bot("Sure!", MessageType::Text)
            .with_confidence(Some(0.82))
            .with_intent(Some("pricing".into()));
        messages.insert(&cid, &user).unwrap();
        messages.insert(&cid, &bot).unwrap();

        let stored = messages.list_for_conversation(&cid).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], user);
        assert_eq!(stored[1], bot);
        assert_eq!(messages.count_for_conversation(&cid).unwrap(), 2);
    }

    #[test]
    fn test_message_for_unknown_conversation_rejected() {
        let messages = MessageRepository::new(db());
        let result = messages.insert("missing", &Message::bot("hi", MessageType::Text));
        assert!(matches!(result, Err(ParleyError::Storage(_))));
    }
}
