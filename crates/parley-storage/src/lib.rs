//! Parley storage crate - durable conversation persistence and local
//! key-value storage.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! visitor profiles, conversations and messages, the `DurableBackend`
//! seam consumed by the widget engine, and the local key-value store that
//! holds the stable visitor id.

pub mod backend;
pub mod db;
pub mod kv;
pub mod migrations;
pub mod repository;

pub use backend::{DurableBackend, NewConversation, SqliteBackend};
pub use db::Database;
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use repository::{
    ConversationRepository, ConversationRow, MessageRepository, VisitorProfileRepository,
    VisitorProfileRow,
};
