use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Who authored a transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
            Sender::System => "system",
        }
    }
}

/// How a transcript entry should be presented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    File,
    Announcement,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::File => "file",
            MessageType::Announcement => "announcement",
            MessageType::Error => "error",
        }
    }

    /// Parse the wire name used by the inference service.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageType::Text),
            "file" => Some(MessageType::File),
            "announcement" => Some(MessageType::Announcement),
            "error" => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// Whether a conversation is backed by durable storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Backed by a backend-issued conversation id.
    Persisted,
    /// Synthetic id, nothing written to durable storage.
    Ephemeral,
}

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Unix timestamp in milliseconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }
}

/// Monotonically increasing tag identifying one initialization lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionEpoch(pub u64);

impl SessionEpoch {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Prefix of ids synthesized when durable storage is unreachable.
pub const OFFLINE_PREFIX: &str = "offline_";
/// Prefix of ids synthesized by the fatal-initialization fallback.
pub const ERROR_PREFIX: &str = "error_";

/// Conversation identifier, either backend-issued or synthetic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap an id issued by the durable backend.
    pub fn persisted(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn offline(ts: Timestamp) -> Self {
        Self(format!("{}{}", OFFLINE_PREFIX, ts.0))
    }

    pub fn error(ts: Timestamp) -> Self {
        Self(format!("{}{}", ERROR_PREFIX, ts.0))
    }

    /// True for `offline_` and `error_` ids.
    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(OFFLINE_PREFIX) || self.0.starts_with(ERROR_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// Stable per-installation visitor identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorIdentity {
    pub visitor_id: String,
    /// False when local storage was unavailable and the id lives only as
    /// long as this process.
    #[serde(skip)]
    pub persisted: bool,
}

/// Metadata of an attached file. Bytes are never carried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// A suggested reply presented to the visitor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickAction {
    #[serde(default)]
    pub icon: String,
    pub text: String,
    pub value: String,
}

impl QuickAction {
    pub fn new(icon: impl Into<String>, text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            icon: icon.into(),
            text: text.into(),
            value: value.into(),
        }
    }
}

/// A single transcript entry. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub text: String,
    pub sender: Sender,
    pub timestamp: Timestamp,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl Message {
    fn base(sender: Sender, text: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            sender,
            timestamp: Timestamp::now(),
            message_type,
            file: None,
            confidence: None,
            intent: None,
        }
    }

    /// Visitor-authored message. Attachments switch the type to `File`.
    pub fn user(text: impl Into<String>, file: Option<FileMeta>) -> Self {
        let message_type = if file.is_some() {
            MessageType::File
        } else {
            MessageType::Text
        };
        Self {
            file,
            ..Self::base(Sender::User, text, message_type)
        }
    }

    pub fn bot(text: impl Into<String>, message_type: MessageType) -> Self {
        Self::base(Sender::Bot, text, message_type)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::base(Sender::System, text, MessageType::Announcement)
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_intent(mut self, intent: Option<String>) -> Self {
        self.intent = intent;
        self
    }
}

/// Lead-qualification state asserted by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadState {
    /// Always within `0..=100`.
    pub score: u8,
    /// One-way latch.
    pub escalated: bool,
}

/// Page the widget is embedded in, recorded on the conversation row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
}

/// Metadata of one conversational session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    pub conversation_id: ConversationId,
    pub mode: SessionMode,
    pub visitor_profile_id: Option<String>,
    /// Result of the connectivity probe, independent of `mode`.
    pub connected: bool,
    pub epoch: SessionEpoch,
}

impl ConversationSession {
    pub fn is_persisted(&self) -> bool {
        self.mode == SessionMode::Persisted
    }
}
