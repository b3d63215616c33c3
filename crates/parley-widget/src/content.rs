//! Fixed conversational content.
//!
//! Everything the engine says on its own behalf, as opposed to text that
//! comes from the inference service or the widget configuration.

use parley_core::config::ContactConfig;
use parley_core::types::QuickAction;

/// Quick-action value that resets the session.
pub const ACTION_RETRY: &str = "retry";
/// Quick-action value that dials the contact phone number.
pub const ACTION_CALL: &str = "call";
/// Quick-action value that opens a mail composer.
pub const ACTION_EMAIL: &str = "email";
/// Quick-action value that asks for a human.
pub const ACTION_HUMAN: &str = "human";

/// Text sent on the visitor's behalf when they pick the human quick action.
pub const HUMAN_REQUEST_PHRASE: &str = "I'd like to speak with a human.";

/// Welcome used when initialization itself failed.
pub const ERROR_WELCOME: &str = "Hi! How can I help you today?";

/// System announcement appended when the backend hands the visitor off.
pub const HANDOFF_ANNOUNCEMENT: &str =
    "You've been connected with a member of our team. They'll reply here shortly.";

/// Apology shown when the inference service cannot answer.
pub fn fallback_message(contact: &ContactConfig) -> String {
    format!(
        "I'm sorry, I'm having trouble responding right now. Please call us at {} or email {} and our team will be happy to help.",
        contact.phone, contact.email
    )
}

/// Actions offered after an inference failure.
pub fn recovery_quick_actions() -> Vec<QuickAction> {
    vec![
        QuickAction::new("📞", "Call Us", ACTION_CALL),
        QuickAction::new("✉️", "Email Us", ACTION_EMAIL),
        QuickAction::new("🔄", "Try Again", ACTION_RETRY),
    ]
}

/// Reduced set offered when initialization failed outright.
pub fn error_quick_actions() -> Vec<QuickAction> {
    vec![
        QuickAction::new("📞", "Call Us", ACTION_CALL),
        QuickAction::new("🔄", "Try Again", ACTION_RETRY),
    ]
}
