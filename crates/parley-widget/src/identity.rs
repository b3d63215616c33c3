//! Visitor identity.
//!
//! One id per storage profile, generated once and reused by every later
//! session. Storage failures never surface: the visitor simply gets an id
//! that lasts for this process only.

use rand::distr::Alphanumeric;
use rand::Rng;

use parley_core::types::{Timestamp, VisitorIdentity};
use parley_storage::KeyValueStore;

/// Local-storage key holding the visitor id.
pub const VISITOR_ID_KEY: &str = "parley_visitor_id";

const SUFFIX_LEN: usize = 9;

pub struct VisitorIdentityManager;

impl VisitorIdentityManager {
    /// Read the stored visitor id, creating and storing one if absent.
    pub fn get_or_create(store: &dyn KeyValueStore) -> VisitorIdentity {
        match store.get(VISITOR_ID_KEY) {
            Ok(Some(existing)) if !existing.trim().is_empty() => {
                return VisitorIdentity {
                    visitor_id: existing,
                    persisted: true,
                };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Local storage unreadable, using session-scoped visitor id");
                return VisitorIdentity {
                    visitor_id: generate_visitor_id(),
                    persisted: false,
                };
            }
        }

        let visitor_id = generate_visitor_id();
        let persisted = match store.set(VISITOR_ID_KEY, &visitor_id) {
            Ok(()) => {
                tracing::info!(visitor_id = %visitor_id, "Created visitor id");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist visitor id, using it for this session only");
                false
            }
        };

        VisitorIdentity {
            visitor_id,
            persisted,
        }
    }
}

/// `visitor_<unix-millis>_<9 lowercase alphanumerics>`.
pub fn generate_visitor_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("visitor_{}_{}", Timestamp::now().0, suffix)
}
