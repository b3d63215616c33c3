//! Lead scoring and escalation tracking.
//!
//! The score is whatever the backend last asserted, never accumulated
//! locally. Escalation is a one-way latch for the life of a session.

use parley_core::types::LeadState;

const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeadTracker {
    state: LeadState,
}

impl LeadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LeadState {
        self.state
    }

    pub fn score(&self) -> u8 {
        self.state.score
    }

    pub fn is_escalated(&self) -> bool {
        self.state.escalated
    }

    /// Overwrite the score with a backend value, rounded into `0..=100`.
    /// Non-finite values are ignored.
    pub fn apply_score(&mut self, raw: f64) {
        if !raw.is_finite() {
            tracing::warn!(raw, "Ignoring non-finite lead score");
            return;
        }
        let clamped = raw.round().clamp(0.0, MAX_SCORE);
        if clamped != raw {
            tracing::debug!(raw, clamped, "Lead score adjusted into range");
        }
        self.state.score = clamped as u8;
    }

    /// Latch escalation. Returns `true` only on the false→true transition.
    pub fn escalate(&mut self) -> bool {
        if self.state.escalated {
            return false;
        }
        self.state.escalated = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_absolute() {
        let mut lead = LeadTracker::new();
        lead.apply_score(40.0);
        lead.apply_score(73.0);
        assert_eq!(lead.score(), 73);
        lead.apply_score(10.0);
        assert_eq!(lead.score(), 10);
    }

    #[test]
    fn test_score_clamped() {
        let mut lead = LeadTracker::new();
        lead.apply_score(250.0);
        assert_eq!(lead.score(), 100);
        lead.apply_score(-5.0);
        assert_eq!(lead.score(), 0);
    }

    #[test]
    fn test_score_rounded() {
        let mut lead = LeadTracker::new();
        lead.apply_score(72.6);
        assert_eq!(lead.score(), 73);
    }

    #[test]
    fn test_non_finite_score_ignored() {
        let mut lead = LeadTracker::new();
        lead.apply_score(55.0);
        lead.apply_score(f64::NAN);
        lead.apply_score(f64::INFINITY);
        assert_eq!(lead.score(), 55);
    }

    #[test]
    fn test_escalation_latch() {
        let mut lead = LeadTracker::new();
        assert!(!lead.is_escalated());
        assert!(lead.escalate());
        assert!(!lead.escalate());
        assert!(lead.is_escalated());
    }
}
