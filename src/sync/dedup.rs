use std::time::Duration;

use crate::api::models::Message;

/// Fuzzy-match window. Two identical texts from the same sender inside it are
/// collapsed into one, even when they were really sent twice.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupMatcher {
    window: Duration,
}

impl Default for DedupMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl DedupMatcher {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Same id, or same text and sender name strictly inside the window.
    pub fn is_same(&self, a: &Message, b: &Message) -> bool {
        if a.id == b.id {
            return true;
        }
        if a.text != b.text || a.sender.name != b.sender.name {
            return false;
        }
        let delta_ms = (a.timestamp - b.timestamp).num_milliseconds().unsigned_abs();
        u128::from(delta_ms) < self.window.as_millis()
    }

    pub fn is_duplicate(&self, candidate: &Message, existing: &[Message]) -> bool {
        existing.iter().any(|held| self.is_same(candidate, held))
    }
}
