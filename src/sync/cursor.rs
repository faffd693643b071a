use chrono::{DateTime, Utc};

use crate::api::models::Message;
use crate::utils::epoch;

/// Lower bound for the next "new since" poll of one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampCursor {
    last_attempt: Option<DateTime<Utc>>,
}

impl TimestampCursor {
    /// Newest held message, else the last poll attempt, else the epoch.
    pub fn since(&self, messages: &[Message]) -> DateTime<Utc> {
        messages
            .iter()
            .map(|m| m.timestamp)
            .max()
            .or(self.last_attempt)
            .unwrap_or_else(epoch)
    }

    /// Advances even when the request failed, so a bad window is not retried forever.
    pub fn record_attempt(&mut self, at: DateTime<Utc>) {
        self.last_attempt = Some(self.last_attempt.map_or(at, |prev| prev.max(at)));
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }
}
