//! Message reconciliation for the support inbox.
//!
//! Messages reach the client twice over: through the push channel and through
//! the polling fallback. Both feed [`store::ConversationStore::merge_incoming`],
//! which formats, de-duplicates and re-sorts, so the order in which the two
//! paths deliver does not change the final list.

pub mod bus;
pub mod cursor;
pub mod dedup;
pub mod formatter;
pub mod poller;
pub mod push;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::api::models::Message;
use crate::sync::store::{lock_store, MergeReport, Origin, SharedStore};

/// Messages that just became visible in a conversation.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub conversation_id: String,
    pub origin: Origin,
    pub appended: Vec<Message>,
}

pub(crate) fn merge_and_announce(
    store: &SharedStore,
    updates: &broadcast::Sender<SessionUpdate>,
    conversation_id: &str,
    payloads: &[Value],
    origin: Origin,
) -> MergeReport {
    if payloads.is_empty() {
        return MergeReport::default();
    }
    let report = lock_store(store).merge_incoming(conversation_id, payloads, origin);
    if !report.is_empty() {
        let _ = updates.send(SessionUpdate {
            conversation_id: conversation_id.to_string(),
            origin,
            appended: report.appended.clone(),
        });
    }
    report
}
