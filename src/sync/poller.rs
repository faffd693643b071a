use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::api::client::SupportBackend;
use crate::sync::store::{lock_store, Origin, SharedStore};
use crate::sync::{merge_and_announce, SessionUpdate};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Fixed-cadence "new since cursor" loop for one conversation.
///
/// Failures are logged and retried on the next tick. There is no backoff;
/// the push channel is the primary path and this is only a safety net.
#[derive(Debug)]
pub struct Poller {
    conversation_id: String,
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn start<B: SupportBackend>(
        backend: Arc<B>,
        store: SharedStore,
        updates: broadcast::Sender<SessionUpdate>,
        conversation_id: &str,
        every: Duration,
    ) -> Self {
        let every = every.max(MIN_POLL_INTERVAL);
        let id = conversation_id.to_string();
        let handle = tokio::spawn({
            let id = id.clone();
            async move {
                let mut ticker = interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    poll_once(backend.as_ref(), &store, &updates, &id).await;
                }
            }
        });
        log::debug!("Polling conversation {} every {:?}", id, every);
        Self {
            conversation_id: id,
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        // Drop does the abort.
        log::debug!("Stopped polling conversation {}", self.conversation_id);
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One tick: cursor, fetch, merge. Returns how many messages were appended.
pub async fn poll_once<B: SupportBackend>(
    backend: &B,
    store: &SharedStore,
    updates: &broadcast::Sender<SessionUpdate>,
    conversation_id: &str,
) -> usize {
    let since = lock_store(store).poll_cursor(conversation_id);
    let attempted_at = Utc::now();
    let result = backend.messages_since(conversation_id, since).await;
    lock_store(store).record_poll_attempt(conversation_id, attempted_at);

    match result {
        Ok(payloads) => {
            merge_and_announce(store, updates, conversation_id, &payloads, Origin::Poll)
                .appended
                .len()
        }
        Err(e) => {
            log::warn!("Poll for conversation {} failed: {}", conversation_id, e);
            0
        }
    }
}
