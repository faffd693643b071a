use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::api::client::SupportBackend;
use crate::api::models::{Conversation, Message};
use crate::error::InboxResult;
use crate::sync::bus::{EventBus, InboxEnvelope};
use crate::sync::poller::{Poller, DEFAULT_POLL_INTERVAL};
use crate::sync::push::PushConnection;
use crate::sync::store::{lock_store, MergeReport, Origin, SharedStore};
use crate::sync::{merge_and_announce, SessionUpdate};

const UPDATE_BUFFER_CAPACITY: usize = 64;

struct ActiveConversation {
    id: String,
    poller: Poller,
    listener: JoinHandle<()>,
}

/// The conversation currently on screen plus everything keeping it fresh.
///
/// Only one conversation is active at a time. Opening another one tears down
/// the previous poller, push subscription and bus listener first.
pub struct InboxSession<B: SupportBackend> {
    backend: Arc<B>,
    store: SharedStore,
    bus: Arc<EventBus>,
    push: Option<PushConnection>,
    updates: broadcast::Sender<SessionUpdate>,
    poll_interval: Duration,
    active: Option<ActiveConversation>,
}

impl<B: SupportBackend> InboxSession<B> {
    pub fn new(backend: Arc<B>, store: SharedStore) -> Self {
        let (updates, _rx) = broadcast::channel(UPDATE_BUFFER_CAPACITY);
        Self {
            backend,
            store,
            bus: Arc::new(EventBus::default()),
            push: None,
            updates,
            poll_interval: DEFAULT_POLL_INTERVAL,
            active: None,
        }
    }

    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.id.as_str())
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        lock_store(&self.store).messages(conversation_id).to_vec()
    }

    /// Connects the push channel and hands it to the session.
    pub async fn attach_push(&mut self, mut push: PushConnection) -> InboxResult<()> {
        push.connect(self.bus.clone()).await?;
        if let Some(active) = &self.active {
            push.subscribe(&active.id)?;
        }
        self.push = Some(push);
        Ok(())
    }

    pub fn detach_push(&mut self) -> Option<PushConnection> {
        let mut push = self.push.take()?;
        push.disconnect();
        Some(push)
    }

    pub fn push_connected(&self) -> bool {
        self.push.as_ref().is_some_and(PushConnection::is_connected)
    }

    /// Subscribes to render updates, then opens `conversation`.
    ///
    /// The receiver exists before the poller and push listener start, so
    /// nothing they merge is missed. The first update carries the history.
    pub async fn follow(
        &mut self,
        conversation: Conversation,
    ) -> InboxResult<broadcast::Receiver<SessionUpdate>> {
        let updates = self.subscribe_updates();
        self.open(conversation).await?;
        Ok(updates)
    }

    /// Makes `conversation` the active one: history, mark-read, push, polling.
    pub async fn open(&mut self, conversation: Conversation) -> InboxResult<MergeReport> {
        self.close();

        let id = conversation.id.clone();
        lock_store(&self.store).upsert_conversation(conversation);

        let history = self.backend.conversation_messages(&id).await?;
        let report = self.merge(&id, &history, Origin::History);

        match self.backend.mark_read(&id).await {
            Ok(()) => lock_store(&self.store).mark_read_locally(&id),
            Err(e) => log::warn!("Could not mark conversation {} read: {}", id, e),
        }
        lock_store(&self.store).set_viewing(Some(&id));

        let listener = spawn_listener(
            &id,
            self.bus.subscribe_conversation(&id),
            self.backend.clone(),
            self.store.clone(),
            self.updates.clone(),
        );
        if let Some(push) = &self.push {
            if let Err(e) = push.subscribe(&id) {
                log::warn!("Push subscription for {} failed, relying on polling: {}", id, e);
            }
        }
        let poller = Poller::start(
            self.backend.clone(),
            self.store.clone(),
            self.updates.clone(),
            &id,
            self.poll_interval,
        );

        log::info!("Opened conversation {} ({} message(s))", id, report.appended.len());
        self.active = Some(ActiveConversation {
            id,
            poller,
            listener,
        });
        Ok(report)
    }

    pub fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.poller.stop();
        active.listener.abort();
        if let Some(push) = &self.push {
            push.unsubscribe(&active.id);
        }
        self.bus.remove_conversation(&active.id);
        lock_store(&self.store).set_viewing(None);
        log::info!("Closed conversation {}", active.id);
    }

    /// Reconciles payloads from any other source (e.g. a reply the admin just sent).
    pub fn merge(&self, conversation_id: &str, payloads: &[Value], origin: Origin) -> MergeReport {
        merge_and_announce(&self.store, &self.updates, conversation_id, payloads, origin)
    }
}

impl<B: SupportBackend> Drop for InboxSession<B> {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_listener<B: SupportBackend>(
    conversation_id: &str,
    mut events: broadcast::Receiver<InboxEnvelope>,
    backend: Arc<B>,
    store: SharedStore,
    updates: broadcast::Sender<SessionUpdate>,
) -> JoinHandle<()> {
    let conversation_id = conversation_id.to_string();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => {
                    merge_and_announce(
                        &store,
                        &updates,
                        &envelope.conversation_id,
                        std::slice::from_ref(&envelope.payload),
                        envelope.origin,
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Listener lagged by {} push event(s), reloading", skipped);
                    // Newer events move the poll cursor past the skipped ones.
                    resync(backend.as_ref(), &store, &updates, &conversation_id).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Re-merges the full history after events were dropped on the way in.
async fn resync<B: SupportBackend>(
    backend: &B,
    store: &SharedStore,
    updates: &broadcast::Sender<SessionUpdate>,
    conversation_id: &str,
) {
    match backend.conversation_messages(conversation_id).await {
        Ok(payloads) => {
            let report = merge_and_announce(store, updates, conversation_id, &payloads, Origin::Poll);
            log::info!(
                "Reloaded conversation {}: {} message(s) recovered",
                conversation_id,
                report.appended.len()
            );
        }
        Err(e) => log::warn!("Reload of conversation {} failed: {}", conversation_id, e),
    }
}
