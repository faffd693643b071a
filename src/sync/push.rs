use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::api::events::{join_frame, leave_frame, route, IncomingEvent};
use crate::error::{InboxError, InboxResult};
use crate::sync::bus::EventBus;
use crate::sync::store::Origin;

type Subscriptions = Arc<RwLock<HashSet<String>>>;

/// Owned push-channel connection. Whoever holds it decides when it connects
/// and disconnects; dropping it tears the socket down.
#[derive(Debug)]
pub struct PushConnection {
    url: Url,
    subscriptions: Subscriptions,
    outgoing: Option<mpsc::UnboundedSender<WsMessage>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl PushConnection {
    pub fn new(mut url: Url, token: Option<&str>) -> Self {
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Self {
            url,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            outgoing: None,
            reader: None,
            writer: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.reader.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn connect(&mut self, bus: Arc<EventBus>) -> InboxResult<()> {
        self.disconnect();

        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        log::info!("Push channel connected to {}", self.url.host_str().unwrap_or("?"));
        let (mut sink, mut stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        self.writer = Some(tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    log::warn!("Push channel write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        }));

        let subscriptions = self.subscriptions.clone();
        let pong = tx.clone();
        self.reader = Some(tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => dispatch(&text, &subscriptions, &bus),
                    Ok(WsMessage::Ping(data)) => {
                        let _ = pong.send(WsMessage::Pong(data));
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("Push channel read failed: {}", e);
                        break;
                    }
                }
            }
            log::info!("Push channel closed");
        }));

        // Re-join anything subscribed before (re)connecting.
        let existing: Vec<String> = self.read_subscriptions().iter().cloned().collect();
        for conversation_id in existing {
            let _ = tx.send(WsMessage::Text(join_frame(&conversation_id)));
        }
        self.outgoing = Some(tx);
        Ok(())
    }

    pub fn subscribe(&self, conversation_id: &str) -> InboxResult<()> {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation_id.to_string());
        let tx = self.outgoing.as_ref().ok_or(InboxError::NotConnected)?;
        tx.send(WsMessage::Text(join_frame(conversation_id)))
            .map_err(|_| InboxError::NotConnected)?;
        log::info!("Subscribed to push events for conversation {}", conversation_id);
        Ok(())
    }

    pub fn unsubscribe(&self, conversation_id: &str) {
        let removed = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id);
        if removed {
            if let Some(tx) = &self.outgoing {
                let _ = tx.send(WsMessage::Text(leave_frame(conversation_id)));
            }
            log::debug!("Unsubscribed from conversation {}", conversation_id);
        }
    }

    pub fn is_subscribed(&self, conversation_id: &str) -> bool {
        self.read_subscriptions().contains(conversation_id)
    }

    pub fn disconnect(&mut self) {
        // Dropping the sender lets the writer flush a close frame and exit.
        self.outgoing = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
            log::info!("Push channel disconnected");
        }
        self.writer.take();
    }

    fn read_subscriptions(&self) -> std::sync::RwLockReadGuard<'_, HashSet<String>> {
        self.subscriptions.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn dispatch(text: &str, subscriptions: &Subscriptions, bus: &EventBus) {
    let Some(event) = IncomingEvent::parse(text) else {
        log::debug!("Ignoring non-event frame on push channel");
        return;
    };
    let routed = {
        let subs = subscriptions.read().unwrap_or_else(PoisonError::into_inner);
        route(&event, &subs)
    };
    match routed {
        Some(routed) => {
            log::trace!(
                "Push {:?} event {} for conversation {}",
                routed.kind,
                event.event_type,
                routed.conversation_id
            );
            bus.publish(&routed.conversation_id, Origin::Push, routed.payload);
        }
        None => log::trace!("Push event {} not routed", event.event_type),
    }
}
