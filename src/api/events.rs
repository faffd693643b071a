//! Push-channel frames and the adapter that maps the backend's event names
//! onto conversation topics.
//!
//! The backend announces the same new message under several names: a generic
//! `new_message`, a conversation-scoped `conversation:{id}:message` and a
//! manually keyed `support_message_{id}` channel. Any one of them is enough;
//! the copies are absorbed by dedup downstream.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::utils::id_field;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingEvent {
    #[serde(rename = "event", alias = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl IncomingEvent {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

const GENERIC_EVENTS: [&str; 3] = ["new_message", "newMessage", "message"];
const SCOPED_PREFIX: &str = "conversation:";
const SCOPED_SUFFIX: &str = ":message";
const KEYED_PREFIX: &str = "support_message_";

/// Which backend naming scheme an event arrived under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Generic,
    ConversationScoped,
    ManuallyKeyed,
}

/// Conversation id and message payload extracted from a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    pub conversation_id: String,
    pub kind: ChannelKind,
    pub payload: Value,
}

pub fn route(event: &IncomingEvent, subscribed: &HashSet<String>) -> Option<RoutedMessage> {
    let name = event.event_type.as_str();
    let (kind, conversation_id) = if GENERIC_EVENTS.contains(&name) {
        let id = id_field(&event.data, &["conversationId", "conversation_id"])
            .or_else(|| {
                event
                    .data
                    .get("message")
                    .filter(|m| m.is_object())
                    .and_then(|m| id_field(m, &["conversationId", "conversation_id"]))
            })?;
        (ChannelKind::Generic, id)
    } else if let Some(id) = name
        .strip_prefix(SCOPED_PREFIX)
        .and_then(|rest| rest.strip_suffix(SCOPED_SUFFIX))
    {
        (ChannelKind::ConversationScoped, id.to_string())
    } else if let Some(id) = name.strip_prefix(KEYED_PREFIX) {
        (ChannelKind::ManuallyKeyed, id.to_string())
    } else {
        return None;
    };

    if conversation_id.is_empty() || !subscribed.contains(&conversation_id) {
        return None;
    }

    // Some emitters wrap the message: {"conversationId": .., "message": {..}}
    let payload = match event.data.get("message") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => event.data.clone(),
    };

    Some(RoutedMessage {
        conversation_id,
        kind,
        payload,
    })
}

pub fn join_frame(conversation_id: &str) -> String {
    json!({"event": "join_conversation", "data": {"conversationId": conversation_id}}).to_string()
}

pub fn leave_frame(conversation_id: &str) -> String {
    json!({"event": "leave_conversation", "data": {"conversationId": conversation_id}}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribed(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn event(name: &str, data: Value) -> IncomingEvent {
        IncomingEvent {
            event_type: name.to_string(),
            data,
        }
    }

    #[test]
    fn parses_event_and_type_keys() {
        let a = IncomingEvent::parse(r#"{"event":"new_message","data":{"id":"1"}}"#).unwrap();
        let b = IncomingEvent::parse(r#"{"type":"new_message"}"#).unwrap();
        assert_eq!(a.event_type, "new_message");
        assert_eq!(b.data, Value::Null);
        assert!(IncomingEvent::parse("not json").is_none());
    }

    #[test]
    fn all_three_naming_schemes_route_to_the_same_conversation() {
        let subs = subscribed(&["c1"]);
        let payload = json!({"id": "srv-9", "senderId": "u", "message": "Hola", "conversationId": "c1"});

        let generic = route(&event("new_message", payload.clone()), &subs).unwrap();
        let scoped = route(&event("conversation:c1:message", payload.clone()), &subs).unwrap();
        let keyed = route(&event("support_message_c1", payload.clone()), &subs).unwrap();

        assert_eq!(generic.kind, ChannelKind::Generic);
        assert_eq!(scoped.kind, ChannelKind::ConversationScoped);
        assert_eq!(keyed.kind, ChannelKind::ManuallyKeyed);
        for routed in [generic, scoped, keyed] {
            assert_eq!(routed.conversation_id, "c1");
            assert_eq!(routed.payload, payload);
        }
    }

    #[test]
    fn wrapped_message_is_unwrapped() {
        let subs = subscribed(&["c1"]);
        let data = json!({"conversationId": "c1", "message": {"id": "m1", "senderId": "u", "message": "Hola"}});
        let routed = route(&event("newMessage", data), &subs).unwrap();
        assert_eq!(routed.payload["id"], "m1");
    }

    #[test]
    fn unsubscribed_or_unknown_events_are_dropped() {
        let subs = subscribed(&["c1"]);
        let payload = json!({"conversationId": "c2", "message": "Hola"});

        assert!(route(&event("new_message", payload.clone()), &subs).is_none());
        assert!(route(&event("conversation:c2:message", payload.clone()), &subs).is_none());
        assert!(route(&event("typing", json!({"conversationId": "c1"})), &subs).is_none());
        assert!(route(&event("new_message", json!({"message": "sin id"})), &subs).is_none());
    }

    #[test]
    fn join_and_leave_frames_name_the_conversation() {
        let join: Value = serde_json::from_str(&join_frame("c1")).unwrap();
        let leave: Value = serde_json::from_str(&leave_frame("c1")).unwrap();
        assert_eq!(join["event"], "join_conversation");
        assert_eq!(leave["event"], "leave_conversation");
        assert_eq!(join["data"]["conversationId"], "c1");
    }
}
