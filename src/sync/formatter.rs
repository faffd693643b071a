//! Normalizes message payloads from the push channel and the REST endpoints.
//!
//! Two wire shapes are in circulation. The flat one
//! (`id`, `senderId`, `senderName`, `isAdmin`, `message`, `timestamp`) and the
//! nested one with `sender`/`recipient` objects. Both end up as a [`Message`].

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::api::models::{
    Attachment, Conversation, ConversationStatus, Message, Participant, Priority, SenderRole,
};
use crate::utils::{id_field, list_items, parse_timestamp, str_field};

pub const DEFAULT_SENDER_NAME: &str = "Usuario";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("payload is not a json object")]
    NotAnObject,
    #[error("unrecognized message shape (keys: {0})")]
    UnrecognizedShape(String),
}

pub fn format_message(raw: &Value, conversation: &Conversation) -> Result<Message, FormatError> {
    let obj = raw.as_object().ok_or(FormatError::NotAnObject)?;

    if obj.contains_key("id") && obj.contains_key("senderId") {
        return Ok(format_flat(raw, conversation));
    }
    if obj.get("sender").is_some_and(Value::is_object) || obj.contains_key("message") {
        return Ok(format_nested(raw, conversation));
    }

    let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
    Err(FormatError::UnrecognizedShape(keys.join(",")))
}

fn format_flat(raw: &Value, conversation: &Conversation) -> Message {
    let sender = flat_sender(raw, conversation);
    let recipient = counterpart(&sender, conversation);

    build(raw, conversation, id_field(raw, &["id"]), sender, recipient)
}

fn format_nested(raw: &Value, conversation: &Conversation) -> Message {
    let sender = match raw.get("sender").filter(|v| v.is_object()) {
        Some(sender) => participant_from(sender),
        None if raw.get("senderId").is_some() || raw.get("senderName").is_some() => {
            flat_sender(raw, conversation)
        }
        None if is_admin(raw) => Participant::support_admin(),
        None => conversation
            .customer()
            .cloned()
            .unwrap_or_else(Participant::unknown_client),
    };
    let recipient = raw
        .get("recipient")
        .filter(|v| v.is_object())
        .map(participant_from)
        .unwrap_or_else(|| counterpart(&sender, conversation));

    build(raw, conversation, id_field(raw, &["id", "_id"]), sender, recipient)
}

fn is_admin(raw: &Value) -> bool {
    raw.get("isAdmin").and_then(Value::as_bool).unwrap_or(false)
}

fn flat_sender(raw: &Value, conversation: &Conversation) -> Participant {
    let role = if is_admin(raw) {
        SenderRole::Admin
    } else {
        conversation
            .customer()
            .map(|c| c.role)
            .unwrap_or(SenderRole::Client)
    };
    Participant::new(
        id_field(raw, &["senderId"]).unwrap_or_default(),
        str_field(raw, &["senderName"]).unwrap_or(DEFAULT_SENDER_NAME),
        role,
    )
}

fn build(
    raw: &Value,
    conversation: &Conversation,
    id: Option<String>,
    sender: Participant,
    recipient: Participant,
) -> Message {
    let timestamp = ["timestamp", "createdAt", "created_at"]
        .iter()
        .filter_map(|k| raw.get(*k))
        .find_map(parse_timestamp)
        .unwrap_or_else(Utc::now);
    let id = id.unwrap_or_else(|| {
        format!("local-{}-{}", timestamp.timestamp_millis(), sender.id)
    });
    let text = str_field(raw, &["message", "text", "content", "body"])
        .unwrap_or_default()
        .to_string();
    let read = ["read", "isRead"]
        .iter()
        .filter_map(|k| raw.get(*k))
        .find_map(Value::as_bool)
        .unwrap_or(false);

    Message {
        id,
        conversation_id: conversation.id.clone(),
        subject: str_field(raw, &["subject"])
            .unwrap_or(conversation.title.as_str())
            .to_string(),
        text,
        sender,
        recipient,
        timestamp,
        attachments: attachments_from(raw),
        read,
        status: str_field(raw, &["status"])
            .and_then(|s| s.parse::<ConversationStatus>().ok())
            .unwrap_or(conversation.status),
        priority: str_field(raw, &["priority"])
            .and_then(|s| s.parse::<Priority>().ok())
            .unwrap_or(conversation.priority),
        category: str_field(raw, &["category"])
            .unwrap_or(conversation.category.as_str())
            .to_string(),
        source: str_field(raw, &["source"])
            .unwrap_or(conversation.source.as_str())
            .to_string(),
    }
}

/// Synthesized recipient: admins write to the customer, everybody else to support.
fn counterpart(sender: &Participant, conversation: &Conversation) -> Participant {
    if sender.is_admin() {
        conversation
            .customer()
            .cloned()
            .unwrap_or_else(Participant::unknown_client)
    } else {
        Participant::support_admin()
    }
}

pub(crate) fn participant_from(value: &Value) -> Participant {
    let role = str_field(value, &["role"])
        .map(SenderRole::from_wire)
        .unwrap_or_default();
    Participant {
        id: id_field(value, &["id", "_id"]).unwrap_or_default(),
        name: str_field(value, &["name", "displayName", "fullName"])
            .unwrap_or(DEFAULT_SENDER_NAME)
            .to_string(),
        role,
        user_type: str_field(value, &["userType"]).map(str::to_string),
        company: str_field(value, &["company", "companyName"]).map(str::to_string),
        avatar: str_field(value, &["avatar", "avatarUrl"]).map(str::to_string),
    }
}

fn attachments_from(raw: &Value) -> Vec<Attachment> {
    list_items(raw.get("attachments").unwrap_or(&Value::Null), &[])
        .iter()
        .filter_map(|a| {
            let url = str_field(a, &["url"])?;
            Some(Attachment {
                name: str_field(a, &["name", "filename"]).unwrap_or(url).to_string(),
                url: url.to_string(),
                mime_type: str_field(a, &["mimeType", "type"]).map(str::to_string),
                size: a.get("size").and_then(Value::as_u64),
            })
        })
        .collect()
}

/// Lenient parse of a conversation summary; `None` when it carries no id.
pub fn format_conversation(raw: &Value) -> Option<Conversation> {
    let id = id_field(raw, &["id", "_id"])?;
    let mut conversation = Conversation::placeholder(id);

    conversation.title = str_field(raw, &["title", "subject", "name"])
        .unwrap_or_default()
        .to_string();
    conversation.participants = raw
        .get("participants")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter(|p| p.is_object())
                .map(participant_from)
                .filter(|p| !p.id.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if conversation.participants.is_empty() {
        if let Some(user) = ["user", "client"]
            .iter()
            .filter_map(|k| raw.get(*k))
            .find(|v| v.is_object())
        {
            let user = participant_from(user);
            if !user.id.is_empty() {
                conversation.participants.push(user);
            }
        }
    }
    conversation.last_message = raw
        .get("lastMessage")
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => str_field(v, &["message", "text", "content"]).map(str::to_string),
            _ => None,
        });
    conversation.unread_count = raw
        .get("unreadCount")
        .and_then(Value::as_u64)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0);
    if let Some(status) = str_field(raw, &["status"]).and_then(|s| s.parse().ok()) {
        conversation.status = status;
    }
    if let Some(priority) = str_field(raw, &["priority"]).and_then(|s| s.parse().ok()) {
        conversation.priority = priority;
    }
    if let Some(category) = str_field(raw, &["category"]) {
        conversation.category = category.to_string();
    }
    if let Some(source) = str_field(raw, &["source"]) {
        conversation.source = source.to_string();
    }
    if let Some(created) = raw.get("createdAt").and_then(parse_timestamp) {
        conversation.created_at = created;
    }
    conversation.updated_at = raw
        .get("updatedAt")
        .and_then(parse_timestamp)
        .unwrap_or(conversation.created_at);

    Some(conversation)
}
