use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::api::models::{Conversation, Message};
use crate::sync::cursor::TimestampCursor;
use crate::sync::dedup::DedupMatcher;
use crate::sync::formatter::format_message;

/// Where a batch of payloads came from. Only used for logging and unread accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Push,
    Poll,
    History,
    Sent,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
            Self::History => "history",
            Self::Sent => "sent",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub appended: Vec<Message>,
    pub duplicates: usize,
    pub rejected: usize,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.appended.is_empty()
    }
}

#[derive(Debug, Default)]
struct Thread {
    messages: Vec<Message>,
    cursor: TimestampCursor,
}

pub type SharedStore = Arc<Mutex<ConversationStore>>;

/// Messages per conversation, kept de-duplicated and sorted by timestamp.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
    threads: HashMap<String, Thread>,
    matcher: DedupMatcher,
    viewing: Option<String>,
}

pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, ConversationStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConversationStore {
    pub fn new(matcher: DedupMatcher) -> Self {
        Self {
            matcher,
            ..Self::default()
        }
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    /// Most recently updated first.
    pub fn conversations(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.values().collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.threads
            .get(conversation_id)
            .map(|t| t.messages.as_slice())
            .unwrap_or(&[])
    }

    /// The single entry point every source (push, poll, history, replies) goes through.
    pub fn merge_incoming(
        &mut self,
        conversation_id: &str,
        payloads: &[Value],
        origin: Origin,
    ) -> MergeReport {
        let conversation = self
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::placeholder(conversation_id));
        let thread = self.threads.entry(conversation_id.to_string()).or_default();
        let mut report = MergeReport::default();

        for raw in payloads {
            let message = match format_message(raw, conversation) {
                Ok(message) => message,
                Err(e) => {
                    log::warn!(
                        "Dropping {} payload for conversation {}: {}",
                        origin.as_str(),
                        conversation_id,
                        e
                    );
                    report.rejected += 1;
                    continue;
                }
            };
            if self.matcher.is_duplicate(&message, &thread.messages) {
                log::trace!("Duplicate {} message {} ignored", origin.as_str(), message.id);
                report.duplicates += 1;
                continue;
            }
            thread.messages.push(message.clone());
            report.appended.push(message);
        }

        if report.appended.is_empty() {
            return report;
        }

        thread.messages.sort_by_key(|m| m.timestamp);

        if let Some(newest) = thread.messages.last() {
            conversation.last_message = Some(newest.text.clone());
            conversation.updated_at = conversation.updated_at.max(newest.timestamp);
        }
        let on_screen = self.viewing.as_deref() == Some(conversation_id);
        if matches!(origin, Origin::Push | Origin::Poll) && !on_screen {
            let unread = report
                .appended
                .iter()
                .filter(|m| !m.read && !m.sender.is_admin())
                .count();
            conversation.unread_count = conversation
                .unread_count
                .saturating_add(u32::try_from(unread).unwrap_or(u32::MAX));
        }
        log::debug!(
            "Merged {} {} message(s) into {} ({} duplicate, {} rejected)",
            report.appended.len(),
            origin.as_str(),
            conversation_id,
            report.duplicates,
            report.rejected
        );
        report
    }

    pub fn poll_cursor(&self, conversation_id: &str) -> DateTime<Utc> {
        self.threads
            .get(conversation_id)
            .map(|t| t.cursor.since(&t.messages))
            .unwrap_or_else(|| TimestampCursor::default().since(&[]))
    }

    pub fn record_poll_attempt(&mut self, conversation_id: &str, at: DateTime<Utc>) {
        self.threads
            .entry(conversation_id.to_string())
            .or_default()
            .cursor
            .record_attempt(at);
    }

    pub fn mark_read_locally(&mut self, conversation_id: &str) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.unread_count = 0;
        }
        if let Some(thread) = self.threads.get_mut(conversation_id) {
            for message in &mut thread.messages {
                message.read = true;
            }
        }
    }

    /// The conversation on screen; its live arrivals are not counted as unread.
    pub fn set_viewing(&mut self, conversation_id: Option<&str>) {
        self.viewing = conversation_id.map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Participant, SenderRole};
    use crate::utils::epoch;
    use chrono::TimeZone;
    use serde_json::json;

    const T: i64 = 1_700_000_000_000;

    fn store() -> ConversationStore {
        let mut store = ConversationStore::default();
        let mut conv = Conversation::placeholder("c1");
        conv.participants = vec![Participant::new("ana-id", "Ana", SenderRole::Client)];
        conv.updated_at = epoch();
        store.upsert_conversation(conv);
        store
    }

    fn flat(id: &str, text: &str, sender: &str, ts: i64) -> Value {
        json!({"id": id, "senderId": format!("{sender}-id"), "senderName": sender, "isAdmin": false, "message": text, "timestamp": ts})
    }

    fn ids(store: &ConversationStore) -> Vec<String> {
        store.messages("c1").iter().map(|m| m.id.clone()).collect()
    }

    fn assert_sorted(messages: &[Message]) {
        assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn poll_then_push_of_the_same_message_keeps_one_entry() {
        let mut store = store();
        let polled = store.merge_incoming("c1", &[json!({"id": "m1", "message": "Hola", "senderName": "Ana", "timestamp": T})], Origin::Poll);
        let pushed = store.merge_incoming("c1", &[flat("srv-9", "Hola", "Ana", T + 1000)], Origin::Push);

        assert_eq!(polled.appended.len(), 1);
        assert!(pushed.is_empty());
        assert_eq!(pushed.duplicates, 1);
        assert_eq!(store.messages("c1").len(), 1);
    }

    #[test]
    fn list_is_sorted_by_timestamp_not_arrival() {
        let mut store = store();
        store.merge_incoming("c1", &[flat("m3", "tres", "Ana", T + 3000)], Origin::Push);
        store.merge_incoming(
            "c1",
            &[flat("m1", "uno", "Ana", T + 1000), flat("m2", "dos", "Ana", T + 2000)],
            Origin::Poll,
        );

        assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);
        assert_sorted(store.messages("c1"));
    }

    #[test]
    fn interleavings_converge_to_the_same_list() {
        let push = vec![
            flat("srv-1", "Hola", "Ana", T + 900),
            flat("srv-2", "Mi camión no arranca", "Ana", T + 20_000),
        ];
        let poll = vec![
            flat("p-1", "Hola", "Ana", T),
            flat("p-2", "Mi camión no arranca", "Ana", T + 19_500),
            flat("p-3", "Estoy en la ruta 5", "Ana", T + 40_000),
        ];

        let mut push_first = store();
        push_first.merge_incoming("c1", &push, Origin::Push);
        push_first.merge_incoming("c1", &poll, Origin::Poll);

        let mut poll_first = store();
        poll_first.merge_incoming("c1", &poll, Origin::Poll);
        poll_first.merge_incoming("c1", &push, Origin::Push);

        let mut one_by_one = store();
        for (p, q) in push.iter().zip(poll.iter()) {
            one_by_one.merge_incoming("c1", std::slice::from_ref(q), Origin::Poll);
            one_by_one.merge_incoming("c1", std::slice::from_ref(p), Origin::Push);
        }
        one_by_one.merge_incoming("c1", &poll[2..], Origin::Poll);

        for store in [&push_first, &poll_first, &one_by_one] {
            let texts: Vec<&str> = store.messages("c1").iter().map(|m| m.text.as_str()).collect();
            assert_eq!(texts, vec!["Hola", "Mi camión no arranca", "Estoy en la ruta 5"]);
            assert_sorted(store.messages("c1"));
        }
    }

    #[test]
    fn identical_texts_far_apart_are_both_kept() {
        let mut store = store();
        store.merge_incoming(
            "c1",
            &[flat("a", "Ok", "Ana", T), flat("b", "Ok", "Ana", T + 5001)],
            Origin::Poll,
        );
        assert_eq!(store.messages("c1").len(), 2);

        store.merge_incoming("c1", &[flat("c", "Ok", "Ana", T + 9_999)], Origin::Push);
        assert_eq!(store.messages("c1").len(), 2);
    }

    #[test]
    fn duplicates_inside_one_batch_are_collapsed() {
        let mut store = store();
        let report = store.merge_incoming(
            "c1",
            &[flat("m1", "Hola", "Ana", T), flat("m1", "Hola", "Ana", T)],
            Origin::History,
        );
        assert_eq!(report.appended.len(), 1);
        assert_eq!(report.duplicates, 1);
    }

    #[test]
    fn empty_payload_is_rejected_without_panicking() {
        let mut store = store();
        let report = store.merge_incoming("c1", &[json!({}), json!(null)], Origin::Push);
        assert_eq!(report.rejected, 2);
        assert!(store.messages("c1").is_empty());
    }

    #[test]
    fn summary_tracks_newest_message_and_unread() {
        let mut store = store();
        store.merge_incoming("c1", &[flat("m1", "uno", "Ana", T), flat("m2", "dos", "Ana", T + 10)], Origin::Push);
        store.merge_incoming(
            "c1",
            &[json!({"id": "a1", "senderId": "adm", "isAdmin": true, "message": "respuesta", "timestamp": T + 20})],
            Origin::Poll,
        );

        let conv = store.conversation("c1").unwrap();
        assert_eq!(conv.last_message.as_deref(), Some("respuesta"));
        assert_eq!(conv.updated_at, Utc.timestamp_millis_opt(T + 20).unwrap());
        assert_eq!(conv.unread_count, 2);

        store.mark_read_locally("c1");
        assert_eq!(store.conversation("c1").unwrap().unread_count, 0);
        assert!(store.messages("c1").iter().all(|m| m.read));
    }

    #[test]
    fn arrivals_while_viewing_are_not_unread() {
        let mut store = store();
        store.set_viewing(Some("c1"));
        store.merge_incoming("c1", &[flat("m1", "Hola", "Ana", T)], Origin::Push);
        assert_eq!(store.conversation("c1").unwrap().unread_count, 0);

        store.set_viewing(None);
        store.merge_incoming("c1", &[flat("m2", "¿Hola?", "Ana", T + 10_000)], Origin::Poll);
        assert_eq!(store.conversation("c1").unwrap().unread_count, 1);
    }

    #[test]
    fn history_load_does_not_count_as_unread() {
        let mut store = store();
        store.merge_incoming("c1", &[flat("m1", "uno", "Ana", T)], Origin::History);
        assert_eq!(store.conversation("c1").unwrap().unread_count, 0);
    }

    #[test]
    fn unknown_conversation_gets_a_placeholder() {
        let mut store = ConversationStore::default();
        store.merge_incoming("c9", &[flat("m1", "Hola", "Ana", T)], Origin::Push);
        assert!(store.conversation("c9").is_some());
        assert_eq!(store.messages("c9")[0].conversation_id, "c9");
    }

    #[test]
    fn cursor_follows_newest_message_then_attempts() {
        let mut store = store();
        assert_eq!(store.poll_cursor("c1"), epoch());

        let attempt = Utc.timestamp_millis_opt(T - 50_000).unwrap();
        store.record_poll_attempt("c1", attempt);
        assert_eq!(store.poll_cursor("c1"), attempt);

        store.merge_incoming("c1", &[flat("m1", "Hola", "Ana", T)], Origin::Poll);
        assert_eq!(store.poll_cursor("c1"), Utc.timestamp_millis_opt(T).unwrap());
    }

    #[test]
    fn conversations_are_listed_newest_first() {
        let mut store = store();
        let mut other = Conversation::placeholder("c2");
        other.updated_at = Utc.timestamp_millis_opt(T).unwrap();
        store.upsert_conversation(other);

        let order: Vec<&str> = store.conversations().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["c2", "c1"]);
    }
}
