//! In-memory backend used by the sync tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::api::client::SupportBackend;
use crate::error::{InboxError, InboxResult};

#[derive(Debug, Default)]
struct FakeState {
    history: HashMap<String, Vec<Value>>,
    since_queue: HashMap<String, VecDeque<Vec<Value>>>,
    failing: HashSet<String>,
    since_calls: Vec<(String, DateTime<Utc>)>,
    read_calls: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub(crate) fn set_history(&self, conversation_id: &str, payloads: Vec<Value>) {
        self.state.lock().unwrap().history.insert(conversation_id.into(), payloads);
    }

    pub(crate) fn queue_since(&self, conversation_id: &str, payloads: Vec<Value>) {
        self.state
            .lock()
            .unwrap()
            .since_queue
            .entry(conversation_id.into())
            .or_default()
            .push_back(payloads);
    }

    pub(crate) fn fail_next_since(&self, conversation_id: &str) {
        self.state.lock().unwrap().failing.insert(conversation_id.into());
    }

    pub(crate) fn since_calls(&self, conversation_id: &str) -> Vec<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap()
            .since_calls
            .iter()
            .filter(|(id, _)| id == conversation_id)
            .map(|(_, since)| *since)
            .collect()
    }

    pub(crate) fn read_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().read_calls.clone()
    }
}

impl SupportBackend for FakeBackend {
    async fn conversation_messages(&self, conversation_id: &str) -> InboxResult<Vec<Value>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .history
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn messages_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> InboxResult<Vec<Value>> {
        let mut state = self.state.lock().unwrap();
        state.since_calls.push((conversation_id.to_string(), since));
        if state.failing.remove(conversation_id) {
            return Err(InboxError::Status {
                status: 503,
                endpoint: format!("/support/conversations/{}/messages", conversation_id),
            });
        }
        Ok(state
            .since_queue
            .get_mut(conversation_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn mark_read(&self, conversation_id: &str) -> InboxResult<()> {
        self.state.lock().unwrap().read_calls.push(conversation_id.to_string());
        Ok(())
    }
}
