use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

use crate::api::models::{Conversation, ConversationStatus};
use crate::error::{InboxError, InboxResult};
use crate::sync::formatter::format_conversation;
use crate::utils::{list_items, normalize_url};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The calls the reconciliation loop needs from the backend.
pub trait SupportBackend: Send + Sync + 'static {
    fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = InboxResult<Vec<Value>>> + Send;

    fn messages_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = InboxResult<Vec<Value>>> + Send;

    fn mark_read(&self, conversation_id: &str) -> impl Future<Output = InboxResult<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> InboxResult<Self> {
        let base_url = normalize_url(base_url);
        if base_url.is_empty() {
            return Err(InboxError::Config("server url is empty".into()));
        }
        let http = HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", Self::base_api(&self.base_url), path)
    }

    fn conversation_endpoint(&self, conversation_id: &str, tail: &str) -> String {
        self.endpoint(&format!("/support/conversations/{}{}", conversation_id, tail))
    }

    fn with_auth(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(t) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req
    }

    async fn send_json(&self, req: reqwest::RequestBuilder, endpoint: &str) -> InboxResult<Value> {
        let resp = self.with_auth(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(InboxError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        let bytes = resp.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Exchanges admin credentials for a bearer token and keeps it on the client.
    pub async fn login(&mut self, email: &str, password: &str) -> InboxResult<String> {
        let endpoint = self.endpoint("/auth/login");
        let body = json!({"email": email, "password": password});
        let json = self.send_json(self.http.post(&endpoint).json(&body), &endpoint).await?;
        let token = ["token", "accessToken"]
            .iter()
            .filter_map(|k| json.get(*k).or_else(|| json.get("data").and_then(|d| d.get(*k))))
            .find_map(|v| v.as_str())
            .ok_or_else(|| InboxError::UnexpectedResponse("token not found in login response".into()))?
            .to_string();
        self.token = Some(token.clone());
        Ok(token)
    }

    pub async fn conversations(&self) -> InboxResult<Vec<Conversation>> {
        let endpoint = self.endpoint("/support/conversations");
        let json = self.send_json(self.http.get(&endpoint), &endpoint).await?;
        let items = list_items(&json, &["conversations", "data"]);
        let out: Vec<Conversation> = items.iter().filter_map(format_conversation).collect();
        if out.len() < items.len() {
            log::warn!("Skipped {} conversation(s) without an id", items.len() - out.len());
        }
        Ok(out)
    }

    pub async fn update_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> InboxResult<Option<Conversation>> {
        let endpoint = self.conversation_endpoint(conversation_id, "/status");
        let body = json!({"status": status.as_str()});
        let json = self.send_json(self.http.put(&endpoint).json(&body), &endpoint).await?;
        let item = json
            .get("conversation")
            .or_else(|| json.get("data"))
            .unwrap_or(&json);
        Ok(format_conversation(item))
    }

    /// Posts an admin reply and returns the created message payload.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        subject: Option<&str>,
    ) -> InboxResult<Value> {
        let endpoint = self.conversation_endpoint(conversation_id, "/messages");
        let mut body = json!({"message": text});
        if let Some(subject) = subject {
            body["subject"] = json!(subject);
        }
        let json = self.send_json(self.http.post(&endpoint).json(&body), &endpoint).await?;
        Ok(match json.get("message").or_else(|| json.get("data")) {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => json,
        })
    }
}

impl SupportBackend for ApiClient {
    async fn conversation_messages(&self, conversation_id: &str) -> InboxResult<Vec<Value>> {
        let endpoint = self.conversation_endpoint(conversation_id, "/messages");
        let json = self.send_json(self.http.get(&endpoint), &endpoint).await?;
        Ok(list_items(&json, &["messages", "data"]))
    }

    async fn messages_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> InboxResult<Vec<Value>> {
        let endpoint = self.conversation_endpoint(conversation_id, "/messages");
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let req = self.http.get(&endpoint).query(&[("since", since.as_str())]);
        let json = self.send_json(req, &endpoint).await?;
        Ok(list_items(&json, &["messages", "data"]))
    }

    async fn mark_read(&self, conversation_id: &str) -> InboxResult<()> {
        let endpoint = self.conversation_endpoint(conversation_id, "/read");
        self.send_json(self.http.put(&endpoint), &endpoint).await?;
        Ok(())
    }
}
