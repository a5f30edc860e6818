//! REST collaborator
//!
//! The engine only talks to the backend through [`SessionApi`], so tests can
//! swap in an in-memory implementation.

use async_trait::async_trait;
use legion_protocol::{Message, SessionInfo};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// One page of message history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total_count: usize,
    pub has_more: bool,
}

#[async_trait]
pub trait SessionApi: Send + Sync + 'static {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>>;
    async fn get_session(&self, session_id: &str) -> Result<SessionInfo>;
    async fn start_session(&self, session_id: &str) -> Result<SessionInfo>;
    async fn get_messages(&self, session_id: &str, limit: usize, offset: usize)
        -> Result<MessagePage>;
}

// ---------------------------------------------------------------------------
// Response envelopes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SessionListEnvelope {
    #[serde(default)]
    sessions: Vec<Value>,
}

#[derive(Deserialize)]
struct SessionEnvelope {
    session: SessionInfo,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    total_count: Option<usize>,
    #[serde(default)]
    has_more: bool,
}

/// Decode entries one by one; undecodable ones are logged and dropped.
pub(crate) fn decode_lenient<T>(kind: &'static str, raw: Vec<Value>) -> Vec<T>
where
    T: serde::de::DeserializeOwned,
{
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value.clone()) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(
                    component = "api",
                    event = "api.entry_skipped",
                    kind,
                    error = %e,
                    preview = %preview(&value.to_string()),
                    "Skipping undecodable entry"
                );
                None
            }
        })
        .collect()
}

/// First 200 chars of a payload for log lines
pub(crate) fn preview(raw: &str) -> String {
    const MAX: usize = 200;
    match raw.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &raw[..cut]),
        None => raw.to_string(),
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config.api_base().to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    fn session_url(&self, session_id: &str, suffix: &str) -> String {
        format!(
            "{}/api/sessions/{}{}",
            self.base_url,
            urlencoding::encode(session_id),
            suffix
        )
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::from_response(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SessionApi for HttpApi {
    async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let url = format!("{}/api/sessions", self.base_url);
        let response = self.client.get(&url).send().await?;
        let envelope: SessionListEnvelope = self.read_json(response).await?;
        Ok(decode_lenient("session", envelope.sessions))
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionInfo> {
        let response = self
            .client
            .get(self.session_url(session_id, ""))
            .send()
            .await?;
        let envelope: SessionEnvelope = self.read_json(response).await?;
        Ok(envelope.session)
    }

    async fn start_session(&self, session_id: &str) -> Result<SessionInfo> {
        debug!(
            component = "api",
            event = "api.start_session",
            session_id = %session_id,
            "Starting session"
        );
        let response = self
            .client
            .post(self.session_url(session_id, "/start"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let envelope: SessionEnvelope = self.read_json(response).await?;
        Ok(envelope.session)
    }

    async fn get_messages(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<MessagePage> {
        let response = self
            .client
            .get(self.session_url(session_id, "/messages"))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        let envelope: MessagesEnvelope = self.read_json(response).await?;
        let fetched = envelope.messages.len();
        let messages = decode_lenient("message", envelope.messages);
        Ok(MessagePage {
            total_count: envelope.total_count.unwrap_or(offset + fetched),
            has_more: envelope.has_more,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_decode_skips_bad_entries() {
        let raw = vec![
            json!({"message_id": "m1", "type": "user", "content": "hi", "timestamp": 1}),
            json!({"type": "user"}),
            json!("garbage"),
            json!({"id": "m2", "type": "assistant"}),
        ];
        let messages: Vec<Message> = decode_lenient("message", raw);
        let ids: Vec<_> = messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[test]
    fn session_ids_are_path_encoded() {
        let api = HttpApi::new(&ClientConfig {
            base_url: "http://localhost:8000/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            api.session_url("a b/c", "/messages"),
            "http://localhost:8000/api/sessions/a%20b%2Fc/messages"
        );
    }

    #[test]
    fn non_http_base_is_rejected() {
        let err = HttpApi::new(&ClientConfig {
            base_url: "ftp://example".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }

    #[test]
    fn preview_truncates_long_payloads() {
        let long = "x".repeat(500);
        let short = preview(&long);
        assert_eq!(short.chars().count(), 201);
        assert_eq!(preview("short"), "short");
    }
}
