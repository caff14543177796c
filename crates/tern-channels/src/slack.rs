//! Slack Web API transport: post a message, update it in place.

use async_trait::async_trait;
use serde_json::{json, Value};
use tern_core::config::SlackConfig;
use tern_core::error::TernError;
use tern_core::message::MessageHandle;
use tern_core::traits::Transport;
use tracing::debug;

const SLACK_BASE_URL: &str = "https://slack.com/api";

/// Slack Web API client implementing [`Transport`].
pub struct SlackTransport {
    client: reqwest::Client,
    bot_token: String,
    base_url: String,
}

impl SlackTransport {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: config.bot_token.clone(),
            base_url: SLACK_BASE_URL.to_string(),
        }
    }

    /// Call one Web API method and return the parsed envelope.
    ///
    /// Slack reports failures as HTTP 200 with `"ok": false`, so both the
    /// HTTP status and the envelope are checked.
    async fn call(&self, method: &str, payload: Value) -> Result<Value, TernError> {
        debug!("slack: POST {method}");
        let resp = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.bot_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TernError::Transport(format!("slack {method} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TernError::Transport(format!(
                "slack {method} failed ({status}): {text}"
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| TernError::Transport(format!("slack {method}: invalid response: {e}")))?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let err = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(TernError::Transport(format!(
                "slack {method} returned error: {err}"
            )));
        }

        Ok(body)
    }
}

/// Payload for `chat.postMessage`.
fn post_payload(channel: &str, text: &str, thread_ts: Option<&str>) -> Value {
    let mut payload = json!({
        "channel": channel,
        "text": text,
    });
    if let Some(ts) = thread_ts {
        payload["thread_ts"] = json!(ts);
    }
    payload
}

/// Payload for `chat.update`.
fn update_payload(channel: &str, handle: &MessageHandle, text: &str) -> Value {
    json!({
        "channel": channel,
        "ts": handle.0,
        "text": text,
    })
}

#[async_trait]
impl Transport for SlackTransport {
    async fn post(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<MessageHandle, TernError> {
        let body = self
            .call("chat.postMessage", post_payload(channel, text, thread_ts))
            .await?;

        let ts = body
            .get("ts")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TernError::Transport("slack chat.postMessage response missing ts".to_string())
            })?;

        Ok(MessageHandle(ts.to_string()))
    }

    async fn update(
        &self,
        channel: &str,
        handle: &MessageHandle,
        text: &str,
    ) -> Result<(), TernError> {
        self.call("chat.update", update_payload(channel, handle, text))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_payload_without_thread() {
        let payload = post_payload("C12345", "hello", None);
        assert_eq!(payload["channel"], "C12345");
        assert_eq!(payload["text"], "hello");
        assert!(payload.get("thread_ts").is_none());
    }

    #[test]
    fn test_post_payload_with_thread() {
        let payload = post_payload("C12345", "hello", Some("1712345678.000100"));
        assert_eq!(payload["thread_ts"], "1712345678.000100");
    }

    #[test]
    fn test_update_payload_targets_handle() {
        let handle = MessageHandle("1712345678.000200".into());
        let payload = update_payload("C12345", &handle, "done");
        assert_eq!(payload["channel"], "C12345");
        assert_eq!(payload["ts"], "1712345678.000200");
        assert_eq!(payload["text"], "done");
    }
}
