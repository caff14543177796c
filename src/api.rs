//! HTTP API: the Slack events endpoint and the scheduled daily trigger.
//!
//! The daily trigger is guarded by a shared-secret header; the events
//! endpoint acks immediately and processes in a background task so the
//! upstream 3-second deadline is never at risk.

use crate::chat::{ChatService, Handled};
use crate::daily::DailyService;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tern_core::message::MessageEvent;
use tern_core::traits::Transport;
use tracing::{error, info, warn};

/// Header carrying the shared secret for the daily trigger.
const SCHEDULER_TOKEN_HEADER: &str = "x-cloud-scheduler-token";

/// Text the placeholder is rewritten to when handling fails after it
/// became visible.
const FAILURE_NOTICE: &str =
    "Something went wrong while generating a reply. Please try again.";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub chat: Arc<ChatService>,
    pub daily: Arc<DailyService>,
    pub transport: Arc<dyn Transport>,
    pub cron_token: String,
    pub uptime: Instant,
}

/// Build the application router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/daily", get(daily))
        .route("/slack/events", post(slack_events))
        .with_state(state)
}

/// Constant-time string comparison to prevent timing attacks on the
/// trigger token.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// `GET /healthz` — liveness check with uptime.
async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
    }))
}

/// `GET /daily` — run the daily check-in batch.
///
/// An empty configured token disables the trigger entirely.
async fn daily(headers: HeaderMap, State(state): State<ApiState>) -> (StatusCode, String) {
    let presented = headers
        .get(SCHEDULER_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if state.cron_token.is_empty() || !constant_time_eq(presented, &state.cron_token) {
        warn!("unauthorized daily trigger attempt");
        return (StatusCode::UNAUTHORIZED, "Unauthorized".to_string());
    }

    match state.daily.run().await {
        Ok(summary) => (StatusCode::OK, summary.status_line()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {e}")),
    }
}

/// `POST /slack/events` — Slack Events API callback.
async fn slack_events(
    State(state): State<ApiState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match payload.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = payload
                .get("challenge")
                .and_then(Value::as_str)
                .unwrap_or("");
            (StatusCode::OK, Json(json!({ "challenge": challenge })))
        }
        Some("event_callback") => {
            if let Some(event) = parse_message_event(&payload) {
                let chat = state.chat.clone();
                let transport = state.transport.clone();
                tokio::spawn(async move {
                    dispatch(chat, transport, event).await;
                });
            }
            (StatusCode::OK, Json(json!({ "ok": true })))
        }
        _ => (StatusCode::OK, Json(json!({ "ok": true }))),
    }
}

/// Extract a handleable message event from an `event_callback` payload.
///
/// Bot echoes and subtyped messages (edits, joins, bot_message) never
/// enter the ledger.
fn parse_message_event(payload: &Value) -> Option<MessageEvent> {
    let event = payload.get("event")?;
    let kind = event.get("type").and_then(Value::as_str)?;
    if kind != "message" && kind != "app_mention" {
        return None;
    }
    if event.get("bot_id").is_some() || event.get("subtype").is_some() {
        return None;
    }
    serde_json::from_value(event.clone()).ok()
}

/// Drive one event to its terminal state, visibly reporting a failure on
/// the placeholder when one is already showing.
async fn dispatch(chat: Arc<ChatService>, transport: Arc<dyn Transport>, event: MessageEvent) {
    match chat.handle_event(&event).await {
        Ok(Handled::Responded { reply }) => {
            info!(
                "responded in {} ({} chars)",
                event.channel,
                reply.len()
            );
        }
        Ok(Handled::Duplicate) => {}
        Err(e) => {
            error!("event handling failed in {}: {}", event.channel, e.source);
            if let Some(handle) = e.placeholder {
                if let Err(update_err) = transport
                    .update(&event.channel, &handle, FAILURE_NOTICE)
                    .await
                {
                    error!("failed to update placeholder after failure: {update_err}");
                }
            }
        }
    }
}
