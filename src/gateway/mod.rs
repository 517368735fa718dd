//! Axum-based webhook gateway for Lark event and card callbacks.
//!
//! Message events are acknowledged immediately and processed on a spawned
//! task, so Lark never re-delivers because of a slow model call. Card
//! callbacks are answered synchronously with the replacement card, if any.

mod cipher;

pub use cipher::EventCipher;

use crate::channels::{parse_card_action, parse_message_event};
use crate::config::GatewayConfig;
use crate::handlers::MessageHandler;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

const URL_VERIFICATION: &str = "url_verification";

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<MessageHandler>,
    /// Expected `token` of incoming callbacks; `None` disables the check.
    pub verification_token: Option<Arc<str>>,
    /// Decrypts `{"encrypt": ...}` envelopes when an encrypt key is set.
    pub cipher: Option<Arc<EventCipher>>,
}

impl AppState {
    pub fn new(handler: Arc<MessageHandler>) -> Self {
        let verification_token = handler
            .config()
            .lark
            .verification_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Arc::from);
        let cipher =
            EventCipher::from_key(handler.config().lark.encrypt_key.as_deref()).map(Arc::new);
        Self {
            handler,
            verification_token,
            cipher,
        }
    }

    fn token_matches(&self, presented: Option<&str>) -> bool {
        match self.verification_token.as_deref() {
            None => true,
            Some(expected) => presented.is_some_and(|p| constant_time_eq(expected, p)),
        }
    }
}

/// Compare two tokens without leaking the mismatch position through timing.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len_diff = a.len() ^ b.len();
    let max_len = a.len().max(b.len());
    let mut byte_diff = 0u8;
    for i in 0..max_len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        byte_diff |= x ^ y;
    }
    (len_diff == 0) & (byte_diff == 0)
}

fn str_field<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload.pointer(pointer).and_then(Value::as_str)
}

fn is_url_verification(payload: &Value) -> bool {
    str_field(payload, "/type") == Some(URL_VERIFICATION)
}

fn encrypted_body(payload: &Value) -> Option<&str> {
    str_field(payload, "/encrypt")
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message })))
}

/// Unwrap an encrypted envelope into the JSON it carries.
fn decrypt_envelope(
    state: &AppState,
    encrypted: &str,
    route: &str,
) -> Result<Value, (StatusCode, Json<Value>)> {
    let Some(cipher) = state.cipher.as_deref() else {
        tracing::warn!("{route}: encrypted callback received but lark.encrypt_key is not set");
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Encrypted callback without a configured encrypt key",
        ));
    };
    cipher
        .decrypt(encrypted)
        .and_then(|plain| serde_json::from_str(&plain).context("Decrypted payload is not JSON"))
        .map_err(|e| {
            tracing::warn!("{route}: failed to decrypt callback: {e:#}");
            error_response(StatusCode::BAD_REQUEST, "Undecryptable payload")
        })
}

/// Shared preamble of both callbacks: JSON parsing, envelope decryption and
/// the URL-verification handshake. `Err` is a finished response.
fn preflight(state: &AppState, body: &[u8], route: &str) -> Result<Value, (StatusCode, Json<Value>)> {
    let Ok(mut payload) = serde_json::from_slice::<Value>(body) else {
        return Err(error_response(StatusCode::BAD_REQUEST, "Invalid JSON payload"));
    };

    if let Some(encrypted) = encrypted_body(&payload) {
        payload = decrypt_envelope(state, encrypted, route)?;
    }

    if is_url_verification(&payload) {
        if !state.token_matches(str_field(&payload, "/token")) {
            tracing::warn!("{route}: URL verification with wrong token");
            return Err(error_response(StatusCode::UNAUTHORIZED, "Invalid verification token"));
        }
        let challenge = str_field(&payload, "/challenge").unwrap_or_default();
        tracing::info!("{route}: answered URL verification challenge");
        return Err((StatusCode::OK, Json(json!({ "challenge": challenge }))));
    }

    Ok(payload)
}

/// Build the router with body-size and timeout limits applied.
pub fn build_router(state: AppState, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/ping", get(handle_ping))
        .route("/health", get(handle_health))
        .route("/webhook/event", post(handle_event))
        .route("/webhook/card", post(handle_card))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
}

/// Serve the webhook gateway until `shutdown` resolves.
pub async fn run_gateway<F>(config: &GatewayConfig, handler: Arc<MessageHandler>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid gateway address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    let local = listener.local_addr()?;
    tracing::info!("Gateway listening on http://{local}");
    tracing::info!("  POST /webhook/event  - message events");
    tracing::info!("  POST /webhook/card   - card callbacks");

    let app = build_router(AppState::new(handler), config);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Gateway server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// GET /ping
async fn handle_ping() -> impl IntoResponse {
    Json(json!({ "message": "pong" }))
}

/// GET /health
async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /webhook/event: acknowledge, then process in the background.
async fn handle_event(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let payload = match preflight(&state, &body, "/webhook/event") {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    if !state.token_matches(str_field(&payload, "/header/token")) {
        tracing::warn!("/webhook/event: event with wrong verification token");
        return error_response(StatusCode::UNAUTHORIZED, "Invalid verification token");
    }

    let Some(event) = parse_message_event(&payload) else {
        tracing::debug!(
            "/webhook/event: ignoring event type {:?}",
            str_field(&payload, "/header/event_type").unwrap_or("unknown")
        );
        return (StatusCode::OK, Json(json!({})));
    };

    let handler = Arc::clone(&state.handler);
    tokio::spawn(async move {
        handler.handle_event(event).await;
    });
    (StatusCode::OK, Json(json!({})))
}

/// POST /webhook/card: dispatch a card click and return the replacement card.
async fn handle_card(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let payload = match preflight(&state, &body, "/webhook/card") {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let Some(action) = parse_card_action(&payload) else {
        tracing::debug!("/webhook/card: payload carries no readable action");
        return (StatusCode::OK, Json(json!({})));
    };

    match state.handler.handle_card_action(action).await {
        Some(card) => (StatusCode::OK, Json(card)),
        None => (StatusCode::OK, Json(json!({}))),
    }
}
