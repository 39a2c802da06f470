//! Source-control webhook.
//!
//! Deliveries are authenticated with `X-Hub-Signature-256`:
//! `sha256=` followed by the hex HMAC-SHA256 of the raw body under the
//! shared secret. The pull a push would trigger lives outside this
//! process; here it is only logged.

use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Response};
use axum::response::IntoResponse;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use mini_edge_state::{RequestSnapshot, TrafficRecord};

use crate::error::ApiError;
use crate::request::header_map;
use crate::state::AppState;

/// Path the webhook is served on, also used as its traffic route.
pub const WEBHOOK_PATH: &str = "/api/webhooks/github";

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

/// Check a delivery signature in constant time.
///
/// Always `false` without a secret or a signature.
pub fn verify_signature(secret: Option<&str>, body: &[u8], signature: Option<&str>) -> bool {
    let (Some(secret), Some(signature)) = (secret, signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

/// `POST /api/webhooks/github`
///
/// Non-`push` events are acknowledged without side effects before the
/// signature is looked at. Everything else needs a valid signature, and a
/// valid one is acknowledged whether or not the payload parses.
#[instrument(skip_all)]
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let start = Instant::now();
    let record = TrafficRecord::new("POST", WEBHOOK_PATH)
        .with_worker("github")
        .with_request(RequestSnapshot {
            headers: header_map(&headers),
            body: String::from_utf8_lossy(&body).into_owned(),
            ..Default::default()
        })
        .system();
    let elapsed = || u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let event = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok());
    if let Some(event) = event.filter(|e| *e != "push") {
        info!(event, "Ignoring webhook event");
        let reply = json!({ "ok": true, "ignored": true });
        state
            .traffic()
            .record(record.succeeded(200, reply.to_string(), elapsed()));
        return Json(reply).into_response();
    }

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !verify_signature(state.webhook_secret(), &body, signature) {
        warn!("Webhook signature rejected");
        let err = ApiError::InvalidSignature;
        state.traffic().record(record.failed(
            err.status().as_u16(),
            err.code(),
            err.to_string(),
            elapsed(),
        ));
        return err.into_response();
    }

    // The signature authenticates the delivery; the payload only feeds the log.
    match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => info!(
            repository = payload["repository"]["full_name"].as_str().unwrap_or_default(),
            git_ref = payload["ref"].as_str().unwrap_or_default(),
            "Push received, pull requested"
        ),
        Err(e) => warn!(error = %e, "Push received with unreadable payload, pull requested"),
    }

    let reply = json!({ "ok": true });
    state
        .traffic()
        .record(record.succeeded(200, reply.to_string(), elapsed()));
    Json(reply).into_response()
}
