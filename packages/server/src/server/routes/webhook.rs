//! WhatsApp Cloud API webhook.
//!
//! `GET` answers the subscription handshake, `POST` receives events. Event
//! bodies are authenticated with `X-Hub-Signature-256` before they are parsed.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::domains::messaging::models::WebhookPayload;
use crate::domains::messaging::AcceptOutcome;
use crate::server::app::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header is not sha256=<hex>")]
    Malformed,
    #[error("signature does not match body")]
    Mismatch,
}

/// Check `header` (`sha256=<hex>`) against the HMAC-SHA256 of `body`.
/// The comparison is constant time.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let hex_sig = header
        .trim()
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(&format!("hub.{}", name))
        .or_else(|| params.get(name))
        .map(String::as_str)
}

/// Subscription handshake: echo `challenge` when the verify token matches.
pub async fn verify_webhook_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(expected) = state.deps.settings.webhook_verify_token().await else {
        error!("webhook verify token is not configured");
        return StatusCode::FORBIDDEN.into_response();
    };

    let mode = param(&params, "mode");
    let token = param(&params, "verify_token");
    match (mode, token, param(&params, "challenge")) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == expected => {
            debug!("webhook subscription verified");
            (StatusCode::OK, challenge.to_string()).into_response()
        }
        _ => {
            warn!(mode = ?mode, "webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Event delivery. Always answers quickly; processing happens in jobs.
pub async fn receive_webhook_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.deps.settings.webhook_app_secret().await else {
        error!("webhook app secret is not configured, rejecting event");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(e) = verify_signature(&secret, &body, signature) {
        warn!(error = %e, "webhook signature rejected");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let payload = match WebhookPayload::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "webhook body is not valid JSON");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let mut enqueued = 0usize;
    let mut duplicates = 0usize;
    for message in payload.into_messages() {
        match state.dispatcher.accept(message).await {
            AcceptOutcome::Enqueued(_) => enqueued += 1,
            AcceptOutcome::Duplicate => duplicates += 1,
            AcceptOutcome::Dropped => {}
        }
    }
    debug!(enqueued, duplicates, "webhook processed");

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_body(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"object":"whatsapp_business_account","entry":[]}"#;
        let header = sign_body("s3cret", body);
        assert_eq!(verify_signature("s3cret", body, Some(&header)), Ok(()));
    }

    #[test]
    fn rejects_missing_malformed_and_wrong_signatures() {
        let body = b"{}";
        assert_eq!(verify_signature("s3cret", body, None), Err(SignatureError::Missing));
        assert_eq!(
            verify_signature("s3cret", body, Some("md5=abcd")),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature("s3cret", body, Some("sha256=zz")),
            Err(SignatureError::Malformed)
        );
        let other = sign_body("other", body);
        assert_eq!(
            verify_signature("s3cret", body, Some(&other)),
            Err(SignatureError::Mismatch)
        );
    }
}
