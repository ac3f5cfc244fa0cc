use crate::module::webhook::schema::{PartnerCallback, WebhookEvent};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Accepts the shared token itself or hex `sha256(token ":" body)`. Passes open
/// when no token is configured.
pub fn verify_webhook_signature(
    body: &str,
    signature: Option<&str>,
    token: Option<&str>,
) -> Result<(), String> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err("missing webhook signature".to_string());
    };
    if signature == token {
        return Ok(());
    }
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(b":");
    hasher.update(body.as_bytes());
    let expected = hex::encode(hasher.finalize());
    if expected.eq_ignore_ascii_case(signature) {
        Ok(())
    } else {
        Err("webhook signature verification failed".to_string())
    }
}

/// Dispatches on the event name. Recognized events are only logged.
pub fn process_callback(callback: &PartnerCallback) -> WebhookEvent {
    let operation_id = callback.operation_id().unwrap_or_default();
    let event = WebhookEvent::parse(callback.event_name());
    match event {
        WebhookEvent::OperationApproved => {
            info!(operation_id = %operation_id, "partner operation approved");
        }
        WebhookEvent::OperationRejected => {
            info!(operation_id = %operation_id, "partner operation rejected");
        }
        WebhookEvent::StatusChanged => {
            info!(operation_id = %operation_id, status = ?callback.status, "partner operation status changed");
        }
        WebhookEvent::Unknown => {
            warn!(
                operation_id = %operation_id,
                event = callback.event_name().unwrap_or("<none>"),
                "unrecognized partner event"
            );
        }
    }
    event
}
