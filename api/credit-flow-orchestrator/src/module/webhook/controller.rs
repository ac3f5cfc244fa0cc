use super::schema::{PartnerCallback, WebhookResponse};
use crate::app::AppState;
use crate::module::flow::error::AppError;
use crate::service::webhook_service::{process_callback, verify_webhook_signature};
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::error;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub async fn receive_partner_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = verify_webhook_signature(&body, signature, state.config.webhook_token.as_deref())
    {
        return error_webhook(AppError::unauthorized("WEBHOOK_INVALID_SIGNATURE", e));
    }

    let callback = match serde_json::from_str::<PartnerCallback>(&body) {
        Ok(c) => c,
        Err(e) => {
            return error_webhook(AppError::bad_request(
                "WEBHOOK_INVALID_PAYLOAD",
                format!("invalid callback payload: {e}"),
            ));
        }
    };

    let event = process_callback(&callback);
    (
        StatusCode::OK,
        Json(WebhookResponse {
            received: true,
            event: Some(event),
            operation_id: callback.operation_id(),
            error_code: None,
            reason: "callback received".to_string(),
        }),
    )
}

fn error_webhook(err: AppError) -> (StatusCode, Json<WebhookResponse>) {
    error!(error_code = err.code, reason = %err.message, "partner callback rejected");
    (
        err.status,
        Json(WebhookResponse {
            received: false,
            event: None,
            operation_id: None,
            error_code: Some(err.code.to_string()),
            reason: err.message,
        }),
    )
}
