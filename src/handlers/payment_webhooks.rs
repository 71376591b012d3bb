use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use bytes::Bytes;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::auth::Actor;
use crate::errors::ServiceError;
use crate::services::webhooks::{
    SignatureHeaders, WebhookAck, GATEWAY_REQUEST_ID_HEADER, SIGNATURE_HEADER,
};
use crate::{ApiResponse, AppState};

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// POST /api/v1/payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookAck>>, ServiceError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "webhook body is not valid JSON");
        ServiceError::ValidationError(format!("invalid json: {}", e))
    })?;

    let signature = SignatureHeaders {
        signature: header_string(&headers, SIGNATURE_HEADER),
        request_id: header_string(&headers, GATEWAY_REQUEST_ID_HEADER),
    };

    let ack = state
        .webhooks
        .handle_gateway_webhook(&signature, &payload)
        .await?;
    Ok(Json(ApiResponse::success(ack)))
}

// POST /api/v1/payments/webhook/notifications/:id/replay
pub async fn replay_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<ApiResponse<WebhookAck>>, ServiceError> {
    let ack = state
        .webhooks
        .replay_notification(&actor, notification_id)
        .await?;
    Ok(Json(ApiResponse::success(ack)))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(payment_webhook))
        .route(
            "/webhook/notifications/:notification_id/replay",
            post(replay_notification),
        )
}
