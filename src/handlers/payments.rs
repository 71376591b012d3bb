use axum::{
    extract::{Json, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::auth::Actor;
use crate::entities::payment::PaymentStatus;
use crate::errors::ServiceError;
use crate::services::payments::{
    CreatePaymentIntentRequest, PaymentIntentResponse, PaymentView, ProcessPaymentRequest,
    ProcessPaymentResponse,
};
use crate::{ApiResponse, AppState};

/// Clients may send the key as a header instead of in the body
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Open a server-priced payment intent for a set of courses
async fn create_payment_intent(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreatePaymentIntentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentIntentResponse>>), ServiceError> {
    let intent = state.payments.create_payment_intent(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(intent))))
}

async fn get_payment_intent(
    State(state): State<AppState>,
    Path(intent_id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<ApiResponse<PaymentIntentResponse>>, ServiceError> {
    let intent = state.payments.get_payment_intent(&actor, intent_id).await?;
    Ok(Json(ApiResponse::success(intent)))
}

/// Charge a tokenized card against an intent
async fn process_payment(
    State(state): State<AppState>,
    actor: Actor,
    headers: HeaderMap,
    Json(mut request): Json<ProcessPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProcessPaymentResponse>>), ServiceError> {
    if request.idempotency_key.is_none() {
        request.idempotency_key = headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let response = state.payments.process_payment(&actor, request).await?;
    // Pending charges are accepted but not settled yet
    let status = if response.status == PaymentStatus::Pending {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::success(response))))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<ApiResponse<PaymentView>>, ServiceError> {
    let payment = state.payments.get_payment(&actor, payment_id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Routes mounted under `/api/v1/payments`
pub fn payments_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(process_payment))
        .route("/:payment_id", get(get_payment))
        .route("/intents", post(create_payment_intent))
        .route("/intents/:intent_id", get(get_payment_intent))
        .merge(super::payment_webhooks::webhook_routes())
}
