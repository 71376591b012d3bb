use chrono::Utc;
use hmac::{Hmac, Mac};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::entities::{payment, webhook_notification};
use crate::errors::ServiceError;
use crate::services::payments::{
    gateway::{GatewayPayment, GuardedGateway},
    GatewayVerdict, PaymentService, Settled,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const GATEWAY_REQUEST_ID_HEADER: &str = "x-request-id";

/// Raw signature headers as received
#[derive(Debug, Clone, Default)]
pub struct SignatureHeaders {
    pub signature: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Local payment moved to the gateway's verdict
    Applied,
    /// Local payment was already approved
    AlreadyProcessed,
    /// Verdict recorded as a disagreement and left alone
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub notification_id: Uuid,
    pub outcome: WebhookOutcome,
}

/// Parsed `ts=<unix>,v1=<hex>` signature header
#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureParts {
    ts: i64,
    v1: String,
}

fn parse_signature(header: &str) -> Option<SignatureParts> {
    let mut ts = None;
    let mut v1 = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = value.trim().parse::<i64>().ok(),
            Some(("v1", value)) => v1 = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Some(SignatureParts { ts: ts?, v1: v1? })
}

/// The signed string: `id:{data.id};request-id:{x-request-id};ts:{ts};`
pub fn signature_manifest(data_id: &str, request_id: &str, ts: i64) -> String {
    format!(
        "id:{};request-id:{};ts:{};",
        data_id.to_lowercase(),
        request_id,
        ts
    )
}

/// Hex HMAC-SHA256 of `manifest` under `secret`
pub fn sign_manifest(secret: &str, manifest: &str) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid webhook secret: {}", e)))?;
    mac.update(manifest.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify_signature(
    secret: &str,
    headers: &SignatureHeaders,
    data_id: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), &'static str> {
    let header = headers
        .signature
        .as_deref()
        .ok_or("missing signature header")?;
    let request_id = headers
        .request_id
        .as_deref()
        .ok_or("missing request id header")?;
    let parts = parse_signature(header).ok_or("malformed signature header")?;

    // Timestamps may arrive in milliseconds
    let ts_secs = if parts.ts > 10_000_000_000 {
        parts.ts / 1000
    } else {
        parts.ts
    };
    if (now - ts_secs).unsigned_abs() > tolerance_secs {
        return Err("signature timestamp outside tolerance");
    }

    let expected = hex::decode(&parts.v1).map_err(|_| "signature is not hex")?;
    let manifest = signature_manifest(data_id, request_id, parts.ts);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "invalid secret")?;
    mac.update(manifest.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| "signature mismatch")
}

/// `data.id` of a notification; numbers and strings both accepted
fn payload_data_id(payload: &Value) -> Option<String> {
    match payload.get("data")?.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn payload_topic(payload: &Value) -> String {
    payload
        .get("type")
        .or_else(|| payload.get("topic"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn payload_notification_id(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Second, asynchronous path to a payment's terminal state
#[derive(Clone)]
pub struct WebhookReconciler {
    db: Arc<DatabaseConnection>,
    payments: Arc<PaymentService>,
    gateway: Arc<GuardedGateway>,
    secret: Option<String>,
    tolerance_secs: u64,
}

impl WebhookReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payments: Arc<PaymentService>,
        gateway: Arc<GuardedGateway>,
        secret: Option<String>,
        tolerance_secs: u64,
    ) -> Self {
        Self {
            db,
            payments,
            gateway,
            secret,
            tolerance_secs,
        }
    }

    /// Verifies, persists and reconciles one gateway notification.
    ///
    /// Nothing is persisted for a notification that fails signature checks.
    /// A notification for an unknown payment stays unprocessed and is answered
    /// with `NotFound` so the gateway retries it.
    #[instrument(skip(self, headers, payload), fields(topic = tracing::field::Empty))]
    pub async fn handle_gateway_webhook(
        &self,
        headers: &SignatureHeaders,
        payload: &Value,
    ) -> Result<WebhookAck, ServiceError> {
        let topic = payload_topic(payload);
        tracing::Span::current().record("topic", topic.as_str());

        let data_id = payload_data_id(payload).ok_or_else(|| {
            warn!("webhook without data.id rejected");
            ServiceError::Unauthorized("invalid webhook signature".to_string())
        })?;

        let Some(secret) = self.secret.as_deref() else {
            error!("webhook received but no webhook secret is configured");
            return Err(ServiceError::Unauthorized(
                "webhook signature cannot be verified".to_string(),
            ));
        };

        if let Err(reason) = verify_signature(
            secret,
            headers,
            &data_id,
            self.tolerance_secs,
            Utc::now().timestamp(),
        ) {
            warn!(reason, gateway_payment_id = %data_id, "webhook signature rejected");
            counter!("fagsol_webhooks.rejected", 1, "reason" => reason);
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }

        let is_payment = topic == "payment" || topic.starts_with("payment.");
        let notification = webhook_notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            notification_id: Set(payload_notification_id(payload)),
            topic: Set(topic.clone()),
            gateway_payment_id: Set(data_id.clone()),
            request_id: Set(headers.request_id.clone()),
            payload: Set(payload.clone()),
            processed: Set(!is_payment),
            error: Set(None),
            received_at: Set(Utc::now()),
            processed_at: Set(if is_payment { None } else { Some(Utc::now()) }),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        if !is_payment {
            info!(notification_id = %notification.id, "non-payment notification acknowledged");
            counter!("fagsol_webhooks.received", 1, "outcome" => "ignored");
            return Ok(WebhookAck {
                notification_id: notification.id,
                outcome: WebhookOutcome::Ignored,
            });
        }

        self.process_stored(notification).await
    }

    /// Re-runs reconciliation for a stored notification that was not processed
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn replay_notification(
        &self,
        actor: &Actor,
        notification_id: Uuid,
    ) -> Result<WebhookAck, ServiceError> {
        actor.require_admin("replay webhook notification")?;

        let notification = webhook_notification::Entity::find_by_id(notification_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Notification {} not found", notification_id))
            })?;

        if notification.processed {
            return Err(ServiceError::Conflict(
                "notification was already processed".to_string(),
            ));
        }

        info!(notification_id = %notification_id, "replaying webhook notification");
        self.process_stored(notification).await
    }

    async fn process_stored(
        &self,
        notification: webhook_notification::Model,
    ) -> Result<WebhookAck, ServiceError> {
        let result = self.reconcile(&notification.gateway_payment_id).await;

        let (processed, error_text) = match &result {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        webhook_notification::Entity::update_many()
            .col_expr(webhook_notification::Column::Processed, Expr::value(processed))
            .col_expr(webhook_notification::Column::Error, Expr::value(error_text))
            .col_expr(
                webhook_notification::Column::ProcessedAt,
                Expr::value(processed.then(Utc::now)),
            )
            .filter(webhook_notification::Column::Id.eq(notification.id))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let outcome = result?;
        let label = match outcome {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::AlreadyProcessed => "already_processed",
            WebhookOutcome::Ignored => "ignored",
        };
        counter!("fagsol_webhooks.received", 1, "outcome" => label);

        Ok(WebhookAck {
            notification_id: notification.id,
            outcome,
        })
    }

    async fn reconcile(&self, gateway_payment_id: &str) -> Result<WebhookOutcome, ServiceError> {
        let gateway_payment = self
            .gateway
            .fetch_payment(gateway_payment_id)
            .await
            .map_err(|e| ServiceError::GatewayUnavailable(e.to_string()))?;

        let local = self.find_local_payment(&gateway_payment).await?;

        let settled = self
            .payments
            .apply_settlement(local.id, GatewayVerdict::Payment(&gateway_payment))
            .await?;

        Ok(match settled {
            Settled::Approved { .. } | Settled::Rejected { .. } | Settled::Pending { .. } => {
                info!(
                    payment_id = %local.id,
                    gateway_status = %gateway_payment.raw_status,
                    "payment reconciled from webhook"
                );
                WebhookOutcome::Applied
            }
            Settled::AlreadyApproved { .. } => WebhookOutcome::AlreadyProcessed,
            Settled::DuplicateCapture { .. } | Settled::Ignored { .. } => WebhookOutcome::Ignored,
        })
    }

    async fn find_local_payment(
        &self,
        gateway_payment: &GatewayPayment,
    ) -> Result<payment::Model, ServiceError> {
        let by_gateway_id = payment::Entity::find()
            .filter(payment::Column::GatewayPaymentId.eq(gateway_payment.id.as_str()))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        if let Some(found) = by_gateway_id {
            return Ok(found);
        }

        let reference = gateway_payment
            .external_reference
            .as_deref()
            .and_then(|r| Uuid::parse_str(r).ok());
        if let Some(local_id) = reference {
            if let Some(found) = payment::Entity::find_by_id(local_id)
                .one(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
            {
                return Ok(found);
            }
        }

        warn!(
            gateway_payment_id = %gateway_payment.id,
            external_reference = ?gateway_payment.external_reference,
            "webhook references an unknown payment"
        );
        Err(ServiceError::NotFound(format!(
            "no local payment for gateway payment {}",
            gateway_payment.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";

    fn signed_headers(data_id: &str, request_id: &str, ts: i64) -> SignatureHeaders {
        let manifest = signature_manifest(data_id, request_id, ts);
        let v1 = sign_manifest(SECRET, &manifest).unwrap();
        SignatureHeaders {
            signature: Some(format!("ts={},v1={}", ts, v1)),
            request_id: Some(request_id.to_string()),
        }
    }

    #[test]
    fn parses_signature_header_in_any_order() {
        assert_eq!(
            parse_signature("v1=abcd, ts=1700000000"),
            Some(SignatureParts {
                ts: 1_700_000_000,
                v1: "abcd".into()
            })
        );
        assert_eq!(parse_signature("ts=1700000000"), None);
        assert_eq!(parse_signature("garbage"), None);
    }

    #[test]
    fn manifest_lowercases_data_id() {
        assert_eq!(
            signature_manifest("ABC123", "req-1", 42),
            "id:abc123;request-id:req-1;ts:42;"
        );
    }

    #[test]
    fn valid_signature_verifies() {
        let now = 1_700_000_000;
        let headers = signed_headers("123456", "req-1", now);
        assert!(verify_signature(SECRET, &headers, "123456", 300, now).is_ok());
    }

    #[test]
    fn tampered_data_id_fails() {
        let now = 1_700_000_000;
        let headers = signed_headers("123456", "req-1", now);
        assert_eq!(
            verify_signature(SECRET, &headers, "654321", 300, now),
            Err("signature mismatch")
        );
    }

    #[test]
    fn wrong_secret_fails() {
        let now = 1_700_000_000;
        let headers = signed_headers("123456", "req-1", now);
        assert!(verify_signature("other-secret", &headers, "123456", 300, now).is_err());
    }

    #[test]
    fn stale_timestamp_fails() {
        let signed_at = 1_700_000_000;
        let headers = signed_headers("123456", "req-1", signed_at);
        assert_eq!(
            verify_signature(SECRET, &headers, "123456", 300, signed_at + 301),
            Err("signature timestamp outside tolerance")
        );
    }

    #[test]
    fn missing_headers_fail() {
        let headers = SignatureHeaders::default();
        assert_eq!(
            verify_signature(SECRET, &headers, "1", 300, 0),
            Err("missing signature header")
        );
    }

    #[test]
    fn data_id_accepts_numbers_and_strings() {
        assert_eq!(
            payload_data_id(&json!({"data": {"id": 987}})),
            Some("987".to_string())
        );
        assert_eq!(
            payload_data_id(&json!({"data": {"id": "987"}})),
            Some("987".to_string())
        );
        assert_eq!(payload_data_id(&json!({"data": {}})), None);
    }
}
