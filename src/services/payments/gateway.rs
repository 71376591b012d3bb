use async_trait::async_trait;
use metrics::histogram;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};
use crate::config::GatewaySettings;

/// Identity of the buyer as sent to the gateway
#[derive(Debug, Clone, Serialize)]
pub struct Payer {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A charge against a pre-tokenized card. Card numbers, expiry and CVV
/// never reach this service.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub token: String,
    pub amount: Decimal,
    pub currency: String,
    pub installments: u32,
    pub payment_method_id: String,
    pub payer: Payer,
    /// Local payment id, echoed back by the gateway for reconciliation
    pub external_reference: String,
    pub idempotency_key: String,
    pub description: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Approved,
    Rejected,
    Pending,
}

impl GatewayStatus {
    /// Maps gateway status strings; in-flight and unknown states count as pending.
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "approved" => Self::Approved,
            "rejected" | "cancelled" | "refunded" | "charged_back" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// The gateway's view of one payment
#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub id: String,
    pub status: GatewayStatus,
    /// Raw status string as returned, for audit
    pub raw_status: String,
    pub status_detail: Option<String>,
    pub external_reference: Option<String>,
    pub raw: serde_json::Value,
}

/// Infrastructure failures, distinct from a decline
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway call timed out")]
    Timeout,
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway returned HTTP {status}")]
    Status { status: u16, body: String },
    #[error("malformed gateway response: {0}")]
    Malformed(String),
    #[error("gateway circuit open")]
    CircuitOpen,
}

impl GatewayError {
    /// Short label stored as the payment's status detail
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::Status { .. } => "http_status",
            Self::Malformed(_) => "malformed_response",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError>;

    async fn fetch_payment(&self, gateway_payment_id: &str)
        -> Result<GatewayPayment, GatewayError>;
}

/// Gateway wrapped in a timeout and a circuit breaker.
///
/// A timeout or an open circuit is reported as a [`GatewayError`], never as a decline.
#[derive(Clone)]
pub struct GuardedGateway {
    inner: Arc<dyn PaymentGateway>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl GuardedGateway {
    pub fn new(inner: Arc<dyn PaymentGateway>, settings: &GatewaySettings) -> Self {
        let breaker = CircuitBreaker::new(
            "payment_gateway",
            CircuitBreakerConfig {
                failure_threshold: settings.circuit_failure_threshold,
                timeout: Duration::from_secs(settings.circuit_reset_secs),
                success_threshold: 1,
            },
        );
        Self {
            inner,
            breaker,
            timeout: settings.timeout(),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub async fn charge(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError> {
        self.guarded("charge", || self.inner.charge(request)).await
    }

    pub async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        self.guarded("fetch_payment", || self.inner.fetch_payment(gateway_payment_id))
            .await
    }

    async fn guarded<F, Fut>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<GatewayPayment, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GatewayPayment, GatewayError>>,
    {
        let started = Instant::now();
        let timeout = self.timeout;

        let result = self
            .breaker
            .call(|| async move {
                match tokio::time::timeout(timeout, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout),
                }
            })
            .await
            .map_err(|err| match err {
                CircuitBreakerError::CircuitOpen => GatewayError::CircuitOpen,
                CircuitBreakerError::Inner(inner) => inner,
            });

        histogram!(
            "fagsol_gateway.latency_seconds",
            started.elapsed().as_secs_f64(),
            "operation" => operation
        );
        if let Err(err) = &result {
            warn!(operation, error = %err, "gateway call failed");
        }

        result
    }
}

const DECLINE_MESSAGES: &[(&str, &str)] = &[
    (
        "cc_rejected_insufficient_amount",
        "Tu tarjeta no tiene fondos suficientes.",
    ),
    (
        "cc_rejected_bad_filled_security_code",
        "Revisa el código de seguridad de la tarjeta.",
    ),
    (
        "cc_rejected_bad_filled_date",
        "Revisa la fecha de vencimiento de la tarjeta.",
    ),
    (
        "cc_rejected_bad_filled_card_number",
        "Revisa el número de la tarjeta.",
    ),
    (
        "cc_rejected_bad_filled_other",
        "Revisa los datos ingresados de la tarjeta.",
    ),
    (
        "cc_rejected_call_for_authorize",
        "Debes autorizar este pago con el banco emisor de tu tarjeta.",
    ),
    (
        "cc_rejected_card_disabled",
        "Tu tarjeta no está activa. Comunícate con tu banco para activarla.",
    ),
    (
        "cc_rejected_card_error",
        "No pudimos procesar el pago con esta tarjeta.",
    ),
    (
        "cc_rejected_duplicated_payment",
        "Ya realizaste un pago por este monto. Si necesitas pagar otra vez, usa otra tarjeta u otro medio de pago.",
    ),
    (
        "cc_rejected_high_risk",
        "Tu pago fue rechazado por seguridad. Usa otra tarjeta u otro medio de pago.",
    ),
    (
        "cc_rejected_invalid_installments",
        "Tu tarjeta no acepta el número de cuotas seleccionado.",
    ),
    (
        "cc_rejected_max_attempts",
        "Llegaste al límite de intentos permitidos. Usa otra tarjeta u otro medio de pago.",
    ),
    (
        "cc_rejected_blacklist",
        "No pudimos procesar tu pago. Usa otra tarjeta u otro medio de pago.",
    ),
    (
        "cc_rejected_other_reason",
        "El banco emisor rechazó el pago.",
    ),
];

/// Translates a gateway decline code into the message shown to the buyer.
pub fn decline_message(code: Option<&str>) -> String {
    match code {
        Some(code) => DECLINE_MESSAGES
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, message)| (*message).to_string())
            .unwrap_or_else(|| {
                format!(
                    "El pago fue rechazado (código: {}). Si el problema continúa, contacta a soporte.",
                    code
                )
            }),
        None => "El pago fue rechazado.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_are_translated() {
        assert_eq!(
            decline_message(Some("cc_rejected_insufficient_amount")),
            "Tu tarjeta no tiene fondos suficientes."
        );
    }

    #[test]
    fn unknown_code_surfaces_raw_code() {
        let message = decline_message(Some("cc_rejected_brand_new_reason"));
        assert!(message.contains("cc_rejected_brand_new_reason"));
    }

    #[test]
    fn missing_code_gets_generic_message() {
        assert_eq!(decline_message(None), "El pago fue rechazado.");
    }

    #[test]
    fn status_strings_map_conservatively() {
        assert_eq!(GatewayStatus::from_gateway("approved"), GatewayStatus::Approved);
        assert_eq!(GatewayStatus::from_gateway("rejected"), GatewayStatus::Rejected);
        assert_eq!(GatewayStatus::from_gateway("in_process"), GatewayStatus::Pending);
        assert_eq!(GatewayStatus::from_gateway("authorized"), GatewayStatus::Pending);
        assert_eq!(GatewayStatus::from_gateway("something_new"), GatewayStatus::Pending);
    }
}
