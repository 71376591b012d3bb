use async_trait::async_trait;
use reqwest::{header, Client};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, instrument};

use super::gateway::{
    ChargeRequest, GatewayError, GatewayPayment, GatewayStatus, PaymentGateway,
};
use crate::config::GatewaySettings;

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// REST client for the Mercado Pago payments API
#[derive(Clone)]
pub struct MercadoPagoGateway {
    client: Client,
    base_url: String,
    access_token: String,
}

impl std::fmt::Debug for MercadoPagoGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MercadoPagoGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MercadoPagoGateway {
    pub fn new(settings: &GatewaySettings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            access_token: settings.access_token.clone(),
        })
    }

    fn charge_body(request: &ChargeRequest) -> Result<Value, GatewayError> {
        let amount = request
            .amount
            .to_f64()
            .ok_or_else(|| GatewayError::Malformed("amount not representable".to_string()))?;

        let mut payer = json!({ "id": request.payer.user_id.to_string() });
        if let Some(email) = &request.payer.email {
            payer["email"] = json!(email);
        }

        Ok(json!({
            "transaction_amount": amount,
            "token": request.token,
            "description": request.description,
            "installments": request.installments,
            "payment_method_id": request.payment_method_id,
            "external_reference": request.external_reference,
            "payer": payer,
            "metadata": request.metadata,
        }))
    }

    async fn read_payment(response: reqwest::Response) -> Result<GatewayPayment, GatewayError> {
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            error!(http_status = status.as_u16(), "gateway returned non-success status");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_payment(&body)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}

/// Parses a payment resource; `id` may arrive as a number or a string.
pub(crate) fn parse_payment(body: &str) -> Result<GatewayPayment, GatewayError> {
    let raw: Value =
        serde_json::from_str(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;

    let id = match raw.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(GatewayError::Malformed("missing payment id".to_string())),
    };

    let raw_status = raw
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Malformed("missing payment status".to_string()))?
        .to_string();

    let status_detail = raw
        .get("status_detail")
        .and_then(Value::as_str)
        .map(str::to_string);
    let external_reference = raw
        .get("external_reference")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(GatewayPayment {
        id,
        status: GatewayStatus::from_gateway(&raw_status),
        raw_status,
        status_detail,
        external_reference,
        raw,
    })
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    #[instrument(skip(self, request), fields(external_reference = %request.external_reference))]
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError> {
        let body = Self::charge_body(request)?;
        debug!(installments = request.installments, "submitting charge to gateway");

        let response = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(&self.access_token)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Self::read_payment(response).await
    }

    #[instrument(skip(self))]
    async fn fetch_payment(
        &self,
        gateway_payment_id: &str,
    ) -> Result<GatewayPayment, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/payments/{}", self.base_url, gateway_payment_id))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Self::read_payment(response).await
    }
}
