use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use fagsol_api::{
    circuit_breaker::CircuitState,
    config::GatewaySettings,
    services::payments::{
        gateway::{ChargeRequest, GatewayError, GatewayStatus, GuardedGateway, Payer, PaymentGateway},
        mercadopago::MercadoPagoGateway,
    },
};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const ACCESS_TOKEN: &str = "TEST-0000-access-token";

fn settings(server: &MockServer) -> GatewaySettings {
    GatewaySettings {
        base_url: server.uri(),
        access_token: ACCESS_TOKEN.to_string(),
        timeout_secs: 1,
        ..GatewaySettings::default()
    }
}

fn charge_request(external_reference: &str) -> ChargeRequest {
    ChargeRequest {
        token: "card_token_abc".to_string(),
        amount: dec!(300.00),
        currency: "PEN".to_string(),
        installments: 3,
        payment_method_id: "visa".to_string(),
        payer: Payer {
            user_id: Uuid::new_v4(),
            email: Some("alumno@example.com".to_string()),
        },
        external_reference: external_reference.to_string(),
        idempotency_key: "idem-123".to_string(),
        description: "FagSol Escuela Virtual - 2 curso(s)".to_string(),
        metadata: json!({}),
    }
}

#[tokio::test]
async fn charge_posts_an_authenticated_idempotent_request() {
    let server = MockServer::start().await;
    let reference = Uuid::new_v4().to_string();

    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .and(header("authorization", format!("Bearer {}", ACCESS_TOKEN).as_str()))
        .and(header("x-idempotency-key", "idem-123"))
        .and(body_partial_json(json!({
            "transaction_amount": 300.0,
            "token": "card_token_abc",
            "installments": 3,
            "payment_method_id": "visa",
            "external_reference": reference,
            "payer": { "email": "alumno@example.com" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 1319012345,
            "status": "approved",
            "status_detail": "accredited",
            "external_reference": reference
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = MercadoPagoGateway::new(&settings(&server)).unwrap();
    let payment = gateway.charge(&charge_request(&reference)).await.unwrap();

    assert_eq!(payment.id, "1319012345");
    assert_eq!(payment.status, GatewayStatus::Approved);
    assert_eq!(payment.status_detail.as_deref(), Some("accredited"));
    assert_eq!(payment.external_reference.as_deref(), Some(reference.as_str()));
}

#[tokio::test]
async fn rejected_charge_is_a_verdict_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "77",
            "status": "rejected",
            "status_detail": "cc_rejected_call_for_authorize"
        })))
        .mount(&server)
        .await;

    let gateway = MercadoPagoGateway::new(&settings(&server)).unwrap();
    let payment = gateway.charge(&charge_request("ref")).await.unwrap();
    assert_eq!(payment.status, GatewayStatus::Rejected);
    assert_eq!(payment.raw_status, "rejected");
}

#[tokio::test]
async fn server_errors_map_to_status_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let gateway = MercadoPagoGateway::new(&settings(&server)).unwrap();
    let err = gateway.charge(&charge_request("ref")).await.unwrap_err();
    assert_matches!(err, GatewayError::Status { status: 500, ref body } if body == "internal error");
    assert_eq!(err.kind(), "http_status");
}

#[tokio::test]
async fn malformed_success_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let gateway = MercadoPagoGateway::new(&settings(&server)).unwrap();
    assert_matches!(
        gateway.charge(&charge_request("ref")).await,
        Err(GatewayError::Malformed(_))
    );
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "id": 1, "status": "approved" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let gateway = MercadoPagoGateway::new(&settings(&server)).unwrap();
    assert_matches!(
        gateway.charge(&charge_request("ref")).await,
        Err(GatewayError::Timeout)
    );
}

#[tokio::test]
async fn fetch_payment_reads_current_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/1319012345"))
        .and(header("authorization", format!("Bearer {}", ACCESS_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1319012345,
            "status": "in_process",
            "status_detail": "pending_review_manual",
            "external_reference": "local-ref"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/404404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "not found" })))
        .mount(&server)
        .await;

    let gateway = MercadoPagoGateway::new(&settings(&server)).unwrap();
    let payment = gateway.fetch_payment("1319012345").await.unwrap();
    assert_eq!(payment.status, GatewayStatus::Pending);
    assert_eq!(payment.raw_status, "in_process");
    assert_eq!(payment.external_reference.as_deref(), Some("local-ref"));

    assert_matches!(
        gateway.fetch_payment("404404").await,
        Err(GatewayError::Status { status: 404, .. })
    );
}

#[tokio::test]
async fn circuit_opens_after_repeated_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let cfg = GatewaySettings {
        circuit_failure_threshold: 2,
        circuit_reset_secs: 60,
        ..settings(&server)
    };
    let inner: Arc<dyn PaymentGateway> = Arc::new(MercadoPagoGateway::new(&cfg).unwrap());
    let guarded = GuardedGateway::new(inner, &cfg);

    for _ in 0..2 {
        assert_matches!(
            guarded.charge(&charge_request("ref")).await,
            Err(GatewayError::Status { status: 503, .. })
        );
    }
    assert_eq!(guarded.circuit_state(), CircuitState::Open);
    assert_matches!(
        guarded.charge(&charge_request("ref")).await,
        Err(GatewayError::CircuitOpen)
    );
}
