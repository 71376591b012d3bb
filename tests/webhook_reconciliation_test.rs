mod common;

use assert_matches::assert_matches;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use common::{
    admin, payment_notification, signed_headers, student, ChargeOutcome, TestContext,
    WEBHOOK_SECRET,
};
use fagsol_api::{
    auth::Actor,
    entities::{
        course::CourseStatus,
        enrollment,
        payment::{self, PaymentStatus},
        payment_intent::{self, PaymentIntentStatus},
        webhook_notification,
    },
    errors::ServiceError,
    services::{
        payments::{CreatePaymentIntentRequest, ProcessPaymentRequest, ProcessPaymentResponse},
        webhooks::{sign_manifest, signature_manifest, SignatureHeaders, WebhookOutcome},
    },
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

/// Opens a two-course intent for `buyer` and charges it with the current fake outcome
async fn purchase(ctx: &TestContext, buyer: &Actor) -> Result<ProcessPaymentResponse, ServiceError> {
    let a = ctx.seed_course(dec!(100.00), CourseStatus::Published).await;
    let b = ctx.seed_course(dec!(200.00), CourseStatus::Published).await;
    let intent = ctx
        .payments()
        .create_payment_intent(
            buyer,
            CreatePaymentIntentRequest {
                course_ids: vec![a, b],
                metadata: None,
            },
        )
        .await
        .unwrap();

    ctx.payments()
        .process_payment(
            buyer,
            ProcessPaymentRequest {
                payment_intent_id: intent.id,
                token: "tok_test".to_string(),
                payment_method_id: "visa".to_string(),
                installments: 1,
                amount: dec!(300.00),
                idempotency_key: None,
                payer_email: None,
            },
        )
        .await
}

async fn only_payment(ctx: &TestContext, user_id: Uuid) -> payment::Model {
    let mut payments = payment::Entity::find()
        .filter(payment::Column::UserId.eq(user_id))
        .all(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    payments.remove(0)
}

async fn intent_of(ctx: &TestContext, payment: &payment::Model) -> payment_intent::Model {
    payment_intent::Entity::find_by_id(payment.payment_intent_id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap()
}

async fn enrollment_count(ctx: &TestContext, user_id: Uuid) -> usize {
    enrollment::Entity::find()
        .filter(enrollment::Column::UserId.eq(user_id))
        .all(&*ctx.db)
        .await
        .unwrap()
        .len()
}

async fn notifications(ctx: &TestContext) -> Vec<webhook_notification::Model> {
    webhook_notification::Entity::find()
        .all(&*ctx.db)
        .await
        .unwrap()
}

async fn deliver(
    ctx: &TestContext,
    data_id: &str,
) -> Result<fagsol_api::services::webhooks::WebhookAck, ServiceError> {
    ctx.state
        .webhooks
        .handle_gateway_webhook(&signed_headers(data_id), &payment_notification(data_id))
        .await
}

#[tokio::test]
async fn webhook_after_synchronous_approval_is_a_no_op() {
    let ctx = TestContext::new().await;
    let buyer = student();
    let paid = purchase(&ctx, &buyer).await.unwrap();
    assert_eq!(paid.status, PaymentStatus::Approved);

    let local = only_payment(&ctx, buyer.user_id).await;
    let gateway_id = local.gateway_payment_id.clone().unwrap();

    let ack = deliver(&ctx, &gateway_id).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::AlreadyProcessed);

    let ack = deliver(&ctx, &gateway_id).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::AlreadyProcessed);

    assert_eq!(enrollment_count(&ctx, buyer.user_id).await, 2);
    assert_eq!(ctx.notifier.sent().len(), 1);

    let stored = notifications(&ctx).await;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|n| n.processed && n.error.is_none()));
}

#[tokio::test]
async fn pending_payment_is_approved_by_webhook() {
    let ctx = TestContext::new().await;
    ctx.gateway.set_outcome(ChargeOutcome::Pending);
    let buyer = student();
    let response = purchase(&ctx, &buyer).await.unwrap();
    assert_eq!(response.status, PaymentStatus::Pending);
    assert_eq!(enrollment_count(&ctx, buyer.user_id).await, 0);

    let local = only_payment(&ctx, buyer.user_id).await;
    let gateway_id = local.gateway_payment_id.clone().unwrap();
    ctx.gateway.set_remote_status(&gateway_id, "approved");

    let ack = deliver(&ctx, &gateway_id).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Applied);

    let local = only_payment(&ctx, buyer.user_id).await;
    assert_eq!(local.status, PaymentStatus::Approved);
    assert!(local.processed_at.is_some());
    assert_eq!(intent_of(&ctx, &local).await.status, PaymentIntentStatus::Succeeded);
    assert_eq!(enrollment_count(&ctx, buyer.user_id).await, 2);
    assert_eq!(ctx.notifier.sent().len(), 1);

    let stored = notifications(&ctx).await;
    assert_eq!(stored.len(), 1);
    assert!(stored[0].processed);
    assert_eq!(stored[0].gateway_payment_id, gateway_id);
}

#[tokio::test]
async fn pending_payment_is_rejected_by_webhook() {
    let ctx = TestContext::new().await;
    ctx.gateway.set_outcome(ChargeOutcome::Pending);
    let buyer = student();
    purchase(&ctx, &buyer).await.unwrap();

    let local = only_payment(&ctx, buyer.user_id).await;
    let gateway_id = local.gateway_payment_id.clone().unwrap();
    ctx.gateway.set_remote_status(&gateway_id, "rejected");

    let ack = deliver(&ctx, &gateway_id).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Applied);

    let local = only_payment(&ctx, buyer.user_id).await;
    assert_eq!(local.status, PaymentStatus::Rejected);
    assert_eq!(intent_of(&ctx, &local).await.status, PaymentIntentStatus::Failed);
    assert_eq!(enrollment_count(&ctx, buyer.user_id).await, 0);
    assert!(ctx.notifier.sent().is_empty());
}

#[tokio::test]
async fn gateway_still_pending_leaves_payment_pending() {
    let ctx = TestContext::new().await;
    ctx.gateway.set_outcome(ChargeOutcome::Pending);
    let buyer = student();
    purchase(&ctx, &buyer).await.unwrap();

    let local = only_payment(&ctx, buyer.user_id).await;
    let gateway_id = local.gateway_payment_id.clone().unwrap();

    let ack = deliver(&ctx, &gateway_id).await.unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Applied);
    assert_eq!(
        only_payment(&ctx, buyer.user_id).await.status,
        PaymentStatus::Pending
    );
    assert_eq!(intent_of(&ctx, &local).await.status, PaymentIntentStatus::Processing);
}

#[tokio::test]
async fn bad_signatures_are_rejected_without_persisting() {
    let ctx = TestContext::new().await;
    let payload = payment_notification("9000001");

    let missing = ctx
        .state
        .webhooks
        .handle_gateway_webhook(&SignatureHeaders::default(), &payload)
        .await;
    assert_matches!(missing, Err(ServiceError::Unauthorized(_)));

    let mut tampered = signed_headers("9000001");
    tampered.request_id = Some("another-request".to_string());
    assert_matches!(
        ctx.state
            .webhooks
            .handle_gateway_webhook(&tampered, &payload)
            .await,
        Err(ServiceError::Unauthorized(_))
    );

    let signed_for_other_payment = signed_headers("9000002");
    assert_matches!(
        ctx.state
            .webhooks
            .handle_gateway_webhook(&signed_for_other_payment, &payload)
            .await,
        Err(ServiceError::Unauthorized(_))
    );

    let stale_ts = chrono::Utc::now().timestamp() - 3600;
    let manifest = signature_manifest("9000001", "req-stale", stale_ts);
    let stale = SignatureHeaders {
        signature: Some(format!(
            "ts={},v1={}",
            stale_ts,
            sign_manifest(WEBHOOK_SECRET, &manifest).unwrap()
        )),
        request_id: Some("req-stale".to_string()),
    };
    assert_matches!(
        ctx.state.webhooks.handle_gateway_webhook(&stale, &payload).await,
        Err(ServiceError::Unauthorized(_))
    );

    assert!(notifications(&ctx).await.is_empty());
    assert_eq!(ctx.gateway.charge_count(), 0);
}

#[tokio::test]
async fn webhook_without_configured_secret_is_refused() {
    let mut cfg = common::test_config();
    cfg.gateway.webhook_secret = None;
    let ctx = TestContext::with_config(cfg).await;

    assert_matches!(
        deliver(&ctx, "9000001").await,
        Err(ServiceError::Unauthorized(_))
    );
    assert!(notifications(&ctx).await.is_empty());
}

#[tokio::test]
async fn non_payment_topics_are_acknowledged_and_stored() {
    let ctx = TestContext::new().await;
    let payload = json!({
        "id": 555,
        "type": "merchant_order",
        "action": "merchant_order.updated",
        "data": { "id": "123456" }
    });

    let ack = ctx
        .state
        .webhooks
        .handle_gateway_webhook(&signed_headers("123456"), &payload)
        .await
        .unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Ignored);

    let stored = notifications(&ctx).await;
    assert_eq!(stored.len(), 1);
    assert!(stored[0].processed);
    assert_eq!(stored[0].topic, "merchant_order");
}

#[tokio::test]
async fn unknown_payment_stays_unprocessed() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .insert_remote("8000001", "approved", Some(Uuid::new_v4().to_string()));

    let err = deliver(&ctx, "8000001").await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let stored = notifications(&ctx).await;
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].processed);
    assert!(stored[0].error.as_deref().unwrap().contains("8000001"));
    assert!(stored[0].processed_at.is_none());
}

#[tokio::test]
async fn late_approval_after_timeout_is_recovered_by_replay() {
    let ctx = TestContext::new().await;
    ctx.gateway.set_outcome(ChargeOutcome::TransportFailure);
    let buyer = student();
    assert_matches!(
        purchase(&ctx, &buyer).await,
        Err(ServiceError::GatewayUnavailable(_))
    );
    let local = only_payment(&ctx, buyer.user_id).await;
    assert_eq!(local.status, PaymentStatus::Rejected);
    assert!(local.gateway_payment_id.is_none());

    // Gateway has not exposed the payment yet
    let err = deliver(&ctx, "9100001").await.unwrap_err();
    assert_matches!(err, ServiceError::GatewayUnavailable(_));
    let stored = notifications(&ctx).await;
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].processed);

    ctx.gateway
        .insert_remote("9100001", "approved", Some(local.id.to_string()));

    assert_matches!(
        ctx.state
            .webhooks
            .replay_notification(&buyer, stored[0].id)
            .await,
        Err(ServiceError::Forbidden(_))
    );

    let ack = ctx
        .state
        .webhooks
        .replay_notification(&admin(), stored[0].id)
        .await
        .unwrap();
    assert_eq!(ack.outcome, WebhookOutcome::Applied);

    let local = only_payment(&ctx, buyer.user_id).await;
    assert_eq!(local.status, PaymentStatus::Approved);
    assert_eq!(local.gateway_payment_id.as_deref(), Some("9100001"));
    assert_eq!(intent_of(&ctx, &local).await.status, PaymentIntentStatus::Succeeded);
    assert_eq!(enrollment_count(&ctx, buyer.user_id).await, 2);

    assert_matches!(
        ctx.state
            .webhooks
            .replay_notification(&admin(), stored[0].id)
            .await,
        Err(ServiceError::Conflict(_))
    );
}

#[tokio::test]
async fn concurrent_deliveries_settle_once() {
    let ctx = TestContext::new().await;
    ctx.gateway.set_outcome(ChargeOutcome::Pending);
    let buyer = student();
    purchase(&ctx, &buyer).await.unwrap();

    let local = only_payment(&ctx, buyer.user_id).await;
    let gateway_id = local.gateway_payment_id.clone().unwrap();
    ctx.gateway.set_remote_status(&gateway_id, "approved");

    let (first, second) = tokio::join!(deliver(&ctx, &gateway_id), deliver(&ctx, &gateway_id));
    let mut outcomes = vec![first.unwrap().outcome, second.unwrap().outcome];
    outcomes.sort_by_key(|o| matches!(o, WebhookOutcome::AlreadyProcessed));
    assert_eq!(
        outcomes,
        vec![WebhookOutcome::Applied, WebhookOutcome::AlreadyProcessed]
    );

    assert_eq!(enrollment_count(&ctx, buyer.user_id).await, 2);
    assert_eq!(ctx.notifier.sent().len(), 1);
}

#[tokio::test]
async fn http_webhook_endpoint() {
    let ctx = TestContext::new().await;
    ctx.gateway.set_outcome(ChargeOutcome::Pending);
    let buyer = student();
    purchase(&ctx, &buyer).await.unwrap();
    let gateway_id = only_payment(&ctx, buyer.user_id)
        .await
        .gateway_payment_id
        .unwrap();
    ctx.gateway.set_remote_status(&gateway_id, "approved");

    let payload = payment_notification(&gateway_id).to_string();

    let (status, _) = ctx
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/payments/webhook")
                .header("content-type", "application/json")
                .body(Body::from(payload.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = ctx
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/payments/webhook")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let headers = signed_headers(&gateway_id);
    let (status, body) = ctx
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/payments/webhook")
                .header("content-type", "application/json")
                .header("x-signature", headers.signature.unwrap())
                .header("x-request-id", headers.request_id.unwrap())
                .body(Body::from(payload))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], json!("applied"));
    assert_eq!(enrollment_count(&ctx, buyer.user_id).await, 2);
}
