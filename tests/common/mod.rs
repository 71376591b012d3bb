#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use fagsol_api::{
    auth::{Actor, Claims, UserRole},
    config::AppConfig,
    db::{self, DbConfig},
    entities::{
        course::{self, CourseStatus},
        instructor_profile::{self, InstructorStatus},
        payment,
    },
    errors::ServiceError,
    services::{
        catalog::DbCourseCatalog,
        enrollments::{DbEnrollmentProvisioner, EnrollmentProvisioner, ProvisionedEnrollments},
        notifications::{PaymentNotifier, PaymentReceipt},
        payments::{
            gateway::{
                ChargeRequest, GatewayError, GatewayPayment, GatewayStatus, GuardedGateway,
                PaymentGateway,
            },
            PaymentCollaborators, PaymentService,
        },
        webhooks::{sign_manifest, signature_manifest, SignatureHeaders},
    },
    AppState,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DatabaseTransaction, Set};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const WEBHOOK_SECRET: &str = "whsec_fagsol_test_secret";

/// What the fake gateway answers to the next charges
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Approve,
    Reject(&'static str),
    Pending,
    TransportFailure,
}

/// In-memory gateway that remembers every payment it "created"
pub struct FakeGateway {
    outcome: Mutex<ChargeOutcome>,
    charges: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    payments: Mutex<HashMap<String, GatewayPayment>>,
    requests: Mutex<Vec<ChargeRequest>>,
}

impl FakeGateway {
    pub fn new(outcome: ChargeOutcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            charges: AtomicUsize::new(0),
            delay: Mutex::new(None),
            payments: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_outcome(&self, outcome: ChargeOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn charge_count(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Changes what `fetch_payment` reports for an existing gateway payment
    pub fn set_remote_status(&self, gateway_payment_id: &str, raw_status: &str) {
        let mut payments = self.payments.lock().unwrap();
        if let Some(p) = payments.get_mut(gateway_payment_id) {
            p.raw_status = raw_status.to_string();
            p.status = GatewayStatus::from_gateway(raw_status);
            p.raw["status"] = json!(raw_status);
        }
    }

    /// Registers a payment the gateway knows about but no charge call returned
    pub fn insert_remote(&self, gateway_payment_id: &str, raw_status: &str, external_reference: Option<String>) {
        let payment = GatewayPayment {
            id: gateway_payment_id.to_string(),
            status: GatewayStatus::from_gateway(raw_status),
            raw_status: raw_status.to_string(),
            status_detail: None,
            external_reference: external_reference.clone(),
            raw: json!({
                "id": gateway_payment_id,
                "status": raw_status,
                "external_reference": external_reference,
            }),
        };
        self.payments
            .lock()
            .unwrap()
            .insert(gateway_payment_id.to_string(), payment);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError> {
        let n = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcome.lock().unwrap().clone();
        let (raw_status, detail) = match outcome {
            ChargeOutcome::Approve => ("approved", Some("accredited")),
            ChargeOutcome::Reject(code) => ("rejected", Some(code)),
            ChargeOutcome::Pending => ("in_process", Some("pending_contingency")),
            ChargeOutcome::TransportFailure => {
                return Err(GatewayError::Transport("connection reset".to_string()))
            }
        };

        let id = format!("{}", 9_000_000 + n);
        let payment = GatewayPayment {
            id: id.clone(),
            status: GatewayStatus::from_gateway(raw_status),
            raw_status: raw_status.to_string(),
            status_detail: detail.map(str::to_string),
            external_reference: Some(request.external_reference.clone()),
            raw: json!({
                "id": id,
                "status": raw_status,
                "status_detail": detail,
                "external_reference": request.external_reference,
            }),
        };
        self.payments.lock().unwrap().insert(id, payment.clone());
        Ok(payment)
    }

    async fn fetch_payment(&self, gateway_payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        self.payments
            .lock()
            .unwrap()
            .get(gateway_payment_id)
            .cloned()
            .ok_or(GatewayError::Status {
                status: 404,
                body: "not found".to_string(),
            })
    }
}

/// Notifier that records receipts and can be told to fail
#[derive(Default)]
pub struct RecordingNotifier {
    pub receipts: Mutex<Vec<PaymentReceipt>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<PaymentReceipt> {
        self.receipts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentNotifier for RecordingNotifier {
    async fn send_payment_success_email(&self, receipt: &PaymentReceipt) -> bool {
        self.receipts.lock().unwrap().push(receipt.clone());
        !self.fail.load(Ordering::SeqCst)
    }
}

/// Provisioner that always fails, to exercise rollback
pub struct FailingProvisioner;

#[async_trait]
impl EnrollmentProvisioner for FailingProvisioner {
    async fn provision(
        &self,
        _txn: &DatabaseTransaction,
        _payment: &payment::Model,
        _course_ids: &[Uuid],
    ) -> Result<ProvisionedEnrollments, ServiceError> {
        Err(ServiceError::InternalError(
            "enrollment storage unavailable".to_string(),
        ))
    }
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        JWT_SECRET.to_string(),
        "test".to_string(),
    );
    cfg.gateway.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    cfg.gateway.timeout_secs = 2;
    cfg
}

/// Application wired to an in-memory SQLite database and fake collaborators
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::build(test_config(), Arc::new(DbEnrollmentProvisioner)).await
    }

    pub async fn with_provisioner(provisioner: Arc<dyn EnrollmentProvisioner>) -> Self {
        Self::build(test_config(), provisioner).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        Self::build(cfg, Arc::new(DbEnrollmentProvisioner)).await
    }

    async fn build(cfg: AppConfig, provisioner: Arc<dyn EnrollmentProvisioner>) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let gateway = Arc::new(FakeGateway::new(ChargeOutcome::Approve));
        let notifier = Arc::new(RecordingNotifier::default());

        let collaborators = PaymentCollaborators {
            catalog: Arc::new(DbCourseCatalog::new(db.clone())),
            gateway: Arc::new(GuardedGateway::new(gateway.clone(), &cfg.gateway)),
            notifier: notifier.clone(),
            provisioner,
        };
        let state = AppState::with_collaborators(db.clone(), cfg, collaborators);

        Self {
            db,
            state,
            gateway,
            notifier,
        }
    }

    pub fn payments(&self) -> &PaymentService {
        &self.state.payments
    }

    pub fn router(&self) -> Router {
        fagsol_api::app_router(self.state.clone())
    }

    pub async fn seed_course(&self, price: Decimal, status: CourseStatus) -> Uuid {
        self.seed_course_owned(Uuid::new_v4(), "Curso de prueba", price, status)
            .await
    }

    pub async fn seed_course_owned(
        &self,
        owner_id: Uuid,
        title: &str,
        price: Decimal,
        status: CourseStatus,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        course::ActiveModel {
            id: Set(id),
            owner_id: Set(owner_id),
            title: Set(title.to_string()),
            price: Set(price),
            status: Set(status),
            reviewed_by: Set(None),
            reviewed_at: Set(None),
            review_comments: Set(None),
            published_at: Set(if status == CourseStatus::Published {
                Some(now)
            } else {
                None
            }),
            archived_from_status: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed course");
        id
    }

    pub async fn seed_instructor(&self, status: InstructorStatus) -> Uuid {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        instructor_profile::ActiveModel {
            user_id: Set(user_id),
            display_name: Set("Ing. Prueba".to_string()),
            instructor_status: Set(status),
            rejection_reason: Set(None),
            reviewed_by: Set(None),
            reviewed_at: Set(None),
            review_notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed instructor");
        user_id
    }

    /// Sends a JSON request through the full router
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        actor: Option<&Actor>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(actor) = actor {
            builder = builder.header("authorization", format!("Bearer {}", token_for(actor)));
        }
        let body = body
            .map(|b| Body::from(b.to_string()))
            .unwrap_or_else(Body::empty);
        self.send(builder.body(body).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

pub fn student() -> Actor {
    Actor::new(Uuid::new_v4(), UserRole::Student)
}

pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), UserRole::Admin)
}

pub fn token_for(actor: &Actor) -> String {
    let claims = Claims {
        sub: actor.user_id.to_string(),
        role: actor.role,
        exp: Utc::now().timestamp() + 3600,
        iss: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Signature headers the gateway would send for `data_id`
pub fn signed_headers(data_id: &str) -> SignatureHeaders {
    let request_id = Uuid::new_v4().to_string();
    let ts = Utc::now().timestamp();
    let manifest = signature_manifest(data_id, &request_id, ts);
    let v1 = sign_manifest(WEBHOOK_SECRET, &manifest).unwrap();
    SignatureHeaders {
        signature: Some(format!("ts={},v1={}", ts, v1)),
        request_id: Some(request_id),
    }
}

pub fn payment_notification(data_id: &str) -> Value {
    json!({
        "id": 12345678,
        "type": "payment",
        "action": "payment.updated",
        "live_mode": false,
        "data": { "id": data_id }
    })
}
