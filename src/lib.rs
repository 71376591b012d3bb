//! FagSol API library
//!
//! Payment intents, card charges through the payment gateway, webhook
//! reconciliation, enrollment provisioning and course/instructor moderation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod request_id;
pub mod services;

use axum::{extract::FromRef, response::Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use auth::TokenVerifier;
use services::{
    catalog::DbCourseCatalog,
    enrollments::DbEnrollmentProvisioner,
    moderation::ModerationService,
    notifications::PaymentNotifier,
    payments::{
        gateway::{GuardedGateway, PaymentGateway},
        PaymentCollaborators, PaymentService,
    },
    webhooks::WebhookReconciler,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub payments: Arc<PaymentService>,
    pub webhooks: Arc<WebhookReconciler>,
    pub moderation: Arc<ModerationService>,
    pub gateway: Arc<GuardedGateway>,
    pub tokens: Arc<TokenVerifier>,
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl AppState {
    /// Wires the services with the database-backed catalog and provisioner
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn PaymentNotifier>,
    ) -> Self {
        let collaborators = PaymentCollaborators {
            catalog: Arc::new(DbCourseCatalog::new(db.clone())),
            gateway: Arc::new(GuardedGateway::new(gateway, &config.gateway)),
            notifier,
            provisioner: Arc::new(DbEnrollmentProvisioner),
        };
        Self::with_collaborators(db, config, collaborators)
    }

    pub fn with_collaborators(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        collaborators: PaymentCollaborators,
    ) -> Self {
        let gateway = collaborators.gateway.clone();
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            collaborators,
            config.payment.clone(),
        ));
        let webhooks = Arc::new(WebhookReconciler::new(
            db.clone(),
            payments.clone(),
            gateway.clone(),
            config.gateway.webhook_secret.clone(),
            config.gateway.webhook_tolerance_secs,
        ));
        let moderation = Arc::new(ModerationService::new(
            db.clone(),
            config.moderation.clone(),
        ));
        let tokens = Arc::new(TokenVerifier::new(
            &config.jwt_secret,
            config.auth_issuer.as_deref(),
        ));

        Self {
            db,
            config: Arc::new(config),
            payments,
            webhooks,
            moderation,
            gateway,
            tokens,
        }
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: request_id::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Versioned API: payments, webhooks and moderation
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/payments", handlers::payments::payments_routes())
        .nest("/courses", handlers::moderation::course_routes())
        .nest("/instructors", handlers::moderation::instructor_routes())
}

/// Full application router with request ids, HTTP tracing and a request timeout
pub fn app_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();
    Router::new()
        .nest("/health", handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}
