pub mod amount;
pub mod gateway;
pub mod idempotency;
pub mod mercadopago;
pub mod state_machine;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Actor, UserRole};
use crate::config::{validate_positive_decimal, PaymentSettings};
use crate::entities::{
    payment::{self, PaymentStatus},
    payment_intent::{self, PaymentIntentStatus},
};
use crate::errors::ServiceError;
use crate::services::catalog::CourseCatalog;
use crate::services::enrollments::{self, EnrollmentProvisioner, ProvisionedEnrollments};
use crate::services::notifications::{PaymentNotifier, PaymentReceipt};

use gateway::{
    decline_message, ChargeRequest, GatewayError, GatewayPayment, GatewayStatus, GuardedGateway,
    Payer,
};
use state_machine::{ChargeRefusal, Settlement, SideEffect, Step};

/// Request to price a set of courses
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePaymentIntentRequest {
    #[validate(length(min = 1))]
    pub course_ids: Vec<Uuid>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentItem {
    pub course_id: Uuid,
    pub title: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentResponse {
    pub id: Uuid,
    pub total: Decimal,
    pub currency: String,
    pub items: Vec<IntentItem>,
    pub status: PaymentIntentStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Request to charge a tokenized card against an intent
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProcessPaymentRequest {
    pub payment_intent_id: Uuid,
    /// Gateway-issued card token
    #[validate(length(min = 1, max = 255))]
    pub token: String,
    #[validate(length(min = 1, max = 64))]
    pub payment_method_id: String,
    #[validate(range(min = 1))]
    pub installments: u32,
    #[validate(custom = "validate_positive_decimal")]
    pub amount: Decimal,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    #[validate(email)]
    pub payer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub enrollment_ids: Vec<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentView {
    pub id: Uuid,
    pub payment_intent_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub installments: i32,
    pub payment_method_id: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_status: Option<String>,
    pub gateway_status_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<payment::Model> for PaymentView {
    fn from(p: payment::Model) -> Self {
        Self {
            id: p.id,
            payment_intent_id: p.payment_intent_id,
            amount: p.amount,
            currency: p.currency,
            status: p.status,
            installments: p.installments,
            payment_method_id: p.payment_method_id,
            gateway_payment_id: p.gateway_payment_id,
            gateway_status: p.gateway_status,
            gateway_status_detail: p.gateway_status_detail,
            created_at: p.created_at,
            processed_at: p.processed_at,
        }
    }
}

/// What the gateway told us about a charge, or why it could not
#[derive(Debug, Clone, Copy)]
pub enum GatewayVerdict<'a> {
    Payment(&'a GatewayPayment),
    Failure(&'a GatewayError),
}

impl GatewayVerdict<'_> {
    fn settlement(&self) -> Settlement {
        match self {
            Self::Payment(gp) => match gp.status {
                GatewayStatus::Approved => Settlement::Approved,
                GatewayStatus::Rejected => Settlement::Rejected,
                GatewayStatus::Pending => Settlement::Pending,
            },
            Self::Failure(_) => Settlement::InfrastructureError,
        }
    }
}

/// Result of applying a gateway verdict to a local payment
#[derive(Debug, Clone)]
pub enum Settled {
    Approved {
        payment: payment::Model,
        enrollments: ProvisionedEnrollments,
        /// Post-commit effects still owed for this approval
        effects: Vec<SideEffect>,
    },
    AlreadyApproved {
        payment: payment::Model,
    },
    Rejected {
        payment: payment::Model,
    },
    Pending {
        payment: payment::Model,
    },
    /// Gateway approved this payment but another payment already settled the intent
    DuplicateCapture {
        payment: payment::Model,
        approved_payment_id: Uuid,
    },
    Ignored {
        payment: payment::Model,
        reason: &'static str,
    },
}

impl Settled {
    pub fn payment(&self) -> &payment::Model {
        match self {
            Self::Approved { payment, .. }
            | Self::AlreadyApproved { payment }
            | Self::Rejected { payment }
            | Self::Pending { payment }
            | Self::DuplicateCapture { payment, .. }
            | Self::Ignored { payment, .. } => payment,
        }
    }
}

/// Injected collaborators of the payment service
#[derive(Clone)]
pub struct PaymentCollaborators {
    pub catalog: Arc<dyn CourseCatalog>,
    pub gateway: Arc<GuardedGateway>,
    pub notifier: Arc<dyn PaymentNotifier>,
    pub provisioner: Arc<dyn EnrollmentProvisioner>,
}

/// Owns the payment intent and payment lifecycle
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn CourseCatalog>,
    gateway: Arc<GuardedGateway>,
    notifier: Arc<dyn PaymentNotifier>,
    provisioner: Arc<dyn EnrollmentProvisioner>,
    settings: PaymentSettings,
}

async fn rollback_quietly(txn: DatabaseTransaction) {
    if let Err(e) = txn.rollback().await {
        error!(error = %e, "transaction rollback failed");
    }
}

/// Deduplicates course ids, keeping first occurrence order
fn dedupe_course_ids(course_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    course_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        collaborators: PaymentCollaborators,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            db,
            catalog: collaborators.catalog,
            gateway: collaborators.gateway,
            notifier: collaborators.notifier,
            provisioner: collaborators.provisioner,
            settings,
        }
    }

    /// Prices the requested courses server side and opens a time-boxed intent
    #[instrument(skip(self, request), fields(user_id = %actor.user_id))]
    pub async fn create_payment_intent(
        &self,
        actor: &Actor,
        request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        request.validate()?;

        if actor.role == UserRole::Guest {
            warn!(actor_id = %actor.user_id, "guest attempted to open a payment intent");
            return Err(ServiceError::Forbidden(
                "sign in to purchase courses".to_string(),
            ));
        }

        let course_ids = dedupe_course_ids(&request.course_ids);
        if course_ids.len() > self.settings.max_courses_per_intent {
            return Err(ServiceError::ValidationError(format!(
                "at most {} courses can be purchased at once",
                self.settings.max_courses_per_intent
            )));
        }

        let mut items = Vec::with_capacity(course_ids.len());
        for course_id in &course_ids {
            if !self.catalog.course_exists_and_published(*course_id).await? {
                return Err(ServiceError::ValidationError(format!(
                    "course {} is not available for purchase",
                    course_id
                )));
            }
            let price = self.catalog.get_course_price(*course_id).await?;
            let title = self
                .catalog
                .course_title(*course_id)
                .await?
                .unwrap_or_else(|| course_id.to_string());
            items.push(IntentItem {
                course_id: *course_id,
                title,
                price,
            });
        }

        let owned = enrollments::active_enrollments(&*self.db, actor.user_id, &course_ids).await?;
        if let Some(existing) = owned.first() {
            return Err(ServiceError::Conflict(format!(
                "already enrolled in course {}",
                existing.course_id
            )));
        }

        let total: Decimal = items.iter().map(|item| item.price).sum();
        if total <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "free courses do not need a payment".to_string(),
            ));
        }

        let now = Utc::now();
        let intent = payment_intent::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(actor.user_id),
            total: Set(total),
            currency: Set(self.settings.currency.clone()),
            course_ids: Set(serde_json::to_value(&course_ids)?),
            status: Set(PaymentIntentStatus::Pending),
            metadata: Set(Some(json!({ "items": items, "client": request.metadata }))),
            expires_at: Set(now + self.settings.intent_ttl()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(
            intent_id = %intent.id,
            total = %intent.total,
            courses = course_ids.len(),
            "payment intent created"
        );
        counter!("fagsol_payments.intents_created", 1);

        Ok(PaymentIntentResponse {
            id: intent.id,
            total: intent.total,
            currency: intent.currency,
            items,
            status: intent.status,
            expires_at: intent.expires_at,
            created_at: intent.created_at,
        })
    }

    /// Reads an intent, cancelling it first if it is past its expiry
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn get_payment_intent(
        &self,
        actor: &Actor,
        intent_id: Uuid,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        let intent = self.find_intent(intent_id).await?;
        if !actor.can_act_for(intent.user_id) {
            warn!(actor_id = %actor.user_id, intent_id = %intent_id, "intent read denied");
            return Err(ServiceError::Forbidden(
                "payment intent belongs to another user".to_string(),
            ));
        }

        let intent = self.apply_lazy_expiry(intent, Utc::now()).await?;
        let items = intent
            .metadata
            .as_ref()
            .and_then(|m| m.get("items"))
            .cloned()
            .map(serde_json::from_value::<Vec<IntentItem>>)
            .transpose()?
            .unwrap_or_default();

        Ok(PaymentIntentResponse {
            id: intent.id,
            total: intent.total,
            currency: intent.currency,
            items,
            status: intent.status,
            expires_at: intent.expires_at,
            created_at: intent.created_at,
        })
    }

    /// Charges a tokenized card against an intent.
    ///
    /// Guards run before any payment row exists: ownership, idempotency,
    /// expiry and state, existing enrollments, then amount integrity. The gateway is called outside
    /// any transaction; its verdict is applied in one.
    #[instrument(skip(self, request), fields(user_id = %actor.user_id, intent_id = %request.payment_intent_id))]
    pub async fn process_payment(
        &self,
        actor: &Actor,
        request: ProcessPaymentRequest,
    ) -> Result<ProcessPaymentResponse, ServiceError> {
        request.validate()?;
        if request.installments > self.settings.max_installments {
            return Err(ServiceError::ValidationError(format!(
                "installments must be between 1 and {}",
                self.settings.max_installments
            )));
        }

        let intent = self.find_intent(request.payment_intent_id).await?;
        if intent.user_id != actor.user_id {
            warn!(
                actor_id = %actor.user_id,
                owner_id = %intent.user_id,
                "charge attempted on another user's intent"
            );
            return Err(ServiceError::Forbidden(
                "payment intent belongs to another user".to_string(),
            ));
        }

        let idempotency_key = idempotency::resolve_key(request.idempotency_key.as_deref())?;
        idempotency::ensure_unused(&*self.db, &idempotency_key).await?;

        let now = Utc::now();
        let expired = intent.is_expired_at(now);
        if let Err(refusal) = state_machine::begin_charge(intent.status, expired) {
            if refusal == ChargeRefusal::Expired {
                self.apply_lazy_expiry(intent, now).await?;
            }
            return Err(refusal.into());
        }

        let course_ids = intent.course_ids()?;
        let owned = enrollments::active_enrollments(&*self.db, actor.user_id, &course_ids).await?;
        if let Some(existing) = owned.first() {
            warn!(
                course_id = %existing.course_id,
                enrollment_id = %existing.id,
                "charge refused; buyer already enrolled through another intent"
            );
            return Err(ServiceError::Conflict(format!(
                "already enrolled in course {}",
                existing.course_id
            )));
        }

        let recomputed = amount::recompute_total(self.catalog.as_ref(), &course_ids).await?;
        amount::verify_amount(intent.id, intent.total, recomputed, request.amount)?;

        let payment = self
            .open_charge(&intent, &request, idempotency_key.clone(), now)
            .await?;

        info!(payment_id = %payment.id, "charging card");
        let charge = ChargeRequest {
            token: request.token.clone(),
            amount: intent.total,
            currency: intent.currency.clone(),
            installments: request.installments,
            payment_method_id: request.payment_method_id.clone(),
            payer: Payer {
                user_id: actor.user_id,
                email: request.payer_email.clone(),
            },
            external_reference: payment.id.to_string(),
            idempotency_key,
            description: format!("FagSol Escuela Virtual - {} curso(s)", course_ids.len()),
            metadata: json!({
                "payment_intent_id": intent.id,
                "payment_id": payment.id,
            }),
        };

        let settled = match self.gateway.charge(&charge).await {
            Ok(gateway_payment) => {
                self.apply_settlement(payment.id, GatewayVerdict::Payment(&gateway_payment))
                    .await
                    .map_err(|e| {
                        error!(
                            payment_id = %payment.id,
                            gateway_payment_id = %gateway_payment.id,
                            error = %e,
                            "gateway verdict could not be recorded; awaiting webhook reconciliation"
                        );
                        e
                    })?
            }
            Err(gateway_error) => {
                counter!("fagsol_payments.infra_error", 1, "kind" => gateway_error.kind());
                if let Err(e) = self
                    .apply_settlement(payment.id, GatewayVerdict::Failure(&gateway_error))
                    .await
                {
                    error!(payment_id = %payment.id, error = %e, "failed to record gateway failure");
                }
                return Err(ServiceError::GatewayUnavailable(gateway_error.to_string()));
            }
        };

        self.charge_response(&intent, settled).await
    }

    /// Reads one payment; owner or admin only
    #[instrument(skip(self), fields(user_id = %actor.user_id))]
    pub async fn get_payment(
        &self,
        actor: &Actor,
        payment_id: Uuid,
    ) -> Result<PaymentView, ServiceError> {
        let payment = payment::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;

        if !actor.can_act_for(payment.user_id) {
            warn!(actor_id = %actor.user_id, payment_id = %payment_id, "payment read denied");
            return Err(ServiceError::Forbidden(
                "payment belongs to another user".to_string(),
            ));
        }

        Ok(payment.into())
    }

    /// Applies a gateway verdict to a local payment in one transaction.
    ///
    /// Shared by the synchronous charge path and the webhook reconciler. The
    /// approved check comes first and the status write is a compare-and-set,
    /// so whichever path commits first wins and the other becomes a no-op.
    #[instrument(skip(self, verdict))]
    pub async fn apply_settlement(
        &self,
        payment_id: Uuid,
        verdict: GatewayVerdict<'_>,
    ) -> Result<Settled, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let settled = match self.settle_in_txn(&txn, payment_id, verdict).await {
            Ok(settled) => settled,
            Err(e) => {
                rollback_quietly(txn).await;
                return Err(e);
            }
        };

        txn.commit().await.map_err(ServiceError::db_error)?;
        self.after_commit(&settled).await;
        Ok(settled)
    }

    async fn settle_in_txn(
        &self,
        txn: &DatabaseTransaction,
        payment_id: Uuid,
        verdict: GatewayVerdict<'_>,
    ) -> Result<Settled, ServiceError> {
        let current = find_payment(txn, payment_id).await?;

        let transition = match state_machine::settle(current.status, verdict.settlement()) {
            Step::AlreadyApproved => {
                info!(payment_id = %payment_id, "payment already approved; nothing to do");
                return Ok(Settled::AlreadyApproved { payment: current });
            }
            Step::Ignore(reason) => {
                warn!(
                    payment_id = %payment_id,
                    local_status = %current.status,
                    reason,
                    "gateway verdict disagrees with local state; leaving as is"
                );
                return Ok(Settled::Ignored {
                    payment: current,
                    reason,
                });
            }
            Step::Apply(transition) => transition,
        };

        if transition.payment == PaymentStatus::Approved {
            let other_approved = payment::Entity::find()
                .filter(payment::Column::PaymentIntentId.eq(current.payment_intent_id))
                .filter(payment::Column::Status.eq(PaymentStatus::Approved))
                .filter(payment::Column::Id.ne(current.id))
                .one(txn)
                .await
                .map_err(ServiceError::db_error)?;

            if let Some(other) = other_approved {
                error!(
                    payment_id = %current.id,
                    approved_payment_id = %other.id,
                    intent_id = %current.payment_intent_id,
                    "gateway captured a second payment for a settled intent; manual refund required"
                );
                counter!("fagsol_payments.duplicate_capture", 1);
                return Ok(Settled::DuplicateCapture {
                    payment: current,
                    approved_payment_id: other.id,
                });
            }
        }

        let now = Utc::now();
        let (gateway_payment_id, gateway_status, gateway_detail, gateway_response) = match verdict {
            GatewayVerdict::Payment(gp) => (
                Some(gp.id.clone()),
                gp.raw_status.clone(),
                gp.status_detail.clone(),
                gp.raw.clone(),
            ),
            GatewayVerdict::Failure(err) => (
                current.gateway_payment_id.clone(),
                "error".to_string(),
                Some(err.kind().to_string()),
                json!({ "error": err.to_string() }),
            ),
        };
        let processed_at = if transition.payment == PaymentStatus::Pending {
            None
        } else {
            Some(now)
        };

        let updated = payment::Entity::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(transition.payment.into_value()),
            )
            .col_expr(payment::Column::GatewayPaymentId, Expr::value(gateway_payment_id))
            .col_expr(payment::Column::GatewayStatus, Expr::value(Some(gateway_status)))
            .col_expr(payment::Column::GatewayStatusDetail, Expr::value(gateway_detail))
            .col_expr(
                payment::Column::GatewayResponse,
                Expr::value(Some(gateway_response)),
            )
            .col_expr(payment::Column::ProcessedAt, Expr::value(processed_at))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::Id.eq(current.id))
            .filter(payment::Column::Status.eq(current.status))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        if updated.rows_affected == 0 {
            let latest = find_payment(txn, payment_id).await?;
            if latest.status == PaymentStatus::Approved {
                info!(payment_id = %payment_id, "payment approved concurrently by the other path");
                return Ok(Settled::AlreadyApproved { payment: latest });
            }
            return Err(ServiceError::Conflict(
                "payment changed while its gateway verdict was being applied".to_string(),
            ));
        }

        if let Some(next_intent) = transition.intent {
            let mut update = payment_intent::Entity::update_many()
                .col_expr(
                    payment_intent::Column::Status,
                    Expr::value(next_intent.into_value()),
                )
                .col_expr(payment_intent::Column::UpdatedAt, Expr::value(now))
                .filter(payment_intent::Column::Id.eq(current.payment_intent_id));
            // Captured money settles the intent whatever it reads now; other outcomes only release a claim
            if next_intent != PaymentIntentStatus::Succeeded {
                update = update
                    .filter(payment_intent::Column::Status.eq(PaymentIntentStatus::Processing));
            }
            update.exec(txn).await.map_err(ServiceError::db_error)?;
        }

        let payment = find_payment(txn, payment_id).await?;

        let enrollments = if transition
            .effects
            .contains(&SideEffect::ProvisionEnrollments)
        {
            let intent = payment_intent::Entity::find_by_id(payment.payment_intent_id)
                .one(txn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Payment intent {} not found",
                        payment.payment_intent_id
                    ))
                })?;
            let course_ids = intent.course_ids()?;
            self.provisioner
                .provision(txn, &payment, &course_ids)
                .await?
        } else {
            ProvisionedEnrollments::default()
        };

        Ok(match payment.status {
            PaymentStatus::Approved => Settled::Approved {
                payment,
                enrollments,
                effects: transition.effects,
            },
            PaymentStatus::Rejected => Settled::Rejected { payment },
            PaymentStatus::Pending => Settled::Pending { payment },
        })
    }

    /// Post-commit work; never fails the settlement
    async fn after_commit(&self, settled: &Settled) {
        match settled {
            Settled::Approved {
                payment,
                enrollments,
                effects,
            } => {
                info!(
                    payment_id = %payment.id,
                    enrollments = enrollments.enrollment_ids.len(),
                    "payment approved"
                );
                counter!("fagsol_payments.approved", 1);

                if !effects.contains(&SideEffect::SendReceipt) {
                    return;
                }
                let receipt = PaymentReceipt {
                    user_id: payment.user_id,
                    payment_id: payment.id,
                    amount: payment.amount,
                    currency: payment.currency.clone(),
                    course_names: enrollments.course_titles.clone(),
                };
                if !self.notifier.send_payment_success_email(&receipt).await {
                    warn!(payment_id = %payment.id, "payment success email could not be sent");
                }
            }
            Settled::Rejected { payment } => {
                if payment.gateway_status.as_deref() == Some("error") {
                    info!(payment_id = %payment.id, "payment voided after gateway failure");
                } else {
                    info!(
                        payment_id = %payment.id,
                        status_detail = ?payment.gateway_status_detail,
                        "payment rejected"
                    );
                    counter!("fagsol_payments.rejected", 1);
                }
            }
            Settled::Pending { payment } => {
                info!(payment_id = %payment.id, "payment pending at gateway");
                counter!("fagsol_payments.pending", 1);
            }
            Settled::AlreadyApproved { .. }
            | Settled::DuplicateCapture { .. }
            | Settled::Ignored { .. } => {}
        }
    }

    async fn charge_response(
        &self,
        intent: &payment_intent::Model,
        settled: Settled,
    ) -> Result<ProcessPaymentResponse, ServiceError> {
        match settled {
            Settled::Approved {
                payment,
                enrollments,
                ..
            } => Ok(ProcessPaymentResponse {
                payment_id: payment.id,
                status: payment.status,
                enrollment_ids: enrollments.enrollment_ids,
                amount: payment.amount,
                currency: payment.currency,
                message: None,
            }),
            Settled::AlreadyApproved { payment } => {
                let course_ids = intent.course_ids()?;
                let owned =
                    enrollments::active_enrollments(&*self.db, payment.user_id, &course_ids)
                        .await?;
                let enrollment_ids = course_ids
                    .iter()
                    .filter_map(|course_id| {
                        owned
                            .iter()
                            .find(|e| e.course_id == *course_id)
                            .map(|e| e.id)
                    })
                    .collect();
                Ok(ProcessPaymentResponse {
                    payment_id: payment.id,
                    status: payment.status,
                    enrollment_ids,
                    amount: payment.amount,
                    currency: payment.currency,
                    message: None,
                })
            }
            Settled::Pending { payment } => Ok(ProcessPaymentResponse {
                payment_id: payment.id,
                status: payment.status,
                enrollment_ids: Vec::new(),
                amount: payment.amount,
                currency: payment.currency,
                message: Some(
                    "Tu pago está en proceso. Te avisaremos cuando se confirme.".to_string(),
                ),
            }),
            Settled::Rejected { payment } => Err(ServiceError::PaymentDeclined {
                message: decline_message(payment.gateway_status_detail.as_deref()),
                code: payment.gateway_status_detail,
            }),
            Settled::DuplicateCapture { .. } | Settled::Ignored { .. } => Err(
                ServiceError::Conflict("payment intent was settled by another payment".to_string()),
            ),
        }
    }

    /// Inserts the pending payment and claims the intent in one transaction
    async fn open_charge(
        &self,
        intent: &payment_intent::Model,
        request: &ProcessPaymentRequest,
        idempotency_key: String,
        now: DateTime<Utc>,
    ) -> Result<payment::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let inserted = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_intent_id: Set(intent.id),
            user_id: Set(intent.user_id),
            amount: Set(intent.total),
            currency: Set(intent.currency.clone()),
            gateway_token: Set(request.token.clone()),
            payment_method_id: Set(request.payment_method_id.clone()),
            installments: Set(request.installments as i32),
            idempotency_key: Set(idempotency_key.clone()),
            gateway_payment_id: Set(None),
            gateway_status: Set(None),
            gateway_status_detail: Set(None),
            gateway_response: Set(None),
            status: Set(PaymentStatus::Pending),
            created_at: Set(now),
            updated_at: Set(now),
            processed_at: Set(None),
        }
        .insert(&txn)
        .await;

        let payment = match inserted {
            Ok(payment) => payment,
            Err(e) => {
                rollback_quietly(txn).await;
                return Err(idempotency::map_insert_error(e, &idempotency_key));
            }
        };

        let claimed = payment_intent::Entity::update_many()
            .col_expr(
                payment_intent::Column::Status,
                Expr::value(PaymentIntentStatus::Processing.into_value()),
            )
            .col_expr(payment_intent::Column::UpdatedAt, Expr::value(now))
            .filter(payment_intent::Column::Id.eq(intent.id))
            .filter(
                payment_intent::Column::Status
                    .is_in([PaymentIntentStatus::Pending, PaymentIntentStatus::Failed]),
            )
            .exec(&txn)
            .await;

        match claimed {
            Ok(result) if result.rows_affected == 1 => {}
            Ok(_) => {
                rollback_quietly(txn).await;
                return Err(ChargeRefusal::InFlight.into());
            }
            Err(e) => {
                rollback_quietly(txn).await;
                return Err(ServiceError::db_error(e));
            }
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(payment)
    }

    async fn find_intent(&self, intent_id: Uuid) -> Result<payment_intent::Model, ServiceError> {
        payment_intent::Entity::find_by_id(intent_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment intent {} not found", intent_id)))
    }

    async fn apply_lazy_expiry(
        &self,
        intent: payment_intent::Model,
        now: DateTime<Utc>,
    ) -> Result<payment_intent::Model, ServiceError> {
        let Some(next) = state_machine::on_read(intent.status, intent.is_expired_at(now)) else {
            return Ok(intent);
        };

        let result = payment_intent::Entity::update_many()
            .col_expr(payment_intent::Column::Status, Expr::value(next.into_value()))
            .col_expr(payment_intent::Column::UpdatedAt, Expr::value(now))
            .filter(payment_intent::Column::Id.eq(intent.id))
            .filter(payment_intent::Column::Status.eq(intent.status))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return self.find_intent(intent.id).await;
        }

        info!(intent_id = %intent.id, from = %intent.status, "expired payment intent cancelled");
        Ok(payment_intent::Model {
            status: next,
            updated_at: now,
            ..intent
        })
    }
}

async fn find_payment(
    txn: &DatabaseTransaction,
    payment_id: Uuid,
) -> Result<payment::Model, ServiceError> {
    payment::Entity::find_by_id(payment_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_eq!(dedupe_course_ids(&[b, a, b, c, a]), vec![b, a, c]);
    }

    #[test]
    fn process_request_validation() {
        let request = ProcessPaymentRequest {
            payment_intent_id: Uuid::new_v4(),
            token: String::new(),
            payment_method_id: "visa".into(),
            installments: 0,
            amount: Decimal::ZERO,
            idempotency_key: None,
            payer_email: Some("not-an-email".into()),
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("token"));
        assert!(fields.contains_key("installments"));
        assert!(fields.contains_key("amount"));
        assert!(fields.contains_key("payer_email"));
    }
}
