pub mod transitions;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::Actor;
use crate::config::ModerationSettings;
use crate::entities::{
    course::{self, CourseStatus},
    instructor_profile,
    moderation_audit::{self, ModeratedEntity},
};
use crate::errors::ServiceError;

use transitions::{
    course_transition, instructor_transition, validate_notes, validate_reason, Authority,
    CourseAction, CourseEffect, InstructorAction,
};

/// Course publication and instructor approval workflows
#[derive(Clone)]
pub struct ModerationService {
    db: Arc<DatabaseConnection>,
    settings: ModerationSettings,
}

struct AuditEntry<'a> {
    entity_type: ModeratedEntity,
    entity_id: Uuid,
    from_status: String,
    to_status: String,
    action: &'a str,
    actor_id: Uuid,
    notes: Option<String>,
}

async fn rollback_quietly(txn: DatabaseTransaction) {
    if let Err(e) = txn.rollback().await {
        error!(error = %e, "transaction rollback failed");
    }
}

impl ModerationService {
    pub fn new(db: Arc<DatabaseConnection>, settings: ModerationSettings) -> Self {
        Self { db, settings }
    }

    /// Owner (or admin) submits a draft or revised course for review
    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn request_course_review(
        &self,
        actor: &Actor,
        course_id: Uuid,
    ) -> Result<course::Model, ServiceError> {
        self.transition_course(actor, course_id, CourseAction::RequestReview, None)
            .await
    }

    #[instrument(skip(self, notes), fields(actor_id = %actor.user_id))]
    pub async fn approve_course(
        &self,
        actor: &Actor,
        course_id: Uuid,
        notes: Option<&str>,
    ) -> Result<course::Model, ServiceError> {
        actor.require_admin("approve courses")?;
        let notes = validate_notes(notes, self.settings.reason_max_length)?;
        self.transition_course(actor, course_id, CourseAction::Approve, notes)
            .await
    }

    #[instrument(skip(self, reason), fields(actor_id = %actor.user_id))]
    pub async fn reject_course(
        &self,
        actor: &Actor,
        course_id: Uuid,
        reason: &str,
    ) -> Result<course::Model, ServiceError> {
        actor.require_admin("reject courses")?;
        let reason = validate_reason(reason, self.settings.reason_max_length)?;
        self.transition_course(actor, course_id, CourseAction::Reject, Some(reason))
            .await
    }

    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn archive_course(
        &self,
        actor: &Actor,
        course_id: Uuid,
    ) -> Result<course::Model, ServiceError> {
        self.transition_course(actor, course_id, CourseAction::Archive, None)
            .await
    }

    #[instrument(skip(self), fields(actor_id = %actor.user_id))]
    pub async fn unarchive_course(
        &self,
        actor: &Actor,
        course_id: Uuid,
    ) -> Result<course::Model, ServiceError> {
        self.transition_course(actor, course_id, CourseAction::Unarchive, None)
            .await
    }

    #[instrument(skip(self, notes), fields(actor_id = %actor.user_id))]
    pub async fn approve_instructor(
        &self,
        actor: &Actor,
        user_id: Uuid,
        notes: Option<&str>,
    ) -> Result<instructor_profile::Model, ServiceError> {
        actor.require_admin("approve instructors")?;
        let notes = validate_notes(notes, self.settings.reason_max_length)?;
        self.transition_instructor(actor, user_id, InstructorAction::Approve, notes)
            .await
    }

    #[instrument(skip(self, reason), fields(actor_id = %actor.user_id))]
    pub async fn reject_instructor(
        &self,
        actor: &Actor,
        user_id: Uuid,
        reason: &str,
    ) -> Result<instructor_profile::Model, ServiceError> {
        actor.require_admin("reject instructors")?;
        let reason = validate_reason(reason, self.settings.reason_max_length)?;
        self.transition_instructor(actor, user_id, InstructorAction::Reject, Some(reason))
            .await
    }

    async fn transition_course(
        &self,
        actor: &Actor,
        course_id: Uuid,
        action: CourseAction,
        comment: Option<String>,
    ) -> Result<course::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        match self
            .transition_course_in_txn(&txn, actor, course_id, action, comment)
            .await
        {
            Ok((updated, from)) => {
                txn.commit().await.map_err(ServiceError::db_error)?;
                info!(
                    course_id = %course_id,
                    from = %from,
                    to = %updated.status,
                    action = %action,
                    "course moderation transition"
                );
                counter!(
                    "fagsol_moderation.transitions",
                    1,
                    "entity" => "course",
                    "action" => action.to_string()
                );
                Ok(updated)
            }
            Err(e) => {
                rollback_quietly(txn).await;
                Err(e)
            }
        }
    }

    async fn transition_course_in_txn(
        &self,
        txn: &DatabaseTransaction,
        actor: &Actor,
        course_id: Uuid,
        action: CourseAction,
        comment: Option<String>,
    ) -> Result<(course::Model, CourseStatus), ServiceError> {
        let current = find_course(txn, course_id).await?;

        if action.authority() == Authority::OwnerOrAdmin && !actor.can_act_for(current.owner_id) {
            warn!(
                actor_id = %actor.user_id,
                course_id = %course_id,
                action = %action,
                "course moderation denied to non-owner"
            );
            return Err(ServiceError::Forbidden(
                "only the course owner or an administrator can do that".to_string(),
            ));
        }

        let transition = course_transition(current.status, action, current.archived_from_status)?;
        let now = Utc::now();

        let mut update = course::Entity::update_many()
            .col_expr(course::Column::Status, Expr::value(transition.to.into_value()))
            .col_expr(course::Column::UpdatedAt, Expr::value(now));
        for effect in &transition.effects {
            update = match effect {
                CourseEffect::StampReview => update
                    .col_expr(course::Column::ReviewedBy, Expr::value(Some(actor.user_id)))
                    .col_expr(course::Column::ReviewedAt, Expr::value(Some(now)))
                    .col_expr(course::Column::ReviewComments, Expr::value(comment.clone())),
                CourseEffect::MarkPublished => {
                    update.col_expr(course::Column::PublishedAt, Expr::value(Some(now)))
                }
                CourseEffect::ClearPublished => update.col_expr(
                    course::Column::PublishedAt,
                    Expr::value(Option::<DateTime<Utc>>::None),
                ),
                CourseEffect::RememberArchivedFrom => update.col_expr(
                    course::Column::ArchivedFromStatus,
                    Expr::value(Some(current.status.into_value())),
                ),
                CourseEffect::ClearArchivedFrom => update.col_expr(
                    course::Column::ArchivedFromStatus,
                    Expr::value(Option::<String>::None),
                ),
            };
        }

        let result = update
            .filter(course::Column::Id.eq(course_id))
            .filter(course::Column::Status.eq(current.status))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "course status changed concurrently; reload and retry".to_string(),
            ));
        }

        let notes = if transition.effects.contains(&CourseEffect::StampReview) {
            comment
        } else {
            None
        };
        record_audit(
            txn,
            AuditEntry {
                entity_type: ModeratedEntity::Course,
                entity_id: course_id,
                from_status: current.status.to_string(),
                to_status: transition.to.to_string(),
                action: &action.to_string(),
                actor_id: actor.user_id,
                notes,
            },
        )
        .await?;

        Ok((find_course(txn, course_id).await?, current.status))
    }

    async fn transition_instructor(
        &self,
        actor: &Actor,
        user_id: Uuid,
        action: InstructorAction,
        comment: Option<String>,
    ) -> Result<instructor_profile::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        match self
            .transition_instructor_in_txn(&txn, actor, user_id, action, comment)
            .await
        {
            Ok((updated, audit_action)) => {
                txn.commit().await.map_err(ServiceError::db_error)?;
                if audit_action == "reapprove" {
                    info!(
                        instructor_id = %user_id,
                        reviewer_id = %actor.user_id,
                        "previously rejected instructor re-approved"
                    );
                } else {
                    info!(
                        instructor_id = %user_id,
                        to = %updated.instructor_status,
                        action = audit_action,
                        "instructor moderation transition"
                    );
                }
                counter!(
                    "fagsol_moderation.transitions",
                    1,
                    "entity" => "instructor",
                    "action" => audit_action
                );
                Ok(updated)
            }
            Err(e) => {
                rollback_quietly(txn).await;
                Err(e)
            }
        }
    }

    async fn transition_instructor_in_txn(
        &self,
        txn: &DatabaseTransaction,
        actor: &Actor,
        user_id: Uuid,
        action: InstructorAction,
        comment: Option<String>,
    ) -> Result<(instructor_profile::Model, &'static str), ServiceError> {
        let current = find_instructor(txn, user_id).await?;
        let transition = instructor_transition(current.instructor_status, action)?;
        let now = Utc::now();

        let (rejection_reason, review_notes) = match action {
            InstructorAction::Reject => (comment.clone(), current.review_notes.clone()),
            InstructorAction::Approve => (
                if transition.clears_rejection_reason {
                    None
                } else {
                    current.rejection_reason.clone()
                },
                comment.clone(),
            ),
        };

        let result = instructor_profile::Entity::update_many()
            .col_expr(
                instructor_profile::Column::InstructorStatus,
                Expr::value(transition.to.into_value()),
            )
            .col_expr(
                instructor_profile::Column::RejectionReason,
                Expr::value(rejection_reason),
            )
            .col_expr(instructor_profile::Column::ReviewNotes, Expr::value(review_notes))
            .col_expr(
                instructor_profile::Column::ReviewedBy,
                Expr::value(Some(actor.user_id)),
            )
            .col_expr(instructor_profile::Column::ReviewedAt, Expr::value(Some(now)))
            .col_expr(instructor_profile::Column::UpdatedAt, Expr::value(now))
            .filter(instructor_profile::Column::UserId.eq(user_id))
            .filter(instructor_profile::Column::InstructorStatus.eq(current.instructor_status))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "instructor status changed concurrently; reload and retry".to_string(),
            ));
        }

        let audit_action = transition.audit_action();
        record_audit(
            txn,
            AuditEntry {
                entity_type: ModeratedEntity::Instructor,
                entity_id: user_id,
                from_status: current.instructor_status.to_string(),
                to_status: transition.to.to_string(),
                action: audit_action,
                actor_id: actor.user_id,
                notes: comment,
            },
        )
        .await?;

        Ok((find_instructor(txn, user_id).await?, audit_action))
    }
}

async fn find_course(
    txn: &DatabaseTransaction,
    course_id: Uuid,
) -> Result<course::Model, ServiceError> {
    course::Entity::find_by_id(course_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Course {} not found", course_id)))
}

async fn find_instructor(
    txn: &DatabaseTransaction,
    user_id: Uuid,
) -> Result<instructor_profile::Model, ServiceError> {
    instructor_profile::Entity::find_by_id(user_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Instructor {} not found", user_id)))
}

async fn record_audit(txn: &DatabaseTransaction, entry: AuditEntry<'_>) -> Result<(), ServiceError> {
    moderation_audit::ActiveModel {
        id: Set(Uuid::new_v4()),
        entity_type: Set(entry.entity_type),
        entity_id: Set(entry.entity_id),
        from_status: Set(entry.from_status),
        to_status: Set(entry.to_status),
        action: Set(entry.action.to_string()),
        actor_id: Set(entry.actor_id),
        notes: Set(entry.notes),
        created_at: Set(Utc::now()),
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;
    Ok(())
}
