use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, Set,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::{
    course,
    enrollment::{self, EnrollmentStatus},
    payment,
};
use crate::errors::ServiceError;

/// Enrollments granted for one approved payment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionedEnrollments {
    /// One id per purchased course, in purchase order
    pub enrollment_ids: Vec<Uuid>,
    pub course_titles: Vec<String>,
}

/// Grants course access for an approved payment.
///
/// Runs inside the caller's transaction; enrollments and the payment approval
/// commit or roll back together. Must be idempotent per (user, course).
#[async_trait]
pub trait EnrollmentProvisioner: Send + Sync {
    async fn provision(
        &self,
        txn: &DatabaseTransaction,
        payment: &payment::Model,
        course_ids: &[Uuid],
    ) -> Result<ProvisionedEnrollments, ServiceError>;
}

#[derive(Debug, Default, Clone)]
pub struct DbEnrollmentProvisioner;

#[async_trait]
impl EnrollmentProvisioner for DbEnrollmentProvisioner {
    async fn provision(
        &self,
        txn: &DatabaseTransaction,
        payment: &payment::Model,
        course_ids: &[Uuid],
    ) -> Result<ProvisionedEnrollments, ServiceError> {
        let now = Utc::now();
        let mut provisioned = ProvisionedEnrollments::default();

        for course_id in course_ids {
            let title = course::Entity::find_by_id(*course_id)
                .one(txn)
                .await
                .map_err(ServiceError::db_error)?
                .map(|c| c.title)
                .ok_or_else(|| ServiceError::NotFound(format!("Course {} not found", course_id)))?;

            let existing = find_enrollment(txn, payment.user_id, *course_id).await?;

            let enrollment_id = match existing {
                Some(existing) if existing.status.grants_access() => {
                    debug!(
                        enrollment_id = %existing.id,
                        course_id = %course_id,
                        "enrollment already grants access; skipping"
                    );
                    existing.id
                }
                Some(existing) => {
                    let id = existing.id;
                    let mut active: enrollment::ActiveModel = existing.into();
                    active.status = Set(EnrollmentStatus::Active);
                    active.payment_id = Set(Some(payment.id));
                    active.enrolled_at = Set(now);
                    active.expires_at = Set(None);
                    active.completed_at = Set(None);
                    active.updated_at = Set(now);
                    active.update(txn).await.map_err(ServiceError::db_error)?;
                    info!(enrollment_id = %id, course_id = %course_id, "enrollment reactivated");
                    id
                }
                None => {
                    let id = Uuid::new_v4();
                    enrollment::ActiveModel {
                        id: Set(id),
                        user_id: Set(payment.user_id),
                        course_id: Set(*course_id),
                        payment_id: Set(Some(payment.id)),
                        status: Set(EnrollmentStatus::Active),
                        progress_percentage: Set(Decimal::ZERO),
                        enrolled_at: Set(now),
                        expires_at: Set(None),
                        completed_at: Set(None),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                    info!(enrollment_id = %id, course_id = %course_id, "enrollment created");
                    id
                }
            };

            provisioned.enrollment_ids.push(enrollment_id);
            provisioned.course_titles.push(title);
        }

        Ok(provisioned)
    }
}

pub async fn find_enrollment<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    course_id: Uuid,
) -> Result<Option<enrollment::Model>, ServiceError> {
    enrollment::Entity::find()
        .filter(enrollment::Column::UserId.eq(user_id))
        .filter(enrollment::Column::CourseId.eq(course_id))
        .one(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Enrollments of `user_id` that currently grant access to any of `course_ids`
pub async fn active_enrollments<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    course_ids: &[Uuid],
) -> Result<Vec<enrollment::Model>, ServiceError> {
    enrollment::Entity::find()
        .filter(enrollment::Column::UserId.eq(user_id))
        .filter(enrollment::Column::CourseId.is_in(course_ids.iter().copied()))
        .filter(
            enrollment::Column::Status
                .is_in([EnrollmentStatus::Active, EnrollmentStatus::Completed]),
        )
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}
