use metrics::counter;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, SqlErr};
use tracing::warn;
use uuid::Uuid;

use crate::entities::payment;
use crate::errors::ServiceError;

const MAX_KEY_LEN: usize = 255;

fn duplicate_submission() -> ServiceError {
    ServiceError::IntegrityViolation(
        "duplicate submission: a payment with this idempotency key already exists".to_string(),
    )
}

/// Uses the caller's key when present, otherwise generates one.
pub fn resolve_key(supplied: Option<&str>) -> Result<String, ServiceError> {
    match supplied.map(str::trim) {
        None => Ok(Uuid::new_v4().to_string()),
        Some("") => Err(ServiceError::ValidationError(
            "idempotency_key must not be blank".to_string(),
        )),
        Some(key) if key.len() > MAX_KEY_LEN => Err(ServiceError::ValidationError(format!(
            "idempotency_key must be at most {} characters",
            MAX_KEY_LEN
        ))),
        Some(key) => Ok(key.to_string()),
    }
}

/// Fails with a duplicate-submission error when a payment already holds `key`.
pub async fn ensure_unused<C: ConnectionTrait>(db: &C, key: &str) -> Result<(), ServiceError> {
    let existing = payment::Entity::find()
        .filter(payment::Column::IdempotencyKey.eq(key))
        .one(db)
        .await
        .map_err(ServiceError::db_error)?;

    match existing {
        Some(existing) => {
            warn!(
                idempotency_key = key,
                existing_payment_id = %existing.id,
                "duplicate payment submission rejected"
            );
            counter!("fagsol_payments.integrity_rejected", 1, "reason" => "duplicate_key");
            Err(duplicate_submission())
        }
        None => Ok(()),
    }
}

/// Maps a failed payment insert; a unique violation means a concurrent duplicate won the race.
pub fn map_insert_error(err: DbErr, key: &str) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            warn!(
                idempotency_key = key,
                "concurrent duplicate payment submission rejected at insert"
            );
            counter!("fagsol_payments.integrity_rejected", 1, "reason" => "duplicate_key");
            duplicate_submission()
        }
        _ => ServiceError::db_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_key_when_absent() {
        let a = resolve_key(None).unwrap();
        let b = resolve_key(None).unwrap();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn keeps_trimmed_client_key() {
        assert_eq!(resolve_key(Some("  order-42 ")).unwrap(), "order-42");
    }

    #[test]
    fn rejects_blank_and_oversized_keys() {
        assert!(matches!(
            resolve_key(Some("   ")),
            Err(ServiceError::ValidationError(_))
        ));
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            resolve_key(Some(&long)),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
