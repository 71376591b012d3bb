//! Server-side price authority.
//!
//! Totals are always recomputed from persisted course prices; a caller-supplied
//! amount is only ever compared, never trusted.

use metrics::counter;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::catalog::CourseCatalog;

/// Sums the current persisted price of every course, in order.
pub async fn recompute_total(
    catalog: &dyn CourseCatalog,
    course_ids: &[Uuid],
) -> Result<Decimal, ServiceError> {
    let mut total = Decimal::ZERO;
    for course_id in course_ids {
        total += catalog.get_course_price(*course_id).await?;
    }
    Ok(total)
}

/// Compares the stored intent total, the freshly recomputed total and the
/// caller's amount using exact decimal equality.
///
/// Error messages carry neither amount; both are logged.
pub fn verify_amount(
    intent_id: Uuid,
    stored_total: Decimal,
    recomputed_total: Decimal,
    supplied: Decimal,
) -> Result<(), ServiceError> {
    if recomputed_total != stored_total {
        warn!(
            intent_id = %intent_id,
            stored_total = %stored_total,
            recomputed_total = %recomputed_total,
            "course prices changed after payment intent creation"
        );
        counter!("fagsol_payments.integrity_rejected", 1, "reason" => "price_changed");
        return Err(ServiceError::IntegrityViolation(
            "course prices changed since this payment intent was created; create a new payment intent"
                .to_string(),
        ));
    }

    if supplied != stored_total {
        warn!(
            intent_id = %intent_id,
            expected = %stored_total,
            supplied = %supplied,
            "payment amount does not match intent total"
        );
        counter!("fagsol_payments.integrity_rejected", 1, "reason" => "amount_mismatch");
        return Err(ServiceError::IntegrityViolation(
            "payment amount does not match the payment intent".to_string(),
        ));
    }

    Ok(())
}
