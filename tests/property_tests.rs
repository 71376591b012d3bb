//! Property-based tests for pricing, idempotency keys and payment transitions.

use std::collections::HashMap;

use async_trait::async_trait;
use fagsol_api::{
    entities::{payment::PaymentStatus, payment_intent::PaymentIntentStatus},
    errors::ServiceError,
    services::{
        catalog::CourseCatalog,
        payments::{
            amount::{recompute_total, verify_amount},
            gateway::decline_message,
            idempotency::resolve_key,
            state_machine::{begin_charge, on_read, settle, Settlement, Step},
        },
        webhooks::signature_manifest,
    },
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

struct MapCatalog(HashMap<Uuid, Decimal>);

#[async_trait]
impl CourseCatalog for MapCatalog {
    async fn get_course_price(&self, course_id: Uuid) -> Result<Decimal, ServiceError> {
        self.0
            .get(&course_id)
            .copied()
            .ok_or_else(|| ServiceError::NotFound(course_id.to_string()))
    }

    async fn course_exists_and_published(&self, course_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.0.contains_key(&course_id))
    }

    async fn course_title(&self, _course_id: Uuid) -> Result<Option<String>, ServiceError> {
        Ok(None)
    }
}

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn intent_status_strategy() -> impl Strategy<Value = PaymentIntentStatus> {
    prop_oneof![
        Just(PaymentIntentStatus::Pending),
        Just(PaymentIntentStatus::Processing),
        Just(PaymentIntentStatus::Succeeded),
        Just(PaymentIntentStatus::Failed),
        Just(PaymentIntentStatus::Cancelled),
    ]
}

fn settlement_strategy() -> impl Strategy<Value = Settlement> {
    prop_oneof![
        Just(Settlement::Approved),
        Just(Settlement::Rejected),
        Just(Settlement::Pending),
        Just(Settlement::InfrastructureError),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn recomputed_total_is_the_sum_of_prices(prices in prop::collection::vec(price_strategy(), 1..12)) {
        let entries: Vec<(Uuid, Decimal)> = prices.iter().map(|p| (Uuid::new_v4(), *p)).collect();
        let ids: Vec<Uuid> = entries.iter().map(|(id, _)| *id).collect();
        let catalog = MapCatalog(entries.into_iter().collect());

        let total = runtime().block_on(recompute_total(&catalog, &ids)).unwrap();
        prop_assert_eq!(total, prices.iter().copied().sum::<Decimal>());
    }

    #[test]
    fn unknown_course_fails_recomputation(prices in prop::collection::vec(price_strategy(), 0..5)) {
        let mut ids: Vec<Uuid> = Vec::new();
        let mut map = HashMap::new();
        for price in prices {
            let id = Uuid::new_v4();
            map.insert(id, price);
            ids.push(id);
        }
        ids.push(Uuid::new_v4());
        let catalog = MapCatalog(map);

        let result = runtime().block_on(recompute_total(&catalog, &ids));
        prop_assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn matching_amount_is_accepted_regardless_of_scale(total in price_strategy()) {
        let rescaled = {
            let mut d = total;
            d.rescale(6);
            d
        };
        prop_assert!(verify_amount(Uuid::new_v4(), total, total, rescaled).is_ok());
    }

    #[test]
    fn any_other_amount_is_an_integrity_violation(total in price_strategy(), delta in 1i64..1_000_000) {
        let off_by = Decimal::new(delta, 4);
        for supplied in [total + off_by, total - off_by] {
            let result = verify_amount(Uuid::new_v4(), total, total, supplied);
            prop_assert!(matches!(result, Err(ServiceError::IntegrityViolation(_))));
        }
    }

    #[test]
    fn price_drift_is_rejected_even_when_the_caller_matches(total in price_strategy(), delta in 1i64..10_000) {
        let recomputed = total + Decimal::new(delta, 2);
        let result = verify_amount(Uuid::new_v4(), total, recomputed, recomputed);
        prop_assert!(matches!(result, Err(ServiceError::IntegrityViolation(_))));
    }

    #[test]
    fn expired_intents_never_start_a_charge(status in intent_status_strategy()) {
        prop_assert!(begin_charge(status, true).is_err());
    }

    #[test]
    fn lazy_expiry_only_cancels_open_intents(status in intent_status_strategy(), expired in any::<bool>()) {
        match on_read(status, expired) {
            Some(next) => {
                prop_assert!(expired);
                prop_assert_eq!(next, PaymentIntentStatus::Cancelled);
                prop_assert!(!matches!(status, PaymentIntentStatus::Succeeded | PaymentIntentStatus::Cancelled));
            }
            None => prop_assert!(
                !expired || matches!(status, PaymentIntentStatus::Succeeded | PaymentIntentStatus::Cancelled)
            ),
        }
    }

    #[test]
    fn approved_payments_never_move(settlement in settlement_strategy()) {
        prop_assert_eq!(settle(PaymentStatus::Approved, settlement), Step::AlreadyApproved);
    }

    #[test]
    fn only_approval_provisions_enrollments(
        current in prop_oneof![Just(PaymentStatus::Pending), Just(PaymentStatus::Rejected)],
        settlement in settlement_strategy(),
    ) {
        if let Step::Apply(transition) = settle(current, settlement) {
            let provisions = !transition.effects.is_empty();
            prop_assert_eq!(provisions, transition.payment == PaymentStatus::Approved);
            prop_assert_eq!(
                transition.intent == Some(PaymentIntentStatus::Succeeded),
                transition.payment == PaymentStatus::Approved
            );
        }
    }

    #[test]
    fn caller_keys_are_kept_trimmed(key in "[A-Za-z0-9_-]{1,64}", pad in " {0,3}") {
        let supplied = format!("{}{}{}", pad, key, pad);
        prop_assert_eq!(resolve_key(Some(&supplied)).unwrap(), key);
    }

    #[test]
    fn oversized_keys_are_rejected(key in "[a-z]{256,300}") {
        prop_assert!(matches!(resolve_key(Some(&key)), Err(ServiceError::ValidationError(_))));
    }

    #[test]
    fn decline_messages_are_never_empty(code in proptest::option::of("[a-z_]{1,40}")) {
        prop_assert!(!decline_message(code.as_deref()).is_empty());
    }

    #[test]
    fn manifest_lowercases_the_data_id(id in "[A-Za-z0-9]{1,20}", ts in 1_600_000_000i64..2_000_000_000) {
        prop_assert_eq!(
            signature_manifest(&id, "req-1", ts),
            signature_manifest(&id.to_lowercase(), "req-1", ts)
        );
    }
}
