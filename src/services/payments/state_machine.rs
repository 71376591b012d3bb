//! Pure transition rules for payment intents and payments.
//!
//! Nothing here touches storage. The service asks for the next state and the
//! side effects to run, then applies them inside its own transaction.

use crate::entities::payment::PaymentStatus;
use crate::entities::payment_intent::PaymentIntentStatus;
use crate::errors::ServiceError;

/// Why a charge attempt may not start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeRefusal {
    Expired,
    AlreadySucceeded,
    InFlight,
    Cancelled,
}

impl From<ChargeRefusal> for ServiceError {
    fn from(refusal: ChargeRefusal) -> Self {
        match refusal {
            ChargeRefusal::Expired => ServiceError::InvalidTransition(
                "payment intent has expired; create a new payment intent".to_string(),
            ),
            ChargeRefusal::AlreadySucceeded => {
                ServiceError::InvalidTransition("payment intent has already been paid".to_string())
            }
            ChargeRefusal::InFlight => ServiceError::Conflict(
                "a charge for this payment intent is already in progress".to_string(),
            ),
            ChargeRefusal::Cancelled => {
                ServiceError::InvalidTransition("payment intent was cancelled".to_string())
            }
        }
    }
}

/// `pending|failed -> processing`, refusing expired or settled intents.
pub fn begin_charge(
    current: PaymentIntentStatus,
    expired: bool,
) -> Result<PaymentIntentStatus, ChargeRefusal> {
    match current {
        PaymentIntentStatus::Succeeded => Err(ChargeRefusal::AlreadySucceeded),
        PaymentIntentStatus::Cancelled => Err(ChargeRefusal::Cancelled),
        _ if expired => Err(ChargeRefusal::Expired),
        PaymentIntentStatus::Processing => Err(ChargeRefusal::InFlight),
        PaymentIntentStatus::Pending | PaymentIntentStatus::Failed => {
            Ok(PaymentIntentStatus::Processing)
        }
    }
}

/// Lazy expiry: the status an intent read at or past its expiry should hold.
pub fn on_read(current: PaymentIntentStatus, expired: bool) -> Option<PaymentIntentStatus> {
    match current {
        PaymentIntentStatus::Pending
        | PaymentIntentStatus::Processing
        | PaymentIntentStatus::Failed
            if expired =>
        {
            Some(PaymentIntentStatus::Cancelled)
        }
        _ => None,
    }
}

/// What the gateway (or its absence) said about a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Approved,
    Rejected,
    Pending,
    InfrastructureError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Create or reactivate enrollments, inside the approval transaction
    ProvisionEnrollments,
    /// Best-effort receipt, only after commit
    SendReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransition {
    pub payment: PaymentStatus,
    /// `None` leaves the intent as it is
    pub intent: Option<PaymentIntentStatus>,
    pub effects: Vec<SideEffect>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Apply(PaymentTransition),
    /// Approved is sticky; nothing may move it
    AlreadyApproved,
    /// Disagreement that is logged but not auto-corrected
    Ignore(&'static str),
}

/// Decides how a payment in `current` reacts to `settlement`.
pub fn settle(current: PaymentStatus, settlement: Settlement) -> Step {
    use PaymentStatus as P;
    use Settlement as S;

    match (current, settlement) {
        (P::Approved, _) => Step::AlreadyApproved,
        (P::Pending | P::Rejected, S::Approved) => Step::Apply(PaymentTransition {
            payment: P::Approved,
            intent: Some(PaymentIntentStatus::Succeeded),
            effects: vec![SideEffect::ProvisionEnrollments, SideEffect::SendReceipt],
        }),
        (P::Pending, S::Rejected) => Step::Apply(PaymentTransition {
            payment: P::Rejected,
            intent: Some(PaymentIntentStatus::Failed),
            effects: Vec::new(),
        }),
        (P::Pending, S::Pending) => Step::Apply(PaymentTransition {
            payment: P::Pending,
            intent: None,
            effects: Vec::new(),
        }),
        (P::Pending, S::InfrastructureError) => Step::Apply(PaymentTransition {
            payment: P::Rejected,
            intent: Some(PaymentIntentStatus::Pending),
            effects: Vec::new(),
        }),
        (P::Rejected, S::Rejected) => Step::Ignore("payment already rejected"),
        (P::Rejected, S::Pending) => Step::Ignore("gateway reports pending for a rejected payment"),
        (P::Rejected, S::InfrastructureError) => Step::Ignore("payment already rejected"),
    }
}
