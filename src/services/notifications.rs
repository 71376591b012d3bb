use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Everything the purchase confirmation email needs
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub user_id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub course_names: Vec<String>,
}

/// Outbound notification channel.
///
/// Delivery is best effort: implementations report failure through the
/// return value and must not panic.
#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    async fn send_payment_success_email(&self, receipt: &PaymentReceipt) -> bool;
}

/// Notifier that only records the receipt in the log
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl PaymentNotifier for LoggingNotifier {
    async fn send_payment_success_email(&self, receipt: &PaymentReceipt) -> bool {
        info!(
            user_id = %receipt.user_id,
            payment_id = %receipt.payment_id,
            amount = %receipt.amount,
            currency = %receipt.currency,
            courses = receipt.course_names.len(),
            "payment success email queued"
        );
        true
    }
}
