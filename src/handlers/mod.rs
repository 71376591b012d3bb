pub mod health;
pub mod moderation;
pub mod payment_webhooks;
pub mod payments;
