pub mod course;
pub mod enrollment;
pub mod instructor_profile;
pub mod moderation_audit;
pub mod payment;
pub mod payment_intent;
pub mod webhook_notification;
