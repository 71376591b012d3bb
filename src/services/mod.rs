// Collaborator contracts and their database-backed defaults
pub mod catalog;
pub mod enrollments;
pub mod notifications;

// Payment processing and reconciliation
pub mod payments;
pub mod webhooks;

// Course and instructor moderation
pub mod moderation;
