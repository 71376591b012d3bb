//! Legal moderation moves for courses and instructors.
//!
//! Each function answers "may this happen, and what else changes", leaving
//! storage and authorization lookups to the service.

use crate::entities::course::CourseStatus;
use crate::entities::instructor_profile::InstructorStatus;
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CourseAction {
    RequestReview,
    Approve,
    Reject,
    Archive,
    Unarchive,
}

/// Who may perform an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    OwnerOrAdmin,
    AdminOnly,
}

impl CourseAction {
    pub fn authority(self) -> Authority {
        match self {
            Self::RequestReview | Self::Archive | Self::Unarchive => Authority::OwnerOrAdmin,
            Self::Approve | Self::Reject => Authority::AdminOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseEffect {
    /// Write reviewer id, review time and comments
    StampReview,
    MarkPublished,
    ClearPublished,
    RememberArchivedFrom,
    ClearArchivedFrom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseTransition {
    pub to: CourseStatus,
    pub effects: Vec<CourseEffect>,
}

fn illegal(entity: &str, from: impl std::fmt::Display, action: impl std::fmt::Display) -> ServiceError {
    ServiceError::InvalidTransition(format!("cannot {} a {} {}", action, from, entity))
}

/// Next course status for `action`; `archived_from` is only read on unarchive.
pub fn course_transition(
    from: CourseStatus,
    action: CourseAction,
    archived_from: Option<CourseStatus>,
) -> Result<CourseTransition, ServiceError> {
    use CourseAction as A;
    use CourseEffect as E;
    use CourseStatus as S;

    let transition = match (from, action) {
        (S::Draft | S::NeedsRevision, A::RequestReview) => CourseTransition {
            to: S::PendingReview,
            effects: Vec::new(),
        },
        (S::PendingReview, A::Approve) => CourseTransition {
            to: S::Published,
            effects: vec![E::StampReview, E::MarkPublished],
        },
        (S::PendingReview, A::Reject) => CourseTransition {
            to: S::NeedsRevision,
            effects: vec![E::StampReview],
        },
        (S::Published, A::Reject) => CourseTransition {
            to: S::NeedsRevision,
            effects: vec![E::StampReview, E::ClearPublished],
        },
        (S::Archived, A::Archive) => return Err(illegal("course", from, action)),
        (_, A::Archive) => CourseTransition {
            to: S::Archived,
            effects: vec![E::RememberArchivedFrom],
        },
        (S::Archived, A::Unarchive) => match archived_from {
            Some(S::Published) => CourseTransition {
                to: S::Published,
                effects: vec![E::ClearArchivedFrom],
            },
            _ => CourseTransition {
                to: S::Draft,
                effects: vec![E::ClearArchivedFrom, E::ClearPublished],
            },
        },
        _ => return Err(illegal("course", from, action)),
    };

    Ok(transition)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum InstructorAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructorTransition {
    pub to: InstructorStatus,
    /// Approval of a previously rejected instructor
    pub reapproval: bool,
    pub clears_rejection_reason: bool,
}

impl InstructorTransition {
    /// Audit label; re-approvals are recorded distinctly
    pub fn audit_action(&self) -> &'static str {
        match (self.to, self.reapproval) {
            (InstructorStatus::Approved, true) => "reapprove",
            (InstructorStatus::Approved, false) => "approve",
            _ => "reject",
        }
    }
}

pub fn instructor_transition(
    from: InstructorStatus,
    action: InstructorAction,
) -> Result<InstructorTransition, ServiceError> {
    use InstructorAction as A;
    use InstructorStatus as S;

    match (from, action) {
        (S::PendingApproval, A::Approve) => Ok(InstructorTransition {
            to: S::Approved,
            reapproval: false,
            clears_rejection_reason: true,
        }),
        (S::Rejected, A::Approve) => Ok(InstructorTransition {
            to: S::Approved,
            reapproval: true,
            clears_rejection_reason: true,
        }),
        (S::PendingApproval | S::Approved, A::Reject) => Ok(InstructorTransition {
            to: S::Rejected,
            reapproval: false,
            clears_rejection_reason: false,
        }),
        _ => Err(illegal("instructor", from, action)),
    }
}

/// Trims a rejection reason and enforces non-empty and `max_len` characters
pub fn validate_reason(reason: &str, max_len: usize) -> Result<String, ServiceError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::ValidationError(
            "a rejection reason is required".to_string(),
        ));
    }
    if trimmed.chars().count() > max_len {
        return Err(ServiceError::ValidationError(format!(
            "rejection reason must be at most {} characters",
            max_len
        )));
    }
    Ok(trimmed.to_string())
}

/// Optional review notes share the reason length cap; blank notes become `None`
pub fn validate_notes(notes: Option<&str>, max_len: usize) -> Result<Option<String>, ServiceError> {
    match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) if n.chars().count() > max_len => Err(ServiceError::ValidationError(format!(
            "review notes must be at most {} characters",
            max_len
        ))),
        other => Ok(other.map(str::to_string)),
    }
}
