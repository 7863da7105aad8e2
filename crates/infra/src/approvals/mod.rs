//! Approval workflows: the four request kinds on top of one decision engine.

use thiserror::Error;

use clubhub_core::DomainError;

use crate::external::ExternalError;
use crate::store::RepositoryError;

pub mod club_creation;
pub mod event_approval;
pub mod membership;
pub mod role_change;
mod workflow;

#[cfg(test)]
pub(crate) mod fixtures;

pub use club_creation::{ClubCreationPolicy, ClubCreationWorkflow, NewClub};
pub use event_approval::{EventApprovalPolicy, EventApprovalWorkflow, NewCampusEvent};
pub use membership::{MembershipPolicy, MembershipWorkflow, NewMembership};
pub use role_change::{NewRoleChange, RoleChangePolicy, RoleChangeWorkflow, TargetUser};
pub use workflow::{Actor, ApprovalPolicy, Workflow, human_message};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Duplicate pending request, already-decided request, or a guard that
    /// no longer holds (position filled, club renamed away).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// A remote collaborator failed. Not retried.
    #[error("lookup failed: {0}")]
    Lookup(#[from] ExternalError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ApprovalError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<DomainError> for ApprovalError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                ApprovalError::Validation(msg)
            }
            DomainError::NotFound => ApprovalError::NotFound("resource".into()),
            DomainError::Conflict(msg) => ApprovalError::Conflict(msg),
            DomainError::Forbidden(msg) => ApprovalError::Forbidden(msg),
        }
    }
}
