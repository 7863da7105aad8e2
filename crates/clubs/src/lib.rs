//! Clubs domain module.
//!
//! Clubs, memberships and positions, campus events, and the approval request
//! state machine, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage).

pub mod approval;
pub mod campus_event;
pub mod club;
pub mod membership;

pub use approval::{
    ApprovalKind, ApprovalRequest, ApprovalStatus, CANCELLED_REASON, ClubCreation,
    ClubCreationRequest, EventApprovalRequest, EventPublication, MembershipApplication,
    MembershipRequest, RequestedChange, RoleChange, RoleChangeRequest,
};
pub use campus_event::{CampusEvent, CampusEventStatus};
pub use club::{Club, ClubStatus};
pub use membership::{ClubPosition, Membership, ensure_not_held_elsewhere, ensure_slot_free};
