//! Choreography handlers: one per queue in the standard topology.
//!
//! ```text
//!  identity.role-assignments  ──► RoleAssignmentHandler        (user accounts)
//!  portal.user-directory      ──► UserDirectoryHandler         (directory)
//!  portal.club-cascade        ──► ClubCascadeHandler           (clubs, memberships, events, logos)
//!  portal.course-cascade      ──► CourseCascadeHandler         (enrollments)
//!  notification.approvals     ──► ApprovalNotificationHandler  (mailer)
//! ```
//!
//! Storage errors are transient everywhere; a fact that can never apply is
//! malformed.

mod approval_notification;
mod club_cascade;
mod course_cascade;
mod role_assignment;
mod user_directory;

pub use approval_notification::ApprovalNotificationHandler;
pub use club_cascade::ClubCascadeHandler;
pub use course_cascade::CourseCascadeHandler;
pub use role_assignment::RoleAssignmentHandler;
pub use user_directory::UserDirectoryHandler;
