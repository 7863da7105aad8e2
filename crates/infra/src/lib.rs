//! Infrastructure layer: storage, external collaborators, the identity
//! service, approval workflows, choreography handlers and broker backends.

pub mod approvals;
pub mod clubs;
pub mod event_bus;
pub mod external;
pub mod handlers;
pub mod identity;
pub mod outbox;
pub mod store;


pub use approvals::{Actor, ApprovalError};
pub use clubs::ClubService;
pub use identity::{IdentityError, IdentityService};
pub use store::{PortalStore, Repository, RepositoryError};
