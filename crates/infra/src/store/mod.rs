//! Persistence interface and in-memory implementations.

pub mod journal;
pub mod portal;
pub mod read_models;
pub mod repository;

pub use journal::{Journal, Journaled};
pub use portal::PortalStore;
pub use read_models::{EnrollmentSummary, UserDirectoryEntry};
pub use repository::{InMemoryRepository, Repository, RepositoryError};
