use std::sync::{Arc, Mutex, MutexGuard};

use clubhub_clubs::{
    CampusEvent, Club, ClubCreationRequest, EventApprovalRequest, Membership, MembershipRequest,
    RoleChangeRequest,
};
use clubhub_core::{ClubId, Entity, UserId};

use super::journal::{Journal, Journaled};
use super::read_models::{EnrollmentSummary, UserDirectoryEntry};
use super::repository::{InMemoryRepository, Repository, RepositoryError};

/// Every repository the portal service owns.
///
/// Workflows and cascade handlers that read-modify-write several of these
/// hold [`PortalStore::transaction`] for the whole sequence and write through
/// [`PortalStore::journaled`], rolling the journal back if any step fails.
#[derive(Clone)]
pub struct PortalStore {
    pub clubs: Arc<dyn Repository<Club>>,
    pub memberships: Arc<dyn Repository<Membership>>,
    pub events: Arc<dyn Repository<CampusEvent>>,
    pub club_creations: Arc<dyn Repository<ClubCreationRequest>>,
    pub membership_requests: Arc<dyn Repository<MembershipRequest>>,
    pub role_changes: Arc<dyn Repository<RoleChangeRequest>>,
    pub event_approvals: Arc<dyn Repository<EventApprovalRequest>>,
    pub directory: Arc<dyn Repository<UserDirectoryEntry>>,
    pub enrollments: Arc<dyn Repository<EnrollmentSummary>>,
    tx: Arc<Mutex<()>>,
}

impl core::fmt::Debug for PortalStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PortalStore").finish_non_exhaustive()
    }
}

fn in_memory<T>() -> Arc<dyn Repository<T>>
where
    T: Entity + Clone + Send + Sync + 'static,
    T::Id: Send + Sync + 'static,
{
    Arc::new(InMemoryRepository::<T>::new())
}

impl PortalStore {
    pub fn in_memory() -> Self {
        Self {
            clubs: in_memory(),
            memberships: in_memory(),
            events: in_memory(),
            club_creations: in_memory(),
            membership_requests: in_memory(),
            role_changes: in_memory(),
            event_approvals: in_memory(),
            directory: in_memory(),
            enrollments: in_memory(),
            tx: Arc::new(Mutex::new(())),
        }
    }

    /// Begin the local transaction. A poisoned lock means an earlier
    /// transaction panicked half-way; storage is reported unavailable.
    pub fn transaction(&self) -> Result<MutexGuard<'_, ()>, RepositoryError> {
        self.tx
            .lock()
            .map_err(|_| RepositoryError::Unavailable("transaction lock poisoned".into()))
    }

    /// The same repositories, with every write recorded in `journal`.
    pub fn journaled(&self, journal: &Journal) -> Self {
        Self {
            clubs: Journaled::wrap(&self.clubs, journal),
            memberships: Journaled::wrap(&self.memberships, journal),
            events: Journaled::wrap(&self.events, journal),
            club_creations: Journaled::wrap(&self.club_creations, journal),
            membership_requests: Journaled::wrap(&self.membership_requests, journal),
            role_changes: Journaled::wrap(&self.role_changes, journal),
            event_approvals: Journaled::wrap(&self.event_approvals, journal),
            directory: Journaled::wrap(&self.directory, journal),
            enrollments: Journaled::wrap(&self.enrollments, journal),
            tx: Arc::clone(&self.tx),
        }
    }

    pub fn memberships_of_club(&self, club_id: ClubId) -> Result<Vec<Membership>, RepositoryError> {
        Ok(self
            .memberships
            .list()?
            .into_iter()
            .filter(|m| m.club_id == club_id)
            .collect())
    }

    pub fn memberships_of_user(&self, user_id: UserId) -> Result<Vec<Membership>, RepositoryError> {
        Ok(self
            .memberships
            .list()?
            .into_iter()
            .filter(|m| m.user_id == user_id)
            .collect())
    }

    pub fn membership(&self, club_id: ClubId, user_id: UserId) -> Result<Option<Membership>, RepositoryError> {
        Ok(self
            .memberships
            .list()?
            .into_iter()
            .find(|m| m.club_id == club_id && m.user_id == user_id))
    }

    pub fn events_of_club(&self, club_id: ClubId) -> Result<Vec<CampusEvent>, RepositoryError> {
        Ok(self
            .events
            .list()?
            .into_iter()
            .filter(|e| e.club_id == club_id)
            .collect())
    }
}
