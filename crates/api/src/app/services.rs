//! Portal service wiring: store, workflows, collaborators, consumers.

use std::sync::Arc;

use clubhub_events::{Consumer, Publisher};
use clubhub_infra::approvals::{
    ClubCreationPolicy, ClubCreationWorkflow, EventApprovalPolicy, EventApprovalWorkflow,
    MembershipPolicy, MembershipWorkflow, RoleChangePolicy, RoleChangeWorkflow,
};
use clubhub_infra::external::{
    DirectoryUserLookup, InMemoryObjectStorage, Mailer, ObjectStorage, UserLookup,
};
use clubhub_infra::handlers::{
    ApprovalNotificationHandler, ClubCascadeHandler, CourseCascadeHandler, UserDirectoryHandler,
};
use clubhub_infra::{ClubService, PortalStore};

use crate::consumers::ConsumerSet;

pub struct PortalServices {
    pub store: PortalStore,
    pub publisher: Arc<dyn Publisher>,
    pub storage: Arc<dyn ObjectStorage>,
    pub clubs: ClubService,
    pub club_creations: ClubCreationWorkflow,
    pub memberships: MembershipWorkflow,
    pub role_changes: RoleChangeWorkflow,
    pub event_approvals: EventApprovalWorkflow,
}

impl core::fmt::Debug for PortalServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PortalServices").finish_non_exhaustive()
    }
}

impl PortalServices {
    pub fn new(
        store: PortalStore,
        publisher: Arc<dyn Publisher>,
        storage: Arc<dyn ObjectStorage>,
        lookup: Arc<dyn UserLookup>,
    ) -> Self {
        Self {
            club_creations: ClubCreationWorkflow::new(store.clone(), publisher.clone(), ClubCreationPolicy),
            memberships: MembershipWorkflow::new(store.clone(), publisher.clone(), MembershipPolicy),
            role_changes: RoleChangeWorkflow::new(
                store.clone(),
                publisher.clone(),
                RoleChangePolicy::new(lookup),
            ),
            event_approvals: EventApprovalWorkflow::new(store.clone(), publisher.clone(), EventApprovalPolicy),
            clubs: ClubService::new(store.clone(), publisher.clone(), storage.clone()),
            store,
            publisher,
            storage,
        }
    }

    /// In-memory store and object storage; e-mail targets resolve through
    /// the portal's own user directory.
    pub fn in_memory(publisher: Arc<dyn Publisher>, object_base_url: &str) -> Self {
        let store = PortalStore::in_memory();
        let lookup = Arc::new(DirectoryUserLookup::new(store.directory.clone()));
        Self::new(
            store,
            publisher,
            Arc::new(InMemoryObjectStorage::new(object_base_url)),
            lookup,
        )
    }

    /// Start the portal's consumers (directory, cascades) plus the approval
    /// notifier.
    pub fn spawn_consumers<C>(&self, consumer: C, mailer: Arc<dyn Mailer>) -> ConsumerSet
    where
        C: Consumer + Clone + 'static,
    {
        let mut set = ConsumerSet::new();
        set.spawn(consumer.clone(), UserDirectoryHandler::new(self.store.directory.clone()));
        set.spawn(
            consumer.clone(),
            ClubCascadeHandler::new(self.store.clone(), self.storage.clone()),
        );
        set.spawn(consumer.clone(), CourseCascadeHandler::new(self.store.enrollments.clone()));
        set.spawn(
            consumer,
            ApprovalNotificationHandler::new(self.store.directory.clone(), mailer),
        );
        set
    }
}
