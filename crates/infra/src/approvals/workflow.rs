//! Decision engine shared by every approval kind.
//!
//! ```text
//! submit:   prepare (may call out) ─▶ lock ─▶ duplicate check ─▶ check_submit
//!           ─▶ on_submit ─▶ save PENDING ─▶ unlock ─▶ publish
//! approve:  lock ─▶ load ─▶ still PENDING? ─▶ can_decide ─▶ apply_approval
//!           ─▶ save APPROVED ─▶ outcome fact ─▶ unlock ─▶ publish
//! reject:   lock ─▶ load ─▶ still PENDING? ─▶ can_decide ─▶ on_reject
//!           ─▶ save REJECTED ─▶ outcome fact ─▶ unlock ─▶ publish
//! cancel:   lock ─▶ load ─▶ requester? still PENDING? ─▶ on_reject
//!           ─▶ save REJECTED ─▶ unlock ─▶ publish
//! ```
//!
//! Every step between lock and unlock runs inside the store's transaction and
//! writes through a journal. If a guard or a write fails, the journal puts
//! back every row already written: the request stays PENDING and the outbox
//! is dropped. Facts leave only after the lock is released, and a
//! failed publish never undoes the decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use clubhub_auth::{AuthenticatedPrincipal, Role, RoleSet};
use clubhub_clubs::{ApprovalKind, ApprovalRequest, ApprovalStatus, RequestedChange};
use clubhub_core::{RequestId, UserId};
use clubhub_events::{ApprovalOutcome, DecisionStatus, Fact, Publisher};

use super::ApprovalError;
use crate::outbox::Outbox;
use crate::store::{Journal, PortalStore, Repository};

/// The authenticated caller a workflow acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub roles: RoleSet,
}

impl Actor {
    pub fn new(user_id: UserId, roles: RoleSet) -> Self {
        Self { user_id, roles }
    }

    /// Workflows record who decided, so a principal without a user id cannot act.
    pub fn from_principal(principal: &AuthenticatedPrincipal) -> Result<Self, ApprovalError> {
        let user_id = principal
            .user_id
            .ok_or_else(|| ApprovalError::forbidden("principal carries no user id"))?;
        Ok(Self::new(user_id, principal.roles.clone()))
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

/// What one approval kind adds to the engine.
pub trait ApprovalPolicy: Send + Sync {
    type Change: RequestedChange + Send + Sync + 'static;
    type Input;
    /// Local state built by `prepare` and written by `on_submit`.
    type Staged;

    fn requests<'a>(&self, store: &'a PortalStore) -> &'a Arc<dyn Repository<ApprovalRequest<Self::Change>>>;

    /// Validate input and build the PENDING request. Runs before the
    /// transaction, so remote calls belong here.
    fn prepare(
        &self,
        store: &PortalStore,
        actor: &Actor,
        input: Self::Input,
        now: DateTime<Utc>,
    ) -> Result<(ApprovalRequest<Self::Change>, Self::Staged), ApprovalError>;

    /// Two PENDING requests that may not coexist.
    fn is_duplicate(
        &self,
        existing: &ApprovalRequest<Self::Change>,
        candidate: &ApprovalRequest<Self::Change>,
    ) -> bool;

    /// Guards re-read inside the transaction before the request is stored.
    fn check_submit(
        &self,
        _store: &PortalStore,
        _request: &ApprovalRequest<Self::Change>,
    ) -> Result<(), ApprovalError> {
        Ok(())
    }

    /// Local writes and facts that accompany a new request.
    fn on_submit(
        &self,
        _store: &PortalStore,
        _request: &ApprovalRequest<Self::Change>,
        _staged: Self::Staged,
        _outbox: &mut Outbox,
    ) -> Result<(), ApprovalError> {
        Ok(())
    }

    /// Is `actor` allowed to approve or reject this request?
    fn can_decide(
        &self,
        store: &PortalStore,
        actor: &Actor,
        request: &ApprovalRequest<Self::Change>,
    ) -> Result<(), ApprovalError>;

    /// Re-validate against current state and apply the approved change.
    fn apply_approval(
        &self,
        store: &PortalStore,
        request: &ApprovalRequest<Self::Change>,
        outbox: &mut Outbox,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError>;

    /// Undo anything `on_submit` put in place. Runs on reject and cancel.
    fn on_reject(
        &self,
        _store: &PortalStore,
        _request: &ApprovalRequest<Self::Change>,
        _outbox: &mut Outbox,
    ) -> Result<(), ApprovalError> {
        Ok(())
    }
}

fn load_from<C>(
    requests: &Arc<dyn Repository<ApprovalRequest<C>>>,
    id: RequestId,
) -> Result<ApprovalRequest<C>, ApprovalError> {
    requests
        .find_by_id(&id)?
        .ok_or_else(|| ApprovalError::not_found(format!("request {id}")))
}

/// Notification text for a decided request.
pub fn human_message<C: RequestedChange>(request: &ApprovalRequest<C>) -> String {
    let verdict = match request.status {
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
        ApprovalStatus::Pending => "pending",
    };
    match request.decision_reason.as_deref() {
        Some(reason) if !reason.is_empty() => {
            format!("Your {} was {verdict}: {reason}", request.change.describe())
        }
        _ => format!("Your {} was {verdict}", request.change.describe()),
    }
}

fn outcome_fact<C: RequestedChange>(request: &ApprovalRequest<C>) -> Option<Fact> {
    let status = match request.status {
        ApprovalStatus::Approved => DecisionStatus::Approved,
        ApprovalStatus::Rejected => DecisionStatus::Rejected,
        ApprovalStatus::Pending => return None,
    };
    let (previous_state, new_state) = request.outcome_states();
    Some(Fact::ApprovalOutcome(ApprovalOutcome {
        target_user_id: request.subject_user(),
        resource_id: request.resource_id,
        previous_state,
        new_state,
        status,
        human_message: human_message(request),
    }))
}

pub struct Workflow<P> {
    store: PortalStore,
    publisher: Arc<dyn Publisher>,
    policy: P,
}

impl<P> core::fmt::Debug for Workflow<P>
where
    P: ApprovalPolicy,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Workflow")
            .field("kind", &<P::Change as RequestedChange>::KIND)
            .finish_non_exhaustive()
    }
}

impl<P> Workflow<P>
where
    P: ApprovalPolicy,
{
    pub fn new(store: PortalStore, publisher: Arc<dyn Publisher>, policy: P) -> Self {
        Self {
            store,
            publisher,
            policy,
        }
    }

    pub fn kind(&self) -> ApprovalKind {
        <P::Change as RequestedChange>::KIND
    }

    pub fn store(&self) -> &PortalStore {
        &self.store
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    fn repo(&self) -> &Arc<dyn Repository<ApprovalRequest<P::Change>>> {
        self.policy.requests(&self.store)
    }

    fn load(&self, id: RequestId) -> Result<ApprovalRequest<P::Change>, ApprovalError> {
        load_from(self.policy.requests(&self.store), id)
    }

    /// Run `body` under the local transaction against a journaled view of the
    /// store. An error rolls back every row `body` wrote.
    fn in_transaction<R>(
        &self,
        body: impl FnOnce(&PortalStore) -> Result<R, ApprovalError>,
    ) -> Result<R, ApprovalError> {
        let _tx = self.store.transaction()?;
        let journal = Journal::new();
        let result = body(&self.store.journaled(&journal));
        if let Err(e) = &result {
            if !journal.is_empty() {
                let written = journal.len();
                let failed = journal.rollback();
                warn!(kind = %self.kind(), error = %e, written, failed, "transaction rolled back");
            }
        }
        result
    }

    fn publish(&self, outbox: Outbox) {
        let expected = outbox.len();
        let acked = outbox.publish_all(&*self.publisher);
        if acked < expected {
            warn!(
                kind = %self.kind(),
                expected,
                acked,
                "some facts were not confirmed by the broker"
            );
        }
    }

    pub fn submit(
        &self,
        actor: &Actor,
        input: P::Input,
    ) -> Result<ApprovalRequest<P::Change>, ApprovalError> {
        let now = Utc::now();
        let (request, staged) = self.policy.prepare(&self.store, actor, input, now)?;

        let mut outbox = Outbox::new();
        self.in_transaction(|store| {
            let requests = self.policy.requests(store);
            let duplicate = requests
                .list()?
                .iter()
                .any(|existing| existing.is_pending() && self.policy.is_duplicate(existing, &request));
            if duplicate {
                return Err(ApprovalError::conflict(format!(
                    "a matching {} request is already pending",
                    self.kind()
                )));
            }
            self.policy.check_submit(store, &request)?;
            self.policy.on_submit(store, &request, staged, &mut outbox)?;
            requests.save(request.clone())?;
            Ok(())
        })?;

        info!(
            kind = %self.kind(),
            request_id = %request.id,
            requester = %request.requester_id,
            "approval request submitted"
        );
        self.publish(outbox);
        Ok(request)
    }

    pub fn approve(
        &self,
        actor: &Actor,
        id: RequestId,
    ) -> Result<ApprovalRequest<P::Change>, ApprovalError> {
        let now = Utc::now();
        let mut outbox = Outbox::new();
        let request = self.in_transaction(|store| {
            let requests = self.policy.requests(store);
            let mut request = load_from(requests, id)?;
            request.ensure_pending()?;
            self.policy.can_decide(store, actor, &request)?;

            request.approve(actor.user_id, now)?;
            self.policy.apply_approval(store, &request, &mut outbox, now)?;
            requests.save(request.clone())?;
            outbox.push(outcome_fact(&request).ok_or_else(|| ApprovalError::conflict("request not decided"))?);
            Ok(request)
        })?;

        info!(kind = %self.kind(), request_id = %id, decider = %actor.user_id, "approval request approved");
        self.publish(outbox);
        Ok(request)
    }

    /// `reason` is kept verbatim on the request and in the notification.
    pub fn reject(
        &self,
        actor: &Actor,
        id: RequestId,
        reason: Option<String>,
    ) -> Result<ApprovalRequest<P::Change>, ApprovalError> {
        let now = Utc::now();
        let mut outbox = Outbox::new();
        let request = self.in_transaction(|store| {
            let requests = self.policy.requests(store);
            let mut request = load_from(requests, id)?;
            request.ensure_pending()?;
            self.policy.can_decide(store, actor, &request)?;

            request.reject(actor.user_id, reason, now)?;
            self.policy.on_reject(store, &request, &mut outbox)?;
            requests.save(request.clone())?;
            outbox.push(outcome_fact(&request).ok_or_else(|| ApprovalError::conflict("request not decided"))?);
            Ok(request)
        })?;

        info!(kind = %self.kind(), request_id = %id, decider = %actor.user_id, "approval request rejected");
        self.publish(outbox);
        Ok(request)
    }

    /// Withdraw a PENDING request. Only its requester may; no outcome is sent.
    pub fn cancel(
        &self,
        actor: &Actor,
        id: RequestId,
    ) -> Result<ApprovalRequest<P::Change>, ApprovalError> {
        let now = Utc::now();
        let mut outbox = Outbox::new();
        let request = self.in_transaction(|store| {
            let requests = self.policy.requests(store);
            let mut request = load_from(requests, id)?;
            request.cancel(actor.user_id, now)?;
            self.policy.on_reject(store, &request, &mut outbox)?;
            requests.save(request.clone())?;
            Ok(request)
        })?;

        info!(kind = %self.kind(), request_id = %id, "approval request cancelled");
        self.publish(outbox);
        Ok(request)
    }

    pub fn get(&self, id: RequestId) -> Result<ApprovalRequest<P::Change>, ApprovalError> {
        self.load(id)
    }

    /// PENDING requests, oldest first.
    pub fn list_pending(&self) -> Result<Vec<ApprovalRequest<P::Change>>, ApprovalError> {
        let mut pending: Vec<_> = self
            .repo()
            .list()?
            .into_iter()
            .filter(ApprovalRequest::is_pending)
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }
}
