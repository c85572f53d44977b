//! Just-in-time escalation workflow.
//!
//! ## State machine
//!
//! `pending` → `approved` | `rejected`. Both targets are terminal.
//!
//! Every transition is a single compare-and-set against the request store
//! that only matches `pending`, so of two racing decisions exactly one wins and
//! the other sees `InvalidState`.
//!
//! ## Approval
//!
//! Approval materializes the request as a grant expiring `duration_minutes`
//! after the approval instant. The transition and the grant insert go to the
//! request store as one atomic `approve_with_grant`, so callers never observe
//! an approved request without its grant, nor a grant for a request that is
//! still pending. A timed-out approval may still have committed; retrying it
//! then reports `InvalidState` rather than producing a second grant.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use warden_auth::{EscalationRequest, Grant, RequestStatus, Role, Scope};
use warden_core::{AccessError, AccessResult, Clock, RequestId, UserId};

use crate::rbac::RbacEngine;
use crate::store::{bounded, GrantStore, RequestStore};

pub struct JitWorkflow<R, G> {
    requests: R,
    engine: Arc<RbacEngine<G>>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    max_duration_minutes: u32,
}

impl<R, G> JitWorkflow<R, G>
where
    R: RequestStore,
    G: GrantStore,
{
    /// Build a workflow sharing the engine's clock and settings.
    ///
    /// Approved grants are written by `requests`, which must therefore store
    /// them where the engine's grant store reads them.
    pub fn new(requests: R, engine: Arc<RbacEngine<G>>) -> Self {
        Self {
            requests,
            clock: engine.clock(),
            store_timeout: engine.store_timeout(),
            max_duration_minutes: engine.max_duration_minutes(),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<RbacEngine<G>> {
        &self.engine
    }

    /// Open a pending escalation request.
    ///
    /// Duration and reason are validated before the store is touched.
    pub async fn create_request(
        &self,
        user_id: UserId,
        role: Role,
        scope: Scope,
        duration_minutes: u32,
        reason: impl Into<String>,
    ) -> AccessResult<EscalationRequest> {
        let request = EscalationRequest::pending(
            user_id,
            role,
            scope,
            duration_minutes,
            reason,
            self.max_duration_minutes,
            self.clock.now(),
        )?;

        bounded("create_request", self.store_timeout, self.requests.create(&request)).await?;

        info!(
            request_id = %request.id,
            user_id = %user_id,
            role = %role,
            scope = %request.scope,
            duration_minutes,
            "escalation requested"
        );
        Ok(request)
    }

    pub async fn get_request(&self, request_id: RequestId) -> AccessResult<EscalationRequest> {
        bounded("get_request", self.store_timeout, self.requests.get_by_id(request_id))
            .await?
            .ok_or_else(|| AccessError::not_found(format!("request {request_id}")))
    }

    /// Load a request and make sure it can still be decided.
    async fn load_pending(&self, request_id: RequestId) -> AccessResult<EscalationRequest> {
        let request = self.get_request(request_id).await?;
        if request.status.is_terminal() {
            warn!(request_id = %request_id, status = %request.status, "decision on closed request");
            return Err(AccessError::invalid_state(format!(
                "request {request_id} is {}, not pending",
                request.status
            )));
        }
        Ok(request)
    }

    /// Approve a pending request and materialize its time-bound grant.
    ///
    /// The status change and the grant insert are one store operation, so a
    /// failure or timeout leaves either both or neither. Losing a race to
    /// another decision is `InvalidState` and writes nothing.
    pub async fn approve_request(&self, request_id: RequestId, approver_id: UserId) -> AccessResult<Grant> {
        let request = self.load_pending(request_id).await?;
        let approved_at = self.clock.now();
        let grant = Grant::new(
            request.user_id,
            request.role,
            request.scope.clone(),
            Some(request.grant_expiry(approved_at)),
            approver_id,
            approved_at,
        );

        let approved = bounded(
            "approve_request",
            self.store_timeout,
            self.requests
                .approve_with_grant(request_id, approver_id, &grant, approved_at),
        )
        .await?;

        if !approved {
            warn!(request_id = %request_id, "request decided concurrently");
            return Err(AccessError::invalid_state(format!(
                "request {request_id} is no longer pending"
            )));
        }

        info!(
            request_id = %request_id,
            grant_id = %grant.id,
            user_id = %grant.user_id,
            role = %grant.role,
            scope = %grant.scope,
            approver_id = %approver_id,
            expires_at = ?grant.expires_at,
            "escalation approved"
        );
        Ok(grant)
    }

    /// Reject a pending request. No grant is created.
    pub async fn reject_request(&self, request_id: RequestId, approver_id: UserId) -> AccessResult<()> {
        self.load_pending(request_id).await?;
        let rejected = bounded(
            "transition_request_status",
            self.store_timeout,
            self.requests.transition_status(
                request_id,
                RequestStatus::Pending,
                RequestStatus::Rejected,
                approver_id,
                self.clock.now(),
            ),
        )
        .await?;

        if !rejected {
            warn!(request_id = %request_id, "request decided concurrently");
            return Err(AccessError::invalid_state(format!(
                "request {request_id} is no longer pending"
            )));
        }
        info!(request_id = %request_id, approver_id = %approver_id, "escalation rejected");
        Ok(())
    }

    /// Pending requests, newest first.
    pub async fn get_pending_requests(&self) -> AccessResult<Vec<EscalationRequest>> {
        Ok(bounded("list_pending_requests", self.store_timeout, self.requests.list_pending()).await?)
    }

    /// Every request made by `user_id`, newest first.
    pub async fn get_user_requests(&self, user_id: UserId) -> AccessResult<Vec<EscalationRequest>> {
        Ok(bounded("list_user_requests", self.store_timeout, self.requests.list_by_user(user_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use warden_core::{ManualClock, ResourceId};

    use super::*;
    use crate::store::{InMemoryGrantStore, InMemoryRequestStore};

    type Workflow = JitWorkflow<Arc<InMemoryRequestStore>, Arc<InMemoryGrantStore>>;

    fn workflow() -> (Workflow, Arc<InMemoryGrantStore>, Arc<ManualClock>) {
        let grants = InMemoryGrantStore::arc();
        let clock = Arc::new(ManualClock::starting_now());
        let engine = Arc::new(RbacEngine::new(grants.clone()).with_clock(clock.clone()));
        (JitWorkflow::new(InMemoryRequestStore::arc(grants.clone()), engine), grants, clock)
    }

    fn p1() -> Scope {
        Scope::Resource(ResourceId::new("P1").unwrap())
    }

    #[tokio::test]
    async fn create_request_starts_pending() {
        let (wf, _, _) = workflow();
        let u = UserId::new();
        let req = wf
            .create_request(u, Role::ProjectEditor, p1(), 60, "on-call fix")
            .await
            .unwrap();

        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(wf.get_request(req.id).await.unwrap(), req);
        assert_eq!(wf.get_pending_requests().await.unwrap(), vec![req.clone()]);
        assert_eq!(wf.get_user_requests(u).await.unwrap(), vec![req]);
    }

    #[tokio::test]
    async fn out_of_range_duration_is_rejected() {
        let (wf, _, _) = workflow();
        for minutes in [0, 1441] {
            let err = wf
                .create_request(UserId::new(), Role::User, Scope::Global, minutes, "why")
                .await
                .unwrap_err();
            assert!(matches!(err, AccessError::Validation(_)));
        }
        assert!(wf.get_pending_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approval_creates_grant_expiring_after_duration() {
        let (wf, _, clock) = workflow();
        let u = UserId::new();
        let approver = UserId::new();
        let req = wf.create_request(u, Role::ProjectEditor, p1(), 60, "release").await.unwrap();

        let approved_at = clock.now();
        let grant = wf.approve_request(req.id, approver).await.unwrap();

        assert_eq!(grant.expires_at, Some(approved_at + chrono::Duration::minutes(60)));
        assert_eq!(grant.granted_by, approver);
        assert_eq!(grant.scope, p1());
        assert!(wf.engine().has_permission(u, Role::ProjectEditor, &p1()).await.unwrap());

        let stored = wf.get_request(req.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Approved);
        assert_eq!(stored.approved_by, Some(approver));
        assert!(wf.get_pending_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_decision_is_invalid_state_without_side_effects() {
        let (wf, grants, _) = workflow();
        let u = UserId::new();
        let req = wf.create_request(u, Role::Reporter, Scope::Global, 30, "audit").await.unwrap();
        wf.approve_request(req.id, UserId::new()).await.unwrap();

        let again = wf.approve_request(req.id, UserId::new()).await.unwrap_err();
        assert!(matches!(again, AccessError::InvalidState(_)));
        let reject = wf.reject_request(req.id, UserId::new()).await.unwrap_err();
        assert!(matches!(reject, AccessError::InvalidState(_)));

        assert_eq!(grants.len(), 1);
    }

    #[tokio::test]
    async fn rejection_creates_no_grant() {
        let (wf, grants, _) = workflow();
        let approver = UserId::new();
        let req = wf
            .create_request(UserId::new(), Role::Admin, Scope::Global, 10, "curious")
            .await
            .unwrap();

        wf.reject_request(req.id, approver).await.unwrap();

        let stored = wf.get_request(req.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Rejected);
        assert_eq!(stored.approved_by, Some(approver));
        assert!(grants.is_empty());
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let (wf, _, _) = workflow();
        assert!(matches!(
            wf.approve_request(RequestId::new(), UserId::new()).await,
            Err(AccessError::NotFound(_))
        ));
        assert!(matches!(
            wf.reject_request(RequestId::new(), UserId::new()).await,
            Err(AccessError::NotFound(_))
        ));
    }
}
