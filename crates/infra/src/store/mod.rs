//! Grant and request store boundaries.
//!
//! The core is written against these traits only. Adapters:
//! - [`in_memory`]: tests/dev
//! - [`postgres`]: durable storage via SQLx

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_auth::{EscalationRequest, Grant, RequestStatus};
use warden_core::{GrantId, RequestId, StoreError, UserId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryGrantStore, InMemoryRequestStore};
pub use postgres::{ensure_schema, PostgresGrantStore, PostgresRequestStore};

/// Durable mapping of role grants.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert a new grant. Grants are never updated in place.
    async fn create(&self, grant: &Grant) -> Result<(), StoreError>;

    /// Grants held by `user_id`, newest first.
    ///
    /// Implementations may drop grants that are expired at `now`; callers
    /// filter again regardless.
    async fn list_active(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Grant>, StoreError>;

    /// Delete one grant. Returns the number of rows removed (0 or 1).
    async fn delete_by_id(&self, id: GrantId) -> Result<u64, StoreError>;

    /// Delete every grant with `expires_at <= now`. Returns the number removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Durable mapping of escalation requests.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create(&self, request: &EscalationRequest) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: RequestId) -> Result<Option<EscalationRequest>, StoreError>;

    /// Pending requests, newest first.
    async fn list_pending(&self) -> Result<Vec<EscalationRequest>, StoreError>;

    /// All requests made by `user_id`, newest first.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<EscalationRequest>, StoreError>;

    /// Compare-and-set the request status.
    ///
    /// Moves `id` from `from` to `to`, recording `decided_by` and `at`, only if
    /// the stored status is still `from`. Returns `Ok(false)` (not an error)
    /// when the request is missing or its status no longer matches.
    async fn transition_status(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        decided_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Approve a pending request and store its grant as one atomic unit.
    ///
    /// Either the request becomes `approved` (recording `approver` and `at`)
    /// and `grant` is inserted, or nothing changes. Returns `Ok(false)` when
    /// the request is missing or no longer pending. An error or an abandoned
    /// call must never leave one effect without the other.
    async fn approve_with_grant(
        &self,
        id: RequestId,
        approver: UserId,
        grant: &Grant,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S: GrantStore + ?Sized> GrantStore for Arc<S> {
    async fn create(&self, grant: &Grant) -> Result<(), StoreError> {
        (**self).create(grant).await
    }

    async fn list_active(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Grant>, StoreError> {
        (**self).list_active(user_id, now).await
    }

    async fn delete_by_id(&self, id: GrantId) -> Result<u64, StoreError> {
        (**self).delete_by_id(id).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).delete_expired(now).await
    }
}

#[async_trait]
impl<S: RequestStore + ?Sized> RequestStore for Arc<S> {
    async fn create(&self, request: &EscalationRequest) -> Result<(), StoreError> {
        (**self).create(request).await
    }

    async fn get_by_id(&self, id: RequestId) -> Result<Option<EscalationRequest>, StoreError> {
        (**self).get_by_id(id).await
    }

    async fn list_pending(&self) -> Result<Vec<EscalationRequest>, StoreError> {
        (**self).list_pending().await
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<EscalationRequest>, StoreError> {
        (**self).list_by_user(user_id).await
    }

    async fn transition_status(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        decided_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).transition_status(id, from, to, decided_by, at).await
    }

    async fn approve_with_grant(
        &self,
        id: RequestId,
        approver: UserId,
        grant: &Grant,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).approve_with_grant(id, approver, grant, at).await
    }
}

/// Run a store call under a deadline.
///
/// An elapsed deadline becomes [`StoreError::Timeout`]; the call's own error is
/// passed through unchanged.
pub(crate) async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!(
            "{operation} exceeded {}ms",
            limit.as_millis()
        ))),
    }
}
