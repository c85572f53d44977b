//! In-memory store implementations for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_auth::{sort_newest_first, sort_requests_newest_first, EscalationRequest, Grant, RequestStatus};
use warden_core::{GrantId, RequestId, StoreError, UserId};

use super::{GrantStore, RequestStore};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

/// In-memory grant store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    grants: RwLock<HashMap<GrantId, Grant>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total number of stored grants, expired ones included.
    pub fn len(&self) -> usize {
        self.grants.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn create(&self, grant: &Grant) -> Result<(), StoreError> {
        let mut grants = write(&self.grants)?;
        if grants.contains_key(&grant.id) {
            return Err(StoreError::Backend(format!("grant already exists: {}", grant.id)));
        }
        grants.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn list_active(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Grant>, StoreError> {
        let grants = read(&self.grants)?;
        let mut result: Vec<Grant> = grants
            .values()
            .filter(|g| g.user_id == user_id && g.is_active_at(now))
            .cloned()
            .collect();

        sort_newest_first(&mut result);
        Ok(result)
    }

    async fn delete_by_id(&self, id: GrantId) -> Result<u64, StoreError> {
        let mut grants = write(&self.grants)?;
        Ok(u64::from(grants.remove(&id).is_some()))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut grants = write(&self.grants)?;
        let before = grants.len();
        grants.retain(|_, g| g.is_active_at(now));
        Ok((before - grants.len()) as u64)
    }
}

/// In-memory request store.
///
/// Status transitions are checked and applied under a single write guard,
/// which makes `transition_status` an atomic compare-and-set. Approval writes
/// into the shared grant store while both guards are held (requests first,
/// then grants).
#[derive(Debug)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<RequestId, EscalationRequest>>,
    grants: Arc<InMemoryGrantStore>,
}

impl InMemoryRequestStore {
    /// Request store whose approvals land in `grants`.
    pub fn new(grants: Arc<InMemoryGrantStore>) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            grants,
        }
    }

    pub fn arc(grants: Arc<InMemoryGrantStore>) -> Arc<Self> {
        Arc::new(Self::new(grants))
    }

    pub fn grants(&self) -> &Arc<InMemoryGrantStore> {
        &self.grants
    }

    fn list_where<F>(&self, pred: F) -> Result<Vec<EscalationRequest>, StoreError>
    where
        F: Fn(&EscalationRequest) -> bool,
    {
        let requests = read(&self.requests)?;
        let mut result: Vec<_> = requests.values().filter(|r| pred(r)).cloned().collect();
        sort_requests_newest_first(&mut result);
        Ok(result)
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create(&self, request: &EscalationRequest) -> Result<(), StoreError> {
        let mut requests = write(&self.requests)?;
        if requests.contains_key(&request.id) {
            return Err(StoreError::Backend(format!("request already exists: {}", request.id)));
        }
        requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: RequestId) -> Result<Option<EscalationRequest>, StoreError> {
        Ok(read(&self.requests)?.get(&id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<EscalationRequest>, StoreError> {
        self.list_where(|r| r.status == RequestStatus::Pending)
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<EscalationRequest>, StoreError> {
        self.list_where(|r| r.user_id == user_id)
    }

    async fn transition_status(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        decided_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut requests = write(&self.requests)?;
        match requests.get_mut(&id) {
            Some(request) if request.status == from => {
                request.status = to;
                request.approved_by = Some(decided_by);
                request.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn approve_with_grant(
        &self,
        id: RequestId,
        approver: UserId,
        grant: &Grant,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut requests = write(&self.requests)?;
        let Some(request) = requests.get_mut(&id) else {
            return Ok(false);
        };
        if request.status != RequestStatus::Pending {
            return Ok(false);
        }

        let mut grants = write(&self.grants.grants)?;
        if grants.contains_key(&grant.id) {
            return Err(StoreError::Backend(format!("grant already exists: {}", grant.id)));
        }
        grants.insert(grant.id, grant.clone());

        request.status = RequestStatus::Approved;
        request.approved_by = Some(approver);
        request.updated_at = at;
        Ok(true)
    }
}
