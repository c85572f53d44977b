//! RBAC engine: permission checks, assignment and revocation over a grant store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use warden_auth::{
    active_grants, explain, satisfies, satisfies_exact, validate_duration, Grant,
    PermissionExplanation, Role, Scope,
};
use warden_core::{AccessError, AccessResult, Clock, GrantId, ResourceId, SystemClock, UserId};

use crate::config::WardenConfig;
use crate::store::{bounded, GrantStore};

/// Answers permission checks and manages grants.
///
/// Holds no mutable state of its own; share it behind an `Arc`.
pub struct RbacEngine<G> {
    store: G,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    max_duration_minutes: u32,
}

impl<G: GrantStore> RbacEngine<G> {
    /// Engine with wall-clock time and default settings.
    pub fn new(store: G) -> Self {
        Self::from_config(store, Arc::new(SystemClock), &WardenConfig::default())
    }

    pub fn from_config(store: G, clock: Arc<dyn Clock>, config: &WardenConfig) -> Self {
        Self {
            store,
            clock,
            store_timeout: config.store_timeout,
            max_duration_minutes: config.max_jit_minutes,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    pub fn max_duration_minutes(&self) -> u32 {
        self.max_duration_minutes
    }

    pub fn store(&self) -> &G {
        &self.store
    }

    /// Active grants for `user_id` at the current clock time, newest first.
    async fn active(&self, user_id: UserId) -> AccessResult<Vec<Grant>> {
        let now = self.clock.now();
        let grants = bounded(
            "list_active",
            self.store_timeout,
            self.store.list_active(user_id, now),
        )
        .await?;
        Ok(active_grants(grants, now))
    }

    /// Does `user_id` hold `required` (or a higher leveled role) in `scope`?
    ///
    /// Expired grants are ignored even if the store still returns them. A store
    /// failure is an `Err`, never a denial.
    pub async fn has_permission(&self, user_id: UserId, required: Role, scope: &Scope) -> AccessResult<bool> {
        let active = self.active(user_id).await?;
        let granted = satisfies(&active, required, scope);
        debug!(user_id = %user_id, role = %required, scope = %scope, granted, "permission check");
        Ok(granted)
    }

    /// True if any of `roles` is satisfied in `scope`.
    pub async fn has_any_permission(&self, user_id: UserId, roles: &[Role], scope: &Scope) -> AccessResult<bool> {
        let active = self.active(user_id).await?;
        let granted = roles.iter().any(|role| satisfies(&active, *role, scope));
        debug!(user_id = %user_id, roles = ?roles, scope = %scope, granted, "any-permission check");
        Ok(granted)
    }

    /// Exact role in exact scope; the hierarchy is not consulted.
    pub async fn has_role(&self, user_id: UserId, role: Role, scope: &Scope) -> AccessResult<bool> {
        let active = self.active(user_id).await?;
        Ok(satisfies_exact(&active, role, scope))
    }

    pub async fn explain_permission(
        &self,
        user_id: UserId,
        required: Role,
        scope: &Scope,
    ) -> AccessResult<PermissionExplanation> {
        let active = self.active(user_id).await?;
        Ok(explain(user_id, &active, required, scope))
    }

    /// Insert a new grant. Never deduplicates: the same (user, role, scope)
    /// may be held several times, each independently revocable.
    pub async fn assign_role(
        &self,
        user_id: UserId,
        role: Role,
        scope: Scope,
        expires_at: Option<DateTime<Utc>>,
        assigned_by: UserId,
    ) -> AccessResult<Grant> {
        let grant = Grant::new(user_id, role, scope, expires_at, assigned_by, self.clock.now());
        bounded("create_grant", self.store_timeout, self.store.create(&grant)).await?;

        info!(
            grant_id = %grant.id,
            user_id = %user_id,
            role = %role,
            scope = %grant.scope,
            expires_at = ?grant.expires_at,
            assigned_by = %assigned_by,
            "role assigned"
        );
        Ok(grant)
    }

    /// Permanent global grant of a leveled role.
    pub async fn assign_global_role(&self, user_id: UserId, role: Role, assigned_by: UserId) -> AccessResult<Grant> {
        if !role.is_leveled() {
            return Err(AccessError::validation(format!(
                "'{role}' is not a global hierarchical role"
            )));
        }
        self.assign_role(user_id, role, Scope::Global, None, assigned_by).await
    }

    /// Permanent grant of a resource role on one resource.
    pub async fn assign_resource_role(
        &self,
        user_id: UserId,
        role: Role,
        resource_id: ResourceId,
        assigned_by: UserId,
    ) -> AccessResult<Grant> {
        if !role.is_resource_role() {
            return Err(AccessError::validation(format!(
                "'{role}' is not a resource-specific role"
            )));
        }
        self.assign_role(user_id, role, Scope::Resource(resource_id), None, assigned_by)
            .await
    }

    /// Grant that lapses `duration_minutes` from now.
    pub async fn assign_temporary_role(
        &self,
        user_id: UserId,
        role: Role,
        scope: Scope,
        duration_minutes: u32,
        assigned_by: UserId,
    ) -> AccessResult<Grant> {
        validate_duration(duration_minutes, self.max_duration_minutes)?;
        let expires_at = self.clock.now() + chrono::Duration::minutes(i64::from(duration_minutes));
        self.assign_role(user_id, role, scope, Some(expires_at), assigned_by)
            .await
    }

    /// Delete exactly one grant. Not idempotent: an unknown id is `NotFound`.
    pub async fn revoke_role(&self, grant_id: GrantId) -> AccessResult<()> {
        let removed = bounded("delete_grant", self.store_timeout, self.store.delete_by_id(grant_id)).await?;
        if removed == 0 {
            warn!(grant_id = %grant_id, "revoke of unknown grant");
            return Err(AccessError::not_found(format!("grant {grant_id}")));
        }
        info!(grant_id = %grant_id, "role revoked");
        Ok(())
    }

    /// Currently-active grants, most recently created first.
    pub async fn get_user_roles(&self, user_id: UserId) -> AccessResult<Vec<Grant>> {
        self.active(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    use warden_core::{ManualClock, StoreError};

    use super::*;
    use crate::store::InMemoryGrantStore;

    fn engine() -> (RbacEngine<Arc<InMemoryGrantStore>>, Arc<ManualClock>, Arc<InMemoryGrantStore>) {
        let store = InMemoryGrantStore::arc();
        let clock = Arc::new(ManualClock::starting_now());
        let engine = RbacEngine::new(store.clone()).with_clock(clock.clone());
        (engine, clock, store)
    }

    fn p(id: &str) -> Scope {
        Scope::Resource(ResourceId::new(id).unwrap())
    }

    /// Returns every grant it was seeded with, expired or not.
    struct LeakyGrantStore(Vec<Grant>);

    #[async_trait]
    impl GrantStore for LeakyGrantStore {
        async fn create(&self, _grant: &Grant) -> Result<(), StoreError> {
            Ok(())
        }

        async fn list_active(&self, user_id: UserId, _now: DateTime<Utc>) -> Result<Vec<Grant>, StoreError> {
            Ok(self.0.iter().filter(|g| g.user_id == user_id).cloned().collect())
        }

        async fn delete_by_id(&self, _id: GrantId) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    struct DownGrantStore;

    #[async_trait]
    impl GrantStore for DownGrantStore {
        async fn create(&self, _grant: &Grant) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn list_active(&self, _user_id: UserId, _now: DateTime<Utc>) -> Result<Vec<Grant>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn delete_by_id(&self, _id: GrantId) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn manager_implies_user_but_not_admin() {
        let (engine, _, _) = engine();
        let u = UserId::new();
        engine
            .assign_role(u, Role::Manager, Scope::Global, None, UserId::new())
            .await
            .unwrap();

        assert!(engine.has_permission(u, Role::User, &Scope::Global).await.unwrap());
        assert!(!engine.has_permission(u, Role::Admin, &Scope::Global).await.unwrap());
    }

    #[tokio::test]
    async fn resource_grant_confined_to_resource() {
        let (engine, _, _) = engine();
        let u = UserId::new();
        engine
            .assign_role(u, Role::ProjectEditor, p("P1"), None, UserId::new())
            .await
            .unwrap();

        assert!(engine.has_permission(u, Role::ProjectEditor, &p("P1")).await.unwrap());
        assert!(!engine.has_permission(u, Role::ProjectEditor, &p("P2")).await.unwrap());
        assert!(!engine.has_permission(u, Role::ProjectEditor, &Scope::Global).await.unwrap());
        assert!(!engine.has_permission(u, Role::ProjectViewer, &p("P1")).await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_is_an_error_not_a_denial() {
        let engine = RbacEngine::new(DownGrantStore);
        let err = engine
            .has_permission(UserId::new(), Role::User, &Scope::Global)
            .await
            .unwrap_err();
        assert!(err.is_store());

        let err = engine
            .has_any_permission(UserId::new(), &[Role::User, Role::Reporter], &Scope::Global)
            .await
            .unwrap_err();
        assert!(err.is_store());
    }

    #[tokio::test]
    async fn duplicate_assignments_are_independent() {
        let (engine, _, _) = engine();
        let u = UserId::new();
        let admin = UserId::new();
        let a = engine.assign_role(u, Role::Reporter, Scope::Global, None, admin).await.unwrap();
        let b = engine.assign_role(u, Role::Reporter, Scope::Global, None, admin).await.unwrap();
        assert_ne!(a.id, b.id);

        engine.revoke_role(a.id).await.unwrap();
        assert!(engine.has_permission(u, Role::Reporter, &Scope::Global).await.unwrap());

        engine.revoke_role(b.id).await.unwrap();
        assert!(!engine.has_permission(u, Role::Reporter, &Scope::Global).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_unknown_grant_is_not_found_and_deletes_nothing() {
        let (engine, _, store) = engine();
        let u = UserId::new();
        engine.assign_role(u, Role::User, Scope::Global, None, u).await.unwrap();

        let err = engine.revoke_role(GrantId::new()).await.unwrap_err();
        assert!(matches!(err, AccessError::NotFound(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_user_roles_is_active_and_newest_first() {
        let (engine, clock, _) = engine();
        let u = UserId::new();
        let admin = UserId::new();

        let first = engine.assign_role(u, Role::User, Scope::Global, None, admin).await.unwrap();
        clock.advance(ChronoDuration::seconds(1));
        let temp = engine
            .assign_temporary_role(u, Role::Reporter, Scope::Global, 5, admin)
            .await
            .unwrap();
        clock.advance(ChronoDuration::seconds(1));
        let last = engine.assign_role(u, Role::ProjectViewer, p("P9"), None, admin).await.unwrap();

        let ids: Vec<_> = engine.get_user_roles(u).await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![last.id, temp.id, first.id]);

        clock.advance(ChronoDuration::minutes(10));
        let ids: Vec<_> = engine.get_user_roles(u).await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![last.id, first.id]);
    }

    #[tokio::test]
    async fn evaluation_filters_expired_grants_the_store_leaks() {
        let now = Utc::now();
        let u = UserId::new();
        let expired = Grant::new(u, Role::Admin, Scope::Global, Some(now - ChronoDuration::minutes(1)), u, now);
        let engine = RbacEngine::new(LeakyGrantStore(vec![expired]))
            .with_clock(Arc::new(ManualClock::new(now)));

        assert!(!engine.has_permission(u, Role::User, &Scope::Global).await.unwrap());
        assert!(engine.get_user_roles(u).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn typed_assignments_validate_role_kind() {
        let (engine, _, _) = engine();
        let u = UserId::new();
        let admin = UserId::new();
        let p1 = ResourceId::new("P1").unwrap();

        assert!(matches!(
            engine.assign_global_role(u, Role::ProjectEditor, admin).await,
            Err(AccessError::Validation(_))
        ));
        assert!(matches!(
            engine.assign_resource_role(u, Role::Admin, p1.clone(), admin).await,
            Err(AccessError::Validation(_))
        ));

        engine.assign_global_role(u, Role::Manager, admin).await.unwrap();
        engine.assign_resource_role(u, Role::ProjectViewer, p1.clone(), admin).await.unwrap();
        assert!(engine.has_role(u, Role::Manager, &Scope::Global).await.unwrap());
        assert!(!engine.has_role(u, Role::User, &Scope::Global).await.unwrap());
        assert!(engine.has_role(u, Role::ProjectViewer, &Scope::Resource(p1)).await.unwrap());
    }

    #[tokio::test]
    async fn temporary_role_duration_is_validated_before_store_access() {
        let engine = RbacEngine::new(DownGrantStore);
        let err = engine
            .assign_temporary_role(UserId::new(), Role::User, Scope::Global, 0, UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Validation(_)));
    }

    #[tokio::test]
    async fn has_any_permission_matches_any_listed_role() {
        let (engine, _, _) = engine();
        let u = UserId::new();
        engine.assign_role(u, Role::Reporter, Scope::Global, None, u).await.unwrap();

        assert!(engine
            .has_any_permission(u, &[Role::Admin, Role::Reporter], &Scope::Global)
            .await
            .unwrap());
        assert!(!engine
            .has_any_permission(u, &[Role::Admin, Role::PlatformModerator], &Scope::Global)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn explain_names_matching_grant() {
        let (engine, _, _) = engine();
        let u = UserId::new();
        let g = engine.assign_role(u, Role::Admin, Scope::Global, None, u).await.unwrap();

        let e = engine.explain_permission(u, Role::Manager, &Scope::Global).await.unwrap();
        assert!(e.granted);
        assert_eq!(e.matched_grant.map(|m| m.grant_id), Some(g.id));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: a grant whose expiry is not in the future never satisfies anything.
        #[test]
        fn expired_grants_never_satisfy(
            held in prop::sample::select(Role::ALL.to_vec()),
            required in prop::sample::select(Role::ALL.to_vec()),
            seconds_ago in 0i64..=86_400,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let now = Utc::now();
            let u = UserId::new();
            let grant = Grant::new(u, held, Scope::Global, Some(now - ChronoDuration::seconds(seconds_ago)), u, now);
            let engine = RbacEngine::new(LeakyGrantStore(vec![grant]))
                .with_clock(Arc::new(ManualClock::new(now)));

            let granted = rt.block_on(engine.has_permission(u, required, &Scope::Global)).unwrap();
            prop_assert!(!granted);
        }
    }
}
