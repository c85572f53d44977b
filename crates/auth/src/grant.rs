use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{GrantId, ResourceId, UserId};

use crate::Role;

/// Where a grant (or a requirement) applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "resource_id")]
pub enum Scope {
    Global,
    Resource(ResourceId),
}

impl Scope {
    pub fn resource(id: ResourceId) -> Self {
        Self::Resource(id)
    }

    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            Scope::Global => None,
            Scope::Resource(id) => Some(id),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }
}

impl From<Option<ResourceId>> for Scope {
    fn from(value: Option<ResourceId>) -> Self {
        value.map_or(Scope::Global, Scope::Resource)
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Resource(id) => write!(f, "resource:{id}"),
        }
    }
}

/// A role held by a user, optionally resource-scoped and time-bound.
///
/// Grants are immutable once stored; they only ever disappear (revocation or
/// expiry cleanup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    pub user_id: UserId,
    pub role: Role,
    pub scope: Scope,
    /// `None` means permanent.
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Grant {
    pub fn new(
        user_id: UserId,
        role: Role,
        scope: Scope,
        expires_at: Option<DateTime<Utc>>,
        granted_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GrantId::new(),
            user_id,
            role,
            scope,
            expires_at,
            granted_by,
            created_at,
        }
    }

    /// A grant is active until the instant it expires.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }
}

/// Keep only grants active at `now`, newest first.
pub fn active_grants(grants: Vec<Grant>, now: DateTime<Utc>) -> Vec<Grant> {
    let mut active: Vec<Grant> = grants.into_iter().filter(|g| g.is_active_at(now)).collect();
    sort_newest_first(&mut active);
    active
}

/// Order by creation time descending; ids (UUIDv7) break ties.
pub fn sort_newest_first(grants: &mut [Grant]) {
    grants.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
