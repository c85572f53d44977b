use serde::Serialize;

use warden_core::{GrantId, UserId};

use crate::hierarchy::find_satisfying;
use crate::{Grant, Role, Scope};

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of a permission decision.
///
/// Answers "why was this allowed/denied?" without re-running the check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionExplanation {
    pub user_id: UserId,
    pub required_role: Role,
    pub scope: Scope,
    pub granted: bool,

    /// Human-readable reason for the decision.
    pub reason: String,

    /// The grant that satisfied the requirement, when granted.
    pub matched_grant: Option<MatchedGrant>,

    /// Number of active grants the decision was made over.
    pub active_grant_count: usize,

    /// If denied, this explains what was missing.
    pub denial: Option<DenialKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedGrant {
    pub grant_id: GrantId,
    pub role: Role,
    pub via_hierarchy: bool,
    pub permanent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// The user holds no active grant at all.
    NoActiveGrants,
    /// Grants exist for the role, but in another scope.
    ScopeMismatch,
    /// Grants exist in this scope, but none ranks high enough or matches.
    InsufficientRole,
}

/// Explain the decision for `required` in `scope` over `active` grants.
pub fn explain(user_id: UserId, active: &[Grant], required: Role, scope: &Scope) -> PermissionExplanation {
    if let Some(grant) = find_satisfying(active, required, scope) {
        let via_hierarchy = grant.role != required;
        let reason = if via_hierarchy {
            format!("role '{}' outranks required role '{required}' in {scope}", grant.role)
        } else {
            format!("holds role '{required}' in {scope}")
        };

        return PermissionExplanation {
            user_id,
            required_role: required,
            scope: scope.clone(),
            granted: true,
            reason,
            matched_grant: Some(MatchedGrant {
                grant_id: grant.id,
                role: grant.role,
                via_hierarchy,
                permanent: grant.is_permanent(),
            }),
            active_grant_count: active.len(),
            denial: None,
        };
    }

    let denial = if active.is_empty() {
        DenialKind::NoActiveGrants
    } else if active
        .iter()
        .any(|g| &g.scope != scope && g.role.implies(required))
    {
        DenialKind::ScopeMismatch
    } else {
        DenialKind::InsufficientRole
    };

    let reason = match denial {
        DenialKind::NoActiveGrants => "user holds no active grants".to_string(),
        DenialKind::ScopeMismatch => {
            format!("a grant would satisfy '{required}' but not in {scope}")
        }
        DenialKind::InsufficientRole => {
            format!("no active grant satisfies '{required}' in {scope}")
        }
    };

    PermissionExplanation {
        user_id,
        required_role: required,
        scope: scope.clone(),
        granted: false,
        reason,
        matched_grant: None,
        active_grant_count: active.len(),
        denial: Some(denial),
    }
}
