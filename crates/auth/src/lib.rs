//! `warden-auth` — pure authorization model (roles, grants, escalation requests).
//!
//! This crate is intentionally decoupled from storage, transport and the clock:
//! every decision is a function of the grants handed to it.

pub mod authorize;
pub mod grant;
pub mod hierarchy;
pub mod request;
pub mod roles;

pub use authorize::{explain, DenialKind, MatchedGrant, PermissionExplanation};
pub use grant::{active_grants, sort_newest_first, Grant, Scope};
pub use hierarchy::{find_satisfying, satisfies, satisfies_exact};
pub use request::{
    sort_requests_newest_first, validate_duration, EscalationRequest, RequestStatus,
    MAX_DURATION_MINUTES, MIN_DURATION_MINUTES,
};
pub use roles::{Role, RoleKind};
