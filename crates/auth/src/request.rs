use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{AccessError, RequestId, UserId};

use crate::{Role, Scope};

/// Shortest escalation that can be requested.
pub const MIN_DURATION_MINUTES: u32 = 1;

/// Longest escalation that can be requested (one day).
pub const MAX_DURATION_MINUTES: u32 = 1440;

/// Lifecycle state of an escalation request.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl core::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RequestStatus {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(AccessError::validation(format!("unknown request status '{other}'"))),
        }
    }
}

/// Check a requested escalation length against `1..=max_minutes`.
///
/// `max_minutes` is clamped to [`MAX_DURATION_MINUTES`].
pub fn validate_duration(duration_minutes: u32, max_minutes: u32) -> Result<(), AccessError> {
    let max = max_minutes.clamp(MIN_DURATION_MINUTES, MAX_DURATION_MINUTES);
    if (MIN_DURATION_MINUTES..=max).contains(&duration_minutes) {
        Ok(())
    } else {
        Err(AccessError::validation(format!(
            "duration_minutes must be between {MIN_DURATION_MINUTES} and {max}, got {duration_minutes}"
        )))
    }
}

/// A user's request to temporarily hold a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: RequestId,
    pub user_id: UserId,
    pub role: Role,
    pub scope: Scope,
    pub duration_minutes: u32,
    pub reason: String,
    pub status: RequestStatus,
    /// The actor that approved or rejected the request.
    pub approved_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscalationRequest {
    /// Build a new pending request, validating duration and reason.
    pub fn pending(
        user_id: UserId,
        role: Role,
        scope: Scope,
        duration_minutes: u32,
        reason: impl Into<String>,
        max_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, AccessError> {
        validate_duration(duration_minutes, max_minutes)?;
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(AccessError::validation("reason must not be empty"));
        }

        Ok(Self {
            id: RequestId::new(),
            user_id,
            role,
            scope,
            duration_minutes,
            reason,
            status: RequestStatus::Pending,
            approved_by: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Expiry of the grant materialized when approved at `approved_at`.
    pub fn grant_expiry(&self, approved_at: DateTime<Utc>) -> DateTime<Utc> {
        approved_at + self.duration()
    }
}

/// Order by creation time descending; ids (UUIDv7) break ties.
pub fn sort_requests_newest_first(requests: &mut [EscalationRequest]) {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
