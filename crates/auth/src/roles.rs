use core::str::FromStr;

use serde::{Deserialize, Serialize};

use warden_core::AccessError;

/// Role identifier used for RBAC, drawn from a fixed catalog.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    User,
    PlatformModerator,
    Reporter,
    ProjectEditor,
    ProjectViewer,
}

/// How a role takes part in evaluation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoleKind {
    /// Totally ordered; satisfies any leveled requirement of equal or lower level.
    Leveled(u8),
    /// Satisfies only an exact-match requirement.
    Flat,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Admin,
        Role::Manager,
        Role::User,
        Role::PlatformModerator,
        Role::Reporter,
        Role::ProjectEditor,
        Role::ProjectViewer,
    ];

    pub fn kind(self) -> RoleKind {
        match self {
            Role::Admin => RoleKind::Leveled(3),
            Role::Manager => RoleKind::Leveled(2),
            Role::User => RoleKind::Leveled(1),
            Role::PlatformModerator
            | Role::Reporter
            | Role::ProjectEditor
            | Role::ProjectViewer => RoleKind::Flat,
        }
    }

    pub fn level(self) -> Option<u8> {
        match self.kind() {
            RoleKind::Leveled(level) => Some(level),
            RoleKind::Flat => None,
        }
    }

    pub fn is_leveled(self) -> bool {
        self.level().is_some()
    }

    /// Roles that only make sense scoped to a single resource.
    pub fn is_resource_role(self) -> bool {
        matches!(self, Role::ProjectEditor | Role::ProjectViewer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::User => "user",
            Role::PlatformModerator => "platform_moderator",
            Role::Reporter => "reporter",
            Role::ProjectEditor => "project_editor",
            Role::ProjectViewer => "project_viewer",
        }
    }

    /// Does holding `self` meet a requirement for `required`, ignoring scope?
    pub fn implies(self, required: Role) -> bool {
        if self == required {
            return true;
        }
        match (self.kind(), required.kind()) {
            (RoleKind::Leveled(held), RoleKind::Leveled(needed)) => held >= needed,
            _ => false,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AccessError::validation(format!("unknown role '{s}'")))
    }
}
