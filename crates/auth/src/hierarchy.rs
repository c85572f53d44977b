//! Hierarchy evaluation: does a set of grants satisfy a requirement?
//!
//! - No IO
//! - No clock (callers pass grants already filtered to the active ones)
//! - Fail-closed: no matching grant means no permission

use crate::{Grant, Role, Scope};

/// First grant that satisfies `required` within `scope`, if any.
///
/// A grant is a candidate only when its scope equals the requirement's scope:
/// a global grant never satisfies a resource-scoped requirement, and a
/// resource grant never satisfies a global one.
pub fn find_satisfying<'a, I>(active: I, required: Role, scope: &Scope) -> Option<&'a Grant>
where
    I: IntoIterator<Item = &'a Grant>,
{
    active
        .into_iter()
        .find(|g| &g.scope == scope && g.role.implies(required))
}

pub fn satisfies<'a, I>(active: I, required: Role, scope: &Scope) -> bool
where
    I: IntoIterator<Item = &'a Grant>,
{
    find_satisfying(active, required, scope).is_some()
}

/// Exact role in exact scope; the hierarchy is not consulted.
pub fn satisfies_exact<'a, I>(active: I, role: Role, scope: &Scope) -> bool
where
    I: IntoIterator<Item = &'a Grant>,
{
    active
        .into_iter()
        .any(|g| &g.scope == scope && g.role == role)
}
