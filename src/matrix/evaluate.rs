//! User-scope evaluation of a Conditional Access policy

use crate::graph::conditional_access::{ConditionalAccessPolicy, UserCondition};
use crate::graph::directory::{Memberships, User};
use std::collections::HashSet;

const ALL_USERS: &str = "All";
const GUESTS_OR_EXTERNAL: &str = "GuestsOrExternalUsers";

fn list(values: &Option<Vec<String>>) -> &[String] {
    values.as_deref().unwrap_or(&[])
}

fn intersects(values: &Option<Vec<String>>, held: &HashSet<String>) -> bool {
    list(values).iter().any(|v| held.contains(v))
}

fn names_user(values: &Option<Vec<String>>, user: &User) -> bool {
    let guest_or_external = user.is_guest() || user.is_external();
    list(values)
        .iter()
        .any(|v| *v == user.id || (v == GUESTS_OR_EXTERNAL && guest_or_external))
}

fn is_excluded(condition: &UserCondition, user: &User, memberships: &Memberships) -> bool {
    names_user(&condition.exclude_users, user)
        || intersects(&condition.exclude_groups, &memberships.group_ids)
        || intersects(&condition.exclude_roles, &memberships.role_template_ids)
}

fn is_included(condition: &UserCondition, user: &User, memberships: &Memberships) -> bool {
    list(&condition.include_users).iter().any(|v| v == ALL_USERS)
        || names_user(&condition.include_users, user)
        || intersects(&condition.include_groups, &memberships.group_ids)
        || intersects(&condition.include_roles, &memberships.role_template_ids)
}

/// Whether `policy` targets `user`; any exclusion overrides every inclusion
pub fn is_in_scope(policy: &ConditionalAccessPolicy, user: &User, memberships: &Memberships) -> bool {
    let Some(condition) = policy.user_condition() else {
        return false;
    };

    if is_excluded(condition, user, memberships) {
        return false;
    }

    is_included(condition, user, memberships)
}
