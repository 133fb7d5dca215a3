//! Permission gate: resolves a user's role and checks it against the static table.
//!
//! Fails closed: storage errors, deactivated users and (by policy) unknown users get no permissions.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use classbot_core::{Role, UserId};
use storage::{Section, Store};
use tracing::{debug, info, warn};

use crate::action::{action_for_granting, permitted_actions, role_permits, Action};

/// Treatment of users the store has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownUserPolicy {
    /// Same permissions as a registered student.
    #[default]
    Student,
    /// No permissions at all.
    Deny,
}

impl FromStr for UnknownUserPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(UnknownUserPolicy::Student),
            "deny" => Ok(UnknownUserPolicy::Deny),
            other => Err(format!("unknown user policy: {}", other)),
        }
    }
}

impl fmt::Display for UnknownUserPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownUserPolicy::Student => f.write_str("student"),
            UnknownUserPolicy::Deny => f.write_str("deny"),
        }
    }
}

/// Answers "may this user do that?". No side effects.
pub struct PermissionGate {
    store: Arc<dyn Store>,
    policy: UnknownUserPolicy,
    superadmins: HashSet<UserId>,
}

impl PermissionGate {
    pub fn new(
        store: Arc<dyn Store>,
        policy: UnknownUserPolicy,
        superadmins: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            store,
            policy,
            superadmins: superadmins.into_iter().collect(),
        }
    }

    /// Configured super-admin identities resolve to SuperAdmin whatever the store says.
    pub fn is_configured_superadmin(&self, user_id: UserId) -> bool {
        self.superadmins.contains(&user_id)
    }

    /// Effective role, or `None` when the user has no permissions.
    pub async fn resolve_role(&self, user_id: UserId) -> Option<Role> {
        if self.is_configured_superadmin(user_id) {
            return Some(Role::SuperAdmin);
        }
        match self.store.get_user(user_id).await {
            Ok(Some(user)) if !user.active => {
                debug!(user_id, "User is deactivated");
                None
            }
            Ok(Some(user)) => Some(user.role),
            Ok(None) => match self.policy {
                UnknownUserPolicy::Student => Some(Role::Student),
                UnknownUserPolicy::Deny => None,
            },
            Err(e) => {
                warn!(user_id, error = %e, "Role lookup failed, denying");
                None
            }
        }
    }

    /// Role-table check only.
    pub async fn authorize(&self, user_id: UserId, action: Action) -> bool {
        let allowed = self
            .resolve_role(user_id)
            .await
            .map(|role| role_permits(role, action))
            .unwrap_or(false);
        log_decision(user_id, action, allowed);
        allowed
    }

    /// Role-table check plus section scope: instructors only act on sections they teach and
    /// students only submit in sections whose roster holds them. Admins are unscoped.
    pub async fn authorize_in_section(
        &self,
        user_id: UserId,
        action: Action,
        section: &Section,
    ) -> bool {
        let allowed = match self.resolve_role(user_id).await {
            Some(role) => {
                role_permits(role, action) && section_scope_permits(user_id, role, action, section)
            }
            None => false,
        };
        log_decision(user_id, action, allowed);
        allowed
    }

    /// Whether `user_id` may change someone's role to `role`.
    pub async fn may_grant(&self, user_id: UserId, role: Role) -> bool {
        self.authorize(user_id, action_for_granting(role)).await
    }

    /// Actions available to the user; empty when denied entirely.
    pub async fn permitted(&self, user_id: UserId) -> Vec<Action> {
        self.resolve_role(user_id)
            .await
            .map(|role| permitted_actions(role).to_vec())
            .unwrap_or_default()
    }
}

fn log_decision(user_id: UserId, action: Action, allowed: bool) {
    if allowed {
        debug!(user_id, action = %action, "Permission granted");
    } else {
        info!(user_id, action = %action, "Permission denied");
    }
}

/// Section-level restriction applied after the role table.
pub fn section_scope_permits(user_id: UserId, role: Role, action: Action, section: &Section) -> bool {
    match role {
        Role::SuperAdmin | Role::Admin => true,
        Role::Instructor if action.is_section_scoped() => section.is_instructor(user_id),
        Role::Instructor => true,
        Role::Student if action == Action::SubmitReport => section.is_enrolled(user_id),
        Role::Student => true,
    }
}
