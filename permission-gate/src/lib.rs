//! # permission-gate
//!
//! Central authorization: a fixed [`Action`] taxonomy, a static role → action table, and
//! [`PermissionGate`] which resolves roles through the store and fails closed.

mod action;
mod gate;

pub use action::{action_for_granting, permitted_actions, role_permits, Action};
pub use gate::{section_scope_permits, PermissionGate, UnknownUserPolicy};
