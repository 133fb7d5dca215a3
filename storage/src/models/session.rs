//! Conversation session persisted per user.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use classbot_core::UserId;
use serde::{Deserialize, Serialize};

/// State tag of a session with no active workflow.
pub const IDLE_STATE: &str = "idle";

/// Current FSM state tag plus the step data collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub state: String,
    pub data: BTreeMap<String, String>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn idle(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            state: IDLE_STATE.to_string(),
            data: BTreeMap::new(),
            last_activity: now,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == IDLE_STATE
    }
}
