//! Class administration settings: super-admins, unknown-user policy, engine and reminder timing.

use std::env;
use std::time::Duration;

use classbot_core::{ClassbotError, Result, UserId};
use conversation::EngineConfig;
use permission_gate::UnknownUserPolicy;
use reminder::{parse_lead_times, ReminderConfig};

use super::base::env_parse;

#[derive(Debug, Clone)]
pub struct ClassroomConfig {
    /// SUPERADMIN_ID, comma separated.
    pub superadmins: Vec<UserId>,
    pub unknown_user_policy: UnknownUserPolicy,
    pub session_timeout_secs: u64,
    pub storage_timeout_ms: u64,
    pub reminder_tick_secs: u64,
    /// REMINDER_LEAD_TIMES, e.g. `24h,1h`.
    pub reminder_lead_times: Vec<chrono::Duration>,
    pub delivery_timeout_ms: u64,
}

/// Parses `1, 2,3` into ids. Empty input or a non-numeric entry is an error.
pub fn parse_superadmins(raw: &str) -> Result<Vec<UserId>> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id: UserId = part.parse().map_err(|_| {
            ClassbotError::Config(format!("SUPERADMIN_ID contains a non-numeric id: {}", part))
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(ClassbotError::Config(
            "SUPERADMIN_ID must name at least one user id".to_string(),
        ));
    }
    Ok(ids)
}

impl ClassroomConfig {
    pub fn from_env() -> Result<Self> {
        let superadmins = match env::var("SUPERADMIN_ID") {
            Ok(raw) => parse_superadmins(&raw)?,
            Err(_) => {
                return Err(ClassbotError::Config("SUPERADMIN_ID not set".to_string()));
            }
        };
        let reminder_lead_times = match env::var("REMINDER_LEAD_TIMES") {
            Ok(raw) if !raw.trim().is_empty() => parse_lead_times(&raw)
                .map_err(|e| ClassbotError::Config(format!("REMINDER_LEAD_TIMES: {}", e)))?,
            _ => vec![chrono::Duration::hours(24), chrono::Duration::hours(1)],
        };

        Ok(Self {
            superadmins,
            unknown_user_policy: env_parse("UNKNOWN_USER_POLICY", UnknownUserPolicy::default())?,
            session_timeout_secs: env_parse("SESSION_TIMEOUT_SECS", 1800)?,
            storage_timeout_ms: env_parse("STORAGE_TIMEOUT_MS", 3000)?,
            reminder_tick_secs: env_parse("REMINDER_TICK_SECS", 60)?,
            reminder_lead_times,
            delivery_timeout_ms: env_parse("DELIVERY_TIMEOUT_MS", 5000)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("SESSION_TIMEOUT_SECS", self.session_timeout_secs),
            ("STORAGE_TIMEOUT_MS", self.storage_timeout_ms),
            ("REMINDER_TICK_SECS", self.reminder_tick_secs),
            ("DELIVERY_TIMEOUT_MS", self.delivery_timeout_ms),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ClassbotError::Config(format!("{} must be greater than zero", key)));
        }
        if self.reminder_lead_times.is_empty() {
            return Err(ClassbotError::Config(
                "REMINDER_LEAD_TIMES must name at least one lead time".to_string(),
            ));
        }
        if self.superadmins.is_empty() {
            return Err(ClassbotError::Config(
                "SUPERADMIN_ID must name at least one user id".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            session_timeout: chrono::Duration::seconds(self.session_timeout_secs as i64),
            storage_timeout: Duration::from_millis(self.storage_timeout_ms),
        }
    }

    pub fn reminder_config(&self) -> ReminderConfig {
        ReminderConfig::new(
            self.reminder_lead_times.clone(),
            Duration::from_secs(self.reminder_tick_secs),
            Duration::from_millis(self.delivery_timeout_ms),
        )
    }
}
