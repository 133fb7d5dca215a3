//! BotConfig: BaseConfig + ClassroomConfig. Use load() for env-based loading.

use classbot_core::{Result, UserId};
use conversation::EngineConfig;
use permission_gate::UnknownUserPolicy;
use reminder::ReminderConfig;

use super::{BaseConfig, ClassroomConfig, StoreType};

/// Bot config: BaseConfig + classroom settings. Use BotConfig::load() for env-based loading.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub base: BaseConfig,
    pub classroom: ClassroomConfig,
}

impl BotConfig {
    /// Load full config from environment variables. If `token` is provided it overrides BOT_TOKEN.
    /// Call validate() after load to check config before init.
    pub fn load(token: Option<String>) -> Result<Self> {
        let base = BaseConfig::load(token)?;
        let classroom = ClassroomConfig::from_env()?;
        Ok(Self { base, classroom })
    }

    /// Validate config. Call after load() to fail fast before init.
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        self.classroom.validate()
    }

    pub fn base(&self) -> &BaseConfig {
        &self.base
    }
    pub fn classroom(&self) -> &ClassroomConfig {
        &self.classroom
    }

    pub fn bot_token(&self) -> Option<&str> {
        self.base.bot_token.as_deref()
    }
    pub fn database_url(&self) -> &str {
        &self.base.database_url
    }
    pub fn log_file(&self) -> &str {
        &self.base.log_file
    }
    pub fn telegram_api_url(&self) -> Option<&str> {
        self.base.telegram_api_url.as_deref()
    }
    pub fn store_type(&self) -> StoreType {
        self.base.store_type
    }

    pub fn superadmins(&self) -> &[UserId] {
        &self.classroom.superadmins
    }
    pub fn unknown_user_policy(&self) -> UnknownUserPolicy {
        self.classroom.unknown_user_policy
    }
    pub fn engine_config(&self) -> EngineConfig {
        self.classroom.engine_config()
    }
    pub fn reminder_config(&self) -> ReminderConfig {
        self.classroom.reminder_config()
    }
}
