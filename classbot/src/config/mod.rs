//! Bot configuration: BaseConfig (Telegram + log + storage) + ClassroomConfig (roles, timing).

mod base;
mod bot_config;
mod classroom;


pub use base::{BaseConfig, StoreType};
pub use bot_config::BotConfig;
pub use classroom::{parse_superadmins, ClassroomConfig};
