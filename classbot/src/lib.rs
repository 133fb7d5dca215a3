//! # classbot
//!
//! Application layer: environment configuration, component assembly and the runners behind the
//! `classbot` binary (Telegram bot with reminder loop, one-shot reminder scan, stdin console).

pub mod cli;
pub mod components;
pub mod config;
pub mod console_bot;
pub mod runner;

pub use cli::{load_config, Cli, Commands};
pub use components::{build_components, build_handler_chain, create_store, ClassbotComponents};
pub use config::{BaseConfig, BotConfig, ClassroomConfig, StoreType};
pub use console_bot::{render_intent, ConsoleBot};
pub use runner::{console_event, drive_console, run_bot, run_console, run_tick};
