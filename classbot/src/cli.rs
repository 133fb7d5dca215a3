//! CLI parser and config loading.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use classbot_core::{Result, UserId};

use crate::config::BotConfig;

#[derive(Parser)]
#[command(name = "classbot")]
#[command(about = "Class administration bot: run, tick, console", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the Telegram bot and the reminder loop (config from env; token can override BOT_TOKEN).
    Run {
        #[arg(short, long)]
        token: Option<String>,
    },
    /// Run one reminder scan and print the notifications it sends.
    Tick {
        /// Scan time as RFC3339, e.g. 2030-06-01T08:00:00Z (default: now).
        #[arg(long, value_parser = parse_at)]
        at: Option<DateTime<Utc>>,
    },
    /// Talk to the bot from stdin as the given user id.
    Console {
        #[arg(short, long)]
        user: UserId,
    },
}

fn parse_at(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC3339 time: {}", e))
}

/// Load BotConfig from environment. If `token` is provided it overrides BOT_TOKEN.
pub fn load_config(token: Option<String>) -> Result<BotConfig> {
    BotConfig::load(token)
}
