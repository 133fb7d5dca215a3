//! Runners for the three CLI commands: the Telegram bot with its reminder loop, a single
//! reminder scan, and the stdin console.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use classbot_core::{init_tracing, Bot, HandlerResponse, InboundEvent, User, UserId};
use classbot_telegram::{run_repl, TelegramBotAdapter, TelegramConfig};
use conversation::ConversationHandler;
use handler_chain::HandlerChain;
use reminder::{ReminderScheduler, TickReport};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::components::{build_components, build_handler_chain, create_store};
use crate::config::BotConfig;
use crate::console_bot::ConsoleBot;

fn init_logging(config: &BotConfig) -> Result<()> {
    config.validate()?;
    init_tracing(config.log_file())?;
    Ok(())
}

/// Re-derives reminder jobs for open records. Failure is logged; serving continues.
async fn recover_jobs(scheduler: &ReminderScheduler) {
    match scheduler.recover().await {
        Ok(restored) => info!(restored, "step: reminder jobs recovered"),
        Err(e) => error!(error = %e, "Reminder recovery failed"),
    }
}

/// Main entry: validate config, init logging, build components, recover reminder jobs, then run
/// the Telegram dispatcher and the reminder loop until Ctrl-C.
#[instrument(skip(config))]
pub async fn run_bot(config: BotConfig) -> Result<()> {
    init_logging(&config)?;
    let telegram = TelegramConfig {
        bot_token: config.base().require_bot_token()?.to_string(),
        telegram_api_url: config.telegram_api_url().map(str::to_string),
        log_file: Some(config.log_file().to_string()),
    };
    let teloxide_bot = telegram.build_bot()?;
    let delivery: Arc<dyn Bot> = Arc::new(TelegramBotAdapter::new(teloxide_bot.clone()));

    info!(
        database_url = %config.database_url(),
        store_type = %config.store_type(),
        superadmins = ?config.superadmins(),
        "Initializing bot"
    );

    let store = create_store(&config).await?;
    let components = build_components(&config, store, delivery.clone());
    recover_jobs(&components.scheduler).await;

    let conversation = Arc::new(ConversationHandler::queued(
        components.engine.clone(),
        delivery.clone(),
    ));
    let handler_chain = build_handler_chain(&config, &components, conversation);

    let shutdown = CancellationToken::new();
    let reminders = tokio::spawn(components.scheduler.clone().run(shutdown.clone()));

    info!("Bot started successfully");
    let result = run_repl(teloxide_bot, handler_chain, delivery).await;

    shutdown.cancel();
    if let Err(e) = reminders.await {
        warn!(error = %e, "Reminder loop ended abnormally");
    }
    result
}

/// One reminder scan at `at` (default now); notifications are printed.
#[instrument(skip(config))]
pub async fn run_tick(config: BotConfig, at: Option<DateTime<Utc>>) -> Result<TickReport> {
    init_logging(&config)?;
    let store = create_store(&config).await?;
    let components = build_components(&config, store, Arc::new(ConsoleBot::stdout()));
    recover_jobs(&components.scheduler).await;

    let at = at.unwrap_or_else(Utc::now);
    let report = components.scheduler.tick(at).await?;
    info!(
        at = %at,
        fired = report.fired,
        closed = report.closed,
        skipped = report.skipped,
        failed_deliveries = report.failed_deliveries,
        "step: tick finished"
    );
    Ok(report)
}

/// Drives the engine as `user_id` from stdin lines; replies and reminders are printed.
#[instrument(skip(config))]
pub async fn run_console(config: BotConfig, user_id: UserId) -> Result<()> {
    init_logging(&config)?;
    let bot = Arc::new(ConsoleBot::stdout());
    let store = create_store(&config).await?;
    let components = build_components(&config, store, bot.clone());
    recover_jobs(&components.scheduler).await;

    let conversation = Arc::new(ConversationHandler::inline(components.engine.clone()));
    let handler_chain = build_handler_chain(&config, &components, conversation);

    let shutdown = CancellationToken::new();
    let reminders = tokio::spawn(components.scheduler.clone().run(shutdown.clone()));

    println!("Console for user {}. Type /help to start, Ctrl-D to quit.", user_id);
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    let handled = drive_console(&handler_chain, bot.as_ref(), User::with_id(user_id), reader).await;

    shutdown.cancel();
    if let Err(e) = reminders.await {
        warn!(error = %e, "Reminder loop ended abnormally");
    }
    let handled = handled?;
    info!(events = handled, "Console session ended");
    Ok(())
}

/// One input line as an event: `/...` is a command, anything else text. Blank lines are skipped.
pub fn console_event(user: User, line: &str) -> Option<InboundEvent> {
    let line = line.trim();
    if line.is_empty() {
        None
    } else if line.starts_with('/') {
        Some(InboundEvent::command(user, line))
    } else {
        Some(InboundEvent::text(user, line))
    }
}

/// Feeds every line of `reader` through the chain and delivers replies via `bot`.
/// Returns the number of events handled.
pub async fn drive_console<R>(
    chain: &HandlerChain,
    bot: &dyn Bot,
    user: User,
    reader: R,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0;
    while let Some(line) = lines.next_line().await? {
        let Some(event) = console_event(user.clone(), &line) else {
            continue;
        };
        handled += 1;
        match chain.handle(&event).await {
            Ok(HandlerResponse::Reply(intents)) => {
                for intent in &intents {
                    if let Err(e) = bot.deliver(intent).await {
                        error!(error = %e, "Failed to print reply");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, user_id = user.id, "Handler chain failed"),
        }
    }
    Ok(handled)
}
