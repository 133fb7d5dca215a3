//! Wraps teloxide::Bot and implements [`classbot_core::Bot`]. Production code sends intents via Telegram; tests can substitute another Bot impl.

use async_trait::async_trait;
use classbot_core::{Bot as CoreBot, ClassbotError, OutboundIntent, Result, UserId};
use teloxide::{prelude::*, types::ChatId};
use tracing::debug;

use crate::keyboard::inline_keyboard;

/// Thin wrapper around teloxide::Bot that implements classbot-core's Bot trait.
#[derive(Clone)]
pub struct TelegramBotAdapter {
    bot: teloxide::Bot,
}

impl TelegramBotAdapter {
    /// Creates an adapter from an existing teloxide Bot.
    pub fn new(bot: teloxide::Bot) -> Self {
        Self { bot }
    }

    /// Returns the underlying teloxide::Bot for direct API use when needed.
    pub fn inner(&self) -> &teloxide::Bot {
        &self.bot
    }
}

#[async_trait]
impl CoreBot for TelegramBotAdapter {
    /// Private chat ids equal user ids, so the target is used as the chat id.
    async fn send_intent(&self, target: UserId, intent: &OutboundIntent) -> Result<()> {
        debug!(target, kind = ?intent.kind, "Sending intent");
        let request = self.bot.send_message(ChatId(target), intent.content.clone());
        let request = match &intent.keyboard {
            Some(keyboard) => request.reply_markup(inline_keyboard(keyboard)),
            None => request,
        };
        request
            .await
            .map_err(|e| ClassbotError::Bot(e.to_string()))?;
        Ok(())
    }
}
