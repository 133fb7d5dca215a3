//! # classbot-telegram
//!
//! Telegram transport: converts teloxide updates to [`classbot_core::InboundEvent`]s, renders
//! [`classbot_core::KeyboardRef`]s as inline keyboards, implements [`classbot_core::Bot`] and runs
//! the update dispatcher in front of a [`handler_chain::HandlerChain`].
//! Only private chats are served; a user's id doubles as their chat id.

mod adapters;
mod bot_adapter;
mod config;
mod keyboard;
mod runner;

pub use adapters::{
    event_from_callback_data, event_from_text, TelegramCallbackWrapper, TelegramMessageWrapper,
    TelegramUserWrapper,
};
pub use bot_adapter::TelegramBotAdapter;
pub use config::TelegramConfig;
pub use keyboard::{inline_keyboard, keyboard_rows, CANCEL_DATA, MAX_CALLBACK_DATA};
pub use runner::run_repl;
