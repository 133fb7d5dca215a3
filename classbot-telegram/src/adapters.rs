//! Adapters from Telegram (teloxide) types to classbot_core types.
//! Depends only on teloxide and classbot_core type definitions.

use classbot_core::{InboundEvent, ToCoreEvent, ToCoreUser, User};

/// Wraps a teloxide User for conversion to core [`User`].
pub struct TelegramUserWrapper<'a>(pub &'a teloxide::types::User);

impl<'a> ToCoreUser for TelegramUserWrapper<'a> {
    fn to_core(&self) -> User {
        User {
            id: self.0.id.0 as i64,
            username: self.0.username.clone(),
            first_name: Some(self.0.first_name.clone()),
            last_name: self.0.last_name.clone(),
        }
    }
}

/// Text starting with `/` is a command, anything else free text.
pub fn event_from_text(user: User, text: &str) -> InboundEvent {
    if text.trim_start().starts_with('/') {
        InboundEvent::command(user, text.trim())
    } else {
        InboundEvent::text(user, text)
    }
}

/// Button press. Buttons carrying `/cancel` keep their command meaning through `command_name`.
pub fn event_from_callback_data(user: User, data: &str) -> InboundEvent {
    InboundEvent::callback(user, data)
}

/// Wraps a teloxide Message for conversion to a core [`InboundEvent`].
pub struct TelegramMessageWrapper<'a>(pub &'a teloxide::types::Message);

impl<'a> ToCoreEvent for TelegramMessageWrapper<'a> {
    /// `None` for group chats, anonymous senders, bots and non-text messages.
    fn to_core(&self) -> Option<InboundEvent> {
        if !self.0.chat.is_private() {
            return None;
        }
        let from = self.0.from.as_ref().filter(|u| !u.is_bot)?;
        let text = self.0.text()?;
        Some(event_from_text(TelegramUserWrapper(from).to_core(), text))
    }
}

/// Wraps a teloxide CallbackQuery (inline keyboard press).
pub struct TelegramCallbackWrapper<'a>(pub &'a teloxide::types::CallbackQuery);

impl<'a> ToCoreEvent for TelegramCallbackWrapper<'a> {
    fn to_core(&self) -> Option<InboundEvent> {
        let data = self.0.data.as_deref()?;
        Some(event_from_callback_data(
            TelegramUserWrapper(&self.0.from).to_core(),
            data,
        ))
    }
}
