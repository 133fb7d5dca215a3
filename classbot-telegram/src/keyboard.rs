//! Inline keyboard layout for [`KeyboardRef`]s.

use classbot_core::KeyboardRef;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Callback data of the cancel button; arrives as a `/cancel` command.
pub const CANCEL_DATA: &str = "/cancel";

/// Telegram rejects callback data longer than this many bytes.
pub const MAX_CALLBACK_DATA: usize = 64;

const CHOICES_PER_ROW: usize = 2;

/// Button rows as `(label, callback data)` pairs.
///
/// Choices become one button each, two per row, followed by a cancel row. Choices whose text
/// does not fit in callback data are left off; the user can still type them.
pub fn keyboard_rows(keyboard: &KeyboardRef) -> Vec<Vec<(String, String)>> {
    match keyboard {
        KeyboardRef::Choices(choices) => {
            let buttons: Vec<(String, String)> = choices
                .iter()
                .filter(|c| !c.is_empty() && c.len() <= MAX_CALLBACK_DATA)
                .map(|c| (c.clone(), c.clone()))
                .collect();
            let mut rows: Vec<Vec<(String, String)>> = buttons
                .chunks(CHOICES_PER_ROW)
                .map(|chunk| chunk.to_vec())
                .collect();
            rows.push(vec![("Cancel".to_string(), CANCEL_DATA.to_string())]);
            rows
        }
        KeyboardRef::ConfirmCancel => vec![vec![
            ("Yes".to_string(), "yes".to_string()),
            ("No".to_string(), "no".to_string()),
        ]],
    }
}

pub fn inline_keyboard(keyboard: &KeyboardRef) -> InlineKeyboardMarkup {
    let rows = keyboard_rows(keyboard).into_iter().map(|row| {
        row.into_iter()
            .map(|(label, data)| InlineKeyboardButton::callback(label, data))
            .collect::<Vec<_>>()
    });
    InlineKeyboardMarkup::new(rows)
}
