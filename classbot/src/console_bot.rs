//! [`ConsoleBot`]: a [`Bot`] that prints intents instead of sending them. Used by the `console`
//! and `tick` commands; tests capture the rendered lines.

use std::sync::Mutex;

use async_trait::async_trait;
use classbot_core::{Bot, IntentKind, KeyboardRef, OutboundIntent, Result, UserId};

fn kind_label(kind: IntentKind) -> &'static str {
    match kind {
        IntentKind::Prompt => "prompt",
        IntentKind::Confirmation => "ok",
        IntentKind::Error => "error",
        IntentKind::Notification => "notification",
    }
}

/// One intent as console text: a tagged first line, then the keyboard options if any.
pub fn render_intent(target: UserId, intent: &OutboundIntent) -> String {
    let mut out = format!("[{} -> {}] {}", kind_label(intent.kind), target, intent.content);
    match &intent.keyboard {
        Some(KeyboardRef::Choices(choices)) if !choices.is_empty() => {
            out.push_str(&format!("\n  options: {} | /cancel", choices.join(" | ")));
        }
        Some(KeyboardRef::Choices(_)) => out.push_str("\n  options: /cancel"),
        Some(KeyboardRef::ConfirmCancel) => out.push_str("\n  options: yes | no"),
        None => {}
    }
    out
}

pub struct ConsoleBot {
    captured: Option<Mutex<Vec<String>>>,
}

impl ConsoleBot {
    /// Prints to stdout.
    pub fn stdout() -> Self {
        Self { captured: None }
    }

    /// Keeps rendered intents in memory instead of printing.
    pub fn capturing() -> Self {
        Self {
            captured: Some(Mutex::new(Vec::new())),
        }
    }

    /// Rendered intents so far (capturing mode only).
    pub fn captured(&self) -> Vec<String> {
        self.captured
            .as_ref()
            .and_then(|lines| lines.lock().ok().map(|l| l.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Bot for ConsoleBot {
    async fn send_intent(&self, target: UserId, intent: &OutboundIntent) -> Result<()> {
        let rendered = render_intent(target, intent);
        match &self.captured {
            Some(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(rendered);
                }
            }
            None => println!("{}", rendered),
        }
        Ok(())
    }
}
