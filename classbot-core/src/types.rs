//! Core types: identities, roles, inbound events, outbound intents, and the Handler trait.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable numeric id assigned by the transport (Telegram user id).
pub type UserId = i64;
pub type CourseId = i64;
pub type SectionId = i64;
pub type RecordId = i64;

/// Role of a user in the class administration model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    SuperAdmin,
    Admin,
    Instructor,
    Student,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::Admin, Role::Instructor, Role::Student];

    /// Lower-case name used in storage and in user input.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "superadmin",
            Role::Admin => "admin",
            Role::Instructor => "instructor",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "superadmin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "instructor" => Ok(Role::Instructor),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// User identity as seen by the transport (id, username, names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    /// Identity with only an id; used by tests and the console dispatcher.
    pub fn with_id(id: UserId) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
            last_name: None,
        }
    }

    /// "First Last", falling back to @username and then `User_<id>`.
    pub fn display_name(&self) -> String {
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        match &self.username {
            Some(u) if !u.is_empty() => format!("@{}", u),
            _ => format!("User_{}", self.id),
        }
    }
}

/// How the payload of an inbound event reached the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Slash command, e.g. `/enroll`.
    Command,
    /// Free text typed by the user.
    Text,
    /// Button press; payload is the chosen option.
    Callback,
}

/// One event from the dispatcher: who sent it, what kind, and the raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub user: User,
    pub kind: EventKind,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(user: User, kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user,
            kind,
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Builds a command event; a missing leading `/` is added.
    pub fn command(user: User, command: &str) -> Self {
        let payload = if command.starts_with('/') {
            command.to_string()
        } else {
            format!("/{}", command)
        };
        Self::new(user, EventKind::Command, payload)
    }

    pub fn text(user: User, text: impl Into<String>) -> Self {
        Self::new(user, EventKind::Text, text)
    }

    pub fn callback(user: User, data: impl Into<String>) -> Self {
        Self::new(user, EventKind::Callback, data)
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    /// Command name without the slash and `@botname` suffix, lower-cased. `None` for non-commands.
    pub fn command_name(&self) -> Option<String> {
        if self.kind != EventKind::Command && !self.payload.trim_start().starts_with('/') {
            return None;
        }
        let first = self.payload.trim().split_whitespace().next()?;
        let name = first.trim_start_matches('/');
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() {
            return None;
        }
        Some(name.to_ascii_lowercase())
    }

    /// Text after the command word, trimmed. Empty for non-commands.
    pub fn command_args(&self) -> &str {
        if self.command_name().is_none() {
            return "";
        }
        let trimmed = self.payload.trim();
        match trimmed.find(char::is_whitespace) {
            Some(idx) => trimmed[idx..].trim(),
            None => "",
        }
    }
}

/// Purpose of an outbound message; the transport may style them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentKind {
    Prompt,
    Confirmation,
    Error,
    Notification,
}

/// Reference to a set of keyboard options. Layout is decided by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyboardRef {
    /// One button per choice, plus a cancel button.
    Choices(Vec<String>),
    /// Yes / No buttons for a confirmation step.
    ConfirmCancel,
}

/// Something the core wants delivered: targets, kind, text, optional keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundIntent {
    pub targets: Vec<UserId>,
    pub kind: IntentKind,
    pub content: String,
    pub keyboard: Option<KeyboardRef>,
}

impl OutboundIntent {
    pub fn new(targets: Vec<UserId>, kind: IntentKind, content: impl Into<String>) -> Self {
        Self {
            targets,
            kind,
            content: content.into(),
            keyboard: None,
        }
    }

    pub fn prompt(target: UserId, content: impl Into<String>) -> Self {
        Self::new(vec![target], IntentKind::Prompt, content)
    }

    pub fn confirmation(target: UserId, content: impl Into<String>) -> Self {
        Self::new(vec![target], IntentKind::Confirmation, content)
    }

    pub fn error(target: UserId, content: impl Into<String>) -> Self {
        Self::new(vec![target], IntentKind::Error, content)
    }

    pub fn notification(targets: Vec<UserId>, content: impl Into<String>) -> Self {
        Self::new(targets, IntentKind::Notification, content)
    }

    pub fn with_keyboard(mut self, keyboard: KeyboardRef) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Handler result for the chain. `Reply` carries the intents produced so later handlers can see them in `after()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerResponse {
    /// Pass to next handler.
    Continue,
    /// Stop the chain; nothing to reply.
    Stop,
    /// Skip this handler, try next.
    Ignore,
    /// Stop the chain and attach the produced intents.
    Reply(Vec<OutboundIntent>),
}

/// Converts a transport-specific user type to core [`User`].
pub trait ToCoreUser: Send + Sync {
    fn to_core(&self) -> User;
}

/// Converts a transport-specific update to a core [`InboundEvent`]. `None` when the update carries nothing usable.
pub trait ToCoreEvent: Send + Sync {
    fn to_core(&self) -> Option<InboundEvent>;
}

/// Single handler concept: optional before / handle / after. Chain runs all before → handle until Stop/Reply → all after (reverse).
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs before the handle phase. Return false to stop the chain.
    async fn before(&self, _event: &InboundEvent) -> crate::error::Result<bool> {
        Ok(true)
    }
    /// Processes the event. Return Stop or Reply to end the handle phase. Default: Continue.
    async fn handle(&self, _event: &InboundEvent) -> crate::error::Result<HandlerResponse> {
        Ok(HandlerResponse::Continue)
    }
    /// Runs after the handle phase (reverse order), with the final response.
    async fn after(
        &self,
        _event: &InboundEvent,
        _response: &HandlerResponse,
    ) -> crate::error::Result<()> {
        Ok(())
    }
}
