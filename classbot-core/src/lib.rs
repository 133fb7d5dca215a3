//! # classbot-core
//!
//! Core types and traits for the class administration bot: [`Bot`] delivery, [`Handler`], inbound
//! events, outbound intents, roles, and tracing initialization. Transport-agnostic; used by every
//! other crate in the workspace.

pub mod bot;
pub mod error;
pub mod logger;
pub mod types;

pub use bot::Bot;
pub use error::{ClassbotError, HandlerError, Result};
pub use logger::init_tracing;
pub use types::{
    CourseId, EventKind, Handler, HandlerResponse, InboundEvent, IntentKind, KeyboardRef,
    OutboundIntent, RecordId, Role, SectionId, ToCoreEvent, ToCoreUser, User, UserId,
};
