//! # conversation
//!
//! The conversation engine: per-user multi-step workflows (enrollment, report submission,
//! scheduling, course and user administration) driven by inbound events and persisted as
//! sessions so they resume after a restart.
//!
//! ## Modules
//!
//! - [`engine`] – [`ConversationEngine`]: transitions, read-only commands, per-user serialization
//! - [`state`] – [`Workflow`], [`Field`] and the [`ConvState`] tag
//! - [`field`] – syntax-level parsing of step input
//! - [`error`] – [`WorkflowError`]
//! - [`queue`] – [`ConversationHandler`], the engine as a chain handler

mod commit;
pub mod engine;
pub mod error;
pub mod field;
pub mod queue;
mod resolve;
pub mod state;

pub use engine::{ConversationEngine, EngineConfig, StepData};
pub use error::WorkflowError;
pub use queue::ConversationHandler;
pub use state::{ConvState, Field, Workflow};
