//! Workflow error taxonomy. Every variant maps to a well-defined state and user-facing text.

use permission_gate::Action;
use reminder::SchedulerError;
use storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Malformed or unknown input for the current step. Re-prompt, same state.
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
    /// Authorization failed. Reset to idle.
    #[error("permission denied: {0}")]
    PermissionDenied(Action),
    /// The mutation was rejected (duplicate, missing reference, closed record). Reset to idle.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Storage timed out or is unavailable. Session preserved.
    #[error("transient storage failure: {0}")]
    TransientStorage(String),
}

impl WorkflowError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        WorkflowError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Text shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::Validation { field, reason } => format!("Invalid {}: {}.", field, reason),
            WorkflowError::PermissionDenied(action) => format!(
                "You are not allowed to {}.",
                action.as_str().replace('_', " ")
            ),
            WorkflowError::Conflict(reason) => format!("Could not complete the request: {}.", reason),
            WorkflowError::TransientStorage(_) => {
                "The service is temporarily unavailable. Please try again in a moment.".to_string()
            }
        }
    }
}

impl From<StorageError> for WorkflowError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => WorkflowError::Conflict(format!("{} not found", what)),
            StorageError::AlreadyExists(what) => {
                WorkflowError::Conflict(format!("{} already exists", what))
            }
            StorageError::Conflict(reason) => WorkflowError::Conflict(reason),
            StorageError::Corrupt(what) => {
                WorkflowError::Conflict(format!("stored data is unreadable ({})", what))
            }
            other if other.is_transient() => WorkflowError::TransientStorage(other.to_string()),
            other => WorkflowError::Conflict(other.to_string()),
        }
    }
}

impl From<SchedulerError> for WorkflowError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Storage(e) => e.into(),
            SchedulerError::InPast(_) => {
                WorkflowError::validation("date", "the time must be in the future")
            }
        }
    }
}
