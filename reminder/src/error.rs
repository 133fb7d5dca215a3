use chrono::{DateTime, Utc};
use storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Scheduled time {0} is not in the future")]
    InPast(DateTime<Utc>),
}
