//! Storage crate: sessions, directory (users, courses, sections), schedule records and reminder jobs.
//!
//! ## Modules
//!
//! - [`error`] – Storage error types
//! - [`models`] – UserRecord, Course, Section, ScheduleRecord, Submission, ReminderJob, Session
//! - [`store`] – SessionStore, DirectoryStore, RecordStore, JobStore and the umbrella Store
//! - [`sqlite_store`] – SqliteStore (sqlx)
//! - [`memory_store`] – InMemoryStore
//! - [`sqlite_pool`] – SqlitePoolManager

mod error;
mod memory_store;
mod models;
mod sqlite_pool;
mod sqlite_store;
mod store;

pub use error::StorageError;
pub use memory_store::InMemoryStore;
pub use models::{
    normalize_code, Course, JobSchedule, NewRecord, RecordKind, RecordStatus, ReminderJob,
    ReminderTarget, ScheduleRecord, Section, Session, Submission, UserRecord, IDLE_STATE,
};
pub use sqlite_pool::SqlitePoolManager;
pub use sqlite_store::SqliteStore;
pub use store::{DirectoryStore, JobStore, RecordStore, SessionStore, StorageResult, Store};
