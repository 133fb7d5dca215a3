//! Storage models.

mod directory;
mod record;
mod session;

pub use directory::{normalize_code, Course, Section, UserRecord};
pub use record::{
    JobSchedule, NewRecord, RecordKind, RecordStatus, ReminderJob, ReminderTarget,
    ScheduleRecord, Submission,
};
pub use session::{Session, IDLE_STATE};
