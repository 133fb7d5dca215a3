//! Store traits. The conversation engine and the reminder scheduler only touch storage through these.
//!
//! Every method is atomic per call: a concurrent reader never observes a partial write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbot_core::{CourseId, RecordId, Role, SectionId, UserId};

use crate::error::StorageError;
use crate::models::{
    Course, JobSchedule, NewRecord, ReminderJob, ScheduleRecord, Section, Session, Submission,
    UserRecord,
};

pub type StorageResult<T> = Result<T, StorageError>;

/// Per-user conversation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, user_id: UserId) -> StorageResult<Option<Session>>;
    /// Replaces the stored session for `session.user_id`.
    async fn save_session(&self, session: &Session) -> StorageResult<()>;
}

/// Users, courses, sections and rosters.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Inserts the user with `default_role` on first contact; otherwise refreshes names and
    /// `last_seen_at`. Never changes an existing role.
    async fn register_user(
        &self,
        id: UserId,
        username: Option<&str>,
        full_name: &str,
        default_role: Role,
    ) -> StorageResult<UserRecord>;
    async fn get_user(&self, id: UserId) -> StorageResult<Option<UserRecord>>;
    async fn set_role(&self, id: UserId, role: Role) -> StorageResult<UserRecord>;
    async fn set_active(&self, id: UserId, active: bool) -> StorageResult<UserRecord>;
    /// Registered users ordered by id, optionally only those holding `role`. Includes
    /// deactivated users.
    async fn list_users(&self, role: Option<Role>) -> StorageResult<Vec<UserRecord>>;

    /// `AlreadyExists` when the code (case-insensitive) is taken.
    async fn create_course(&self, code: &str, title: &str) -> StorageResult<Course>;
    async fn get_course(&self, id: CourseId) -> StorageResult<Option<Course>>;
    async fn find_course_by_code(&self, code: &str) -> StorageResult<Option<Course>>;
    async fn list_courses(&self, include_archived: bool) -> StorageResult<Vec<Course>>;
    /// `Conflict` when already archived.
    async fn archive_course(&self, id: CourseId) -> StorageResult<Course>;

    /// `NotFound` for a missing course or instructor, `Conflict` for an archived course,
    /// `AlreadyExists` for a duplicate name within the course.
    async fn create_section(
        &self,
        course_id: CourseId,
        name: &str,
        instructors: &[UserId],
    ) -> StorageResult<Section>;
    async fn get_section(&self, id: SectionId) -> StorageResult<Option<Section>>;
    async fn list_sections(&self, course_id: CourseId) -> StorageResult<Vec<Section>>;
    /// Sections the user is enrolled in or instructs, ordered by id.
    async fn sections_for_user(&self, user_id: UserId) -> StorageResult<Vec<Section>>;
    /// Appends the user to the roster. `AlreadyExists` when already enrolled.
    async fn enroll(&self, section_id: SectionId, user_id: UserId) -> StorageResult<Section>;
    /// `NotFound` when the user is not on the roster.
    async fn unenroll(&self, section_id: SectionId, user_id: UserId) -> StorageResult<Section>;
}

/// Schedule records and submissions. Mutations that touch a record and its job are transactional.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts the record with the given lead marker, plus its job when `job` is set.
    async fn create_record(
        &self,
        new: &NewRecord,
        fired_leads: u32,
        job: Option<JobSchedule>,
    ) -> StorageResult<ScheduleRecord>;
    async fn get_record(&self, id: RecordId) -> StorageResult<Option<ScheduleRecord>>;
    /// Records of a section ordered by scheduled time.
    async fn list_records(&self, section_id: SectionId) -> StorageResult<Vec<ScheduleRecord>>;
    /// All records not closed, ordered by scheduled time.
    async fn list_open_records(&self) -> StorageResult<Vec<ScheduleRecord>>;
    /// Raises the lead marker to `fired_leads` (never lowers it) and marks the record reminded.
    async fn mark_lead_fired(&self, id: RecordId, fired_leads: u32)
        -> StorageResult<ScheduleRecord>;
    /// Moves the record, resets its marker and replaces its job in one transaction.
    /// `Conflict` for a closed record.
    async fn reschedule_record(
        &self,
        id: RecordId,
        scheduled_at: DateTime<Utc>,
        fired_leads: u32,
        job: Option<JobSchedule>,
    ) -> StorageResult<ScheduleRecord>;
    /// Sets status closed and removes the job in one transaction. `Conflict` when already closed.
    async fn close_record(&self, id: RecordId) -> StorageResult<ScheduleRecord>;
    /// `Conflict` unless the record is an open report deadline; `AlreadyExists` on a second submission.
    async fn create_submission(
        &self,
        record_id: RecordId,
        user_id: UserId,
        body: &str,
    ) -> StorageResult<Submission>;
    async fn list_submissions(&self, record_id: RecordId) -> StorageResult<Vec<Submission>>;
}

/// Reminder jobs keyed by record id, ordered by next fire instant.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_job(&self, job: &ReminderJob) -> StorageResult<()>;
    async fn get_job(&self, record_id: RecordId) -> StorageResult<Option<ReminderJob>>;
    /// Returns true when a job was removed.
    async fn remove_job(&self, record_id: RecordId) -> StorageResult<bool>;
    async fn peek_earliest_job(&self) -> StorageResult<Option<ReminderJob>>;
    /// Jobs with `next_fire_at <= now`, earliest first. Does not remove them.
    async fn due_jobs(&self, now: DateTime<Utc>) -> StorageResult<Vec<ReminderJob>>;
}

/// Everything the core needs from storage.
pub trait Store: SessionStore + DirectoryStore + RecordStore + JobStore {}

impl<T> Store for T where T: SessionStore + DirectoryStore + RecordStore + JobStore {}
