//! In-memory store: every map behind one `tokio::sync::RwLock`, so each operation is atomic.
//!
//! Used by the console runner (`STORE_TYPE=memory`) and by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbot_core::{CourseId, RecordId, Role, SectionId, UserId};
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::models::{
    normalize_code, Course, JobSchedule, NewRecord, RecordKind, RecordStatus, ReminderJob,
    ScheduleRecord, Section, Session, Submission, UserRecord,
};
use crate::store::{DirectoryStore, JobStore, RecordStore, SessionStore, StorageResult};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, UserRecord>,
    courses: BTreeMap<CourseId, Course>,
    sections: BTreeMap<SectionId, Section>,
    records: BTreeMap<RecordId, ScheduleRecord>,
    submissions: Vec<Submission>,
    jobs: HashMap<RecordId, ReminderJob>,
    sessions: HashMap<UserId, Session>,
    last_course_id: i64,
    last_section_id: i64,
    last_record_id: i64,
    last_submission_id: i64,
}

impl Inner {
    fn with_sections(&self, user: &UserRecord) -> UserRecord {
        let mut user = user.clone();
        user.sections = self
            .sections
            .values()
            .filter(|s| s.is_enrolled(user.id))
            .map(|s| s.id)
            .collect();
        user
    }

    fn section(&self, id: SectionId) -> StorageResult<&Section> {
        self.sections
            .get(&id)
            .ok_or_else(|| StorageError::NotFound(format!("section {}", id)))
    }

    fn open_record_mut(&mut self, id: RecordId) -> StorageResult<&mut ScheduleRecord> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("record {}", id)))?;
        if !record.is_open() {
            return Err(StorageError::Conflict(format!("record {} is closed", id)));
        }
        Ok(record)
    }
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

fn status_for(fired_leads: u32) -> RecordStatus {
    if fired_leads > 0 {
        RecordStatus::Reminded
    } else {
        RecordStatus::Pending
    }
}

fn sorted_by_schedule(mut records: Vec<ScheduleRecord>) -> Vec<ScheduleRecord> {
    records.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
    records
}

/// Store kept entirely in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    latency: Option<Duration>,
    failing_session_saves: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation sleeps for `latency` first. Used to exercise storage timeouts.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// The next `count` session saves fail with `Unavailable`. Used to exercise lost writes.
    pub fn fail_session_saves(&self, count: usize) {
        self.failing_session_saves.store(count, Ordering::SeqCst);
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load_session(&self, user_id: UserId) -> StorageResult<Option<Session>> {
        self.pause().await;
        Ok(self.inner.read().await.sessions.get(&user_id).cloned())
    }

    async fn save_session(&self, session: &Session) -> StorageResult<()> {
        self.pause().await;
        let failing = self
            .failing_session_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StorageError::Unavailable("session write failed".to_string()));
        }
        self.inner
            .write()
            .await
            .sessions
            .insert(session.user_id, session.clone());
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn register_user(
        &self,
        id: UserId,
        username: Option<&str>,
        full_name: &str,
        default_role: Role,
    ) -> StorageResult<UserRecord> {
        self.pause().await;
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .entry(id)
            .and_modify(|u| {
                u.username = username.map(str::to_string);
                u.full_name = full_name.to_string();
                u.last_seen_at = now;
            })
            .or_insert_with(|| UserRecord {
                id,
                role: default_role,
                username: username.map(str::to_string),
                full_name: full_name.to_string(),
                active: true,
                sections: Default::default(),
                created_at: now,
                last_seen_at: now,
            })
            .clone();
        Ok(inner.with_sections(&user))
    }

    async fn get_user(&self, id: UserId) -> StorageResult<Option<UserRecord>> {
        self.pause().await;
        let inner = self.inner.read().await;
        Ok(inner.users.get(&id).map(|u| inner.with_sections(u)))
    }

    async fn set_role(&self, id: UserId, role: Role) -> StorageResult<UserRecord> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))?;
        user.role = role;
        let user = user.clone();
        Ok(inner.with_sections(&user))
    }

    async fn set_active(&self, id: UserId, active: bool) -> StorageResult<UserRecord> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))?;
        user.active = active;
        let user = user.clone();
        Ok(inner.with_sections(&user))
    }

    async fn list_users(&self, role: Option<Role>) -> StorageResult<Vec<UserRecord>> {
        self.pause().await;
        let inner = self.inner.read().await;
        let mut users: Vec<UserRecord> = inner
            .users
            .values()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .map(|u| inner.with_sections(u))
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn create_course(&self, code: &str, title: &str) -> StorageResult<Course> {
        self.pause().await;
        let code = normalize_code(code);
        let mut inner = self.inner.write().await;
        if inner.courses.values().any(|c| c.code == code) {
            return Err(StorageError::AlreadyExists(format!("course {}", code)));
        }
        let course = Course {
            id: next_id(&mut inner.last_course_id),
            code,
            title: title.to_string(),
            archived: false,
            created_at: Utc::now(),
        };
        inner.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn get_course(&self, id: CourseId) -> StorageResult<Option<Course>> {
        self.pause().await;
        Ok(self.inner.read().await.courses.get(&id).cloned())
    }

    async fn find_course_by_code(&self, code: &str) -> StorageResult<Option<Course>> {
        self.pause().await;
        let code = normalize_code(code);
        Ok(self
            .inner
            .read()
            .await
            .courses
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn list_courses(&self, include_archived: bool) -> StorageResult<Vec<Course>> {
        self.pause().await;
        Ok(self
            .inner
            .read()
            .await
            .courses
            .values()
            .filter(|c| include_archived || !c.archived)
            .cloned()
            .collect())
    }

    async fn archive_course(&self, id: CourseId) -> StorageResult<Course> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let course = inner
            .courses
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("course {}", id)))?;
        if course.archived {
            return Err(StorageError::Conflict(format!(
                "course {} is already archived",
                course.code
            )));
        }
        course.archived = true;
        Ok(course.clone())
    }

    async fn create_section(
        &self,
        course_id: CourseId,
        name: &str,
        instructors: &[UserId],
    ) -> StorageResult<Section> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let course = inner
            .courses
            .get(&course_id)
            .ok_or_else(|| StorageError::NotFound(format!("course {}", course_id)))?;
        if course.archived {
            return Err(StorageError::Conflict(format!(
                "course {} is archived",
                course.code
            )));
        }
        if let Some(missing) = instructors.iter().find(|id| !inner.users.contains_key(id)) {
            return Err(StorageError::NotFound(format!("user {}", missing)));
        }
        let name = name.trim();
        if inner
            .sections
            .values()
            .any(|s| s.course_id == course_id && s.name.eq_ignore_ascii_case(name))
        {
            return Err(StorageError::AlreadyExists(format!("section {}", name)));
        }
        let mut unique = Vec::with_capacity(instructors.len());
        for id in instructors {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }
        let section = Section {
            id: next_id(&mut inner.last_section_id),
            course_id,
            name: name.to_string(),
            instructors: unique,
            roster: Vec::new(),
            created_at: Utc::now(),
        };
        inner.sections.insert(section.id, section.clone());
        Ok(section)
    }

    async fn get_section(&self, id: SectionId) -> StorageResult<Option<Section>> {
        self.pause().await;
        Ok(self.inner.read().await.sections.get(&id).cloned())
    }

    async fn list_sections(&self, course_id: CourseId) -> StorageResult<Vec<Section>> {
        self.pause().await;
        Ok(self
            .inner
            .read()
            .await
            .sections
            .values()
            .filter(|s| s.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn sections_for_user(&self, user_id: UserId) -> StorageResult<Vec<Section>> {
        self.pause().await;
        Ok(self
            .inner
            .read()
            .await
            .sections
            .values()
            .filter(|s| s.is_enrolled(user_id) || s.is_instructor(user_id))
            .cloned()
            .collect())
    }

    async fn enroll(&self, section_id: SectionId, user_id: UserId) -> StorageResult<Section> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(StorageError::NotFound(format!("user {}", user_id)));
        }
        let section = inner
            .sections
            .get_mut(&section_id)
            .ok_or_else(|| StorageError::NotFound(format!("section {}", section_id)))?;
        if section.is_enrolled(user_id) {
            return Err(StorageError::AlreadyExists(format!(
                "user {} in section {}",
                user_id, section.name
            )));
        }
        section.roster.push(user_id);
        Ok(section.clone())
    }

    async fn unenroll(&self, section_id: SectionId, user_id: UserId) -> StorageResult<Section> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let section = inner
            .sections
            .get_mut(&section_id)
            .ok_or_else(|| StorageError::NotFound(format!("section {}", section_id)))?;
        let before = section.roster.len();
        section.roster.retain(|id| *id != user_id);
        if section.roster.len() == before {
            return Err(StorageError::NotFound(format!(
                "user {} in section {}",
                user_id, section.name
            )));
        }
        Ok(section.clone())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn create_record(
        &self,
        new: &NewRecord,
        fired_leads: u32,
        job: Option<JobSchedule>,
    ) -> StorageResult<ScheduleRecord> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        inner.section(new.section_id)?;
        let record = ScheduleRecord {
            id: next_id(&mut inner.last_record_id),
            section_id: new.section_id,
            kind: new.kind,
            title: new.title.clone(),
            scheduled_at: new.scheduled_at,
            status: status_for(fired_leads),
            fired_leads,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        inner.records.insert(record.id, record.clone());
        if let Some(job) = job {
            inner.jobs.insert(record.id, job.into_job(record.id));
        }
        Ok(record)
    }

    async fn get_record(&self, id: RecordId) -> StorageResult<Option<ScheduleRecord>> {
        self.pause().await;
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn list_records(&self, section_id: SectionId) -> StorageResult<Vec<ScheduleRecord>> {
        self.pause().await;
        let inner = self.inner.read().await;
        Ok(sorted_by_schedule(
            inner
                .records
                .values()
                .filter(|r| r.section_id == section_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_open_records(&self) -> StorageResult<Vec<ScheduleRecord>> {
        self.pause().await;
        let inner = self.inner.read().await;
        Ok(sorted_by_schedule(
            inner.records.values().filter(|r| r.is_open()).cloned().collect(),
        ))
    }

    async fn mark_lead_fired(
        &self,
        id: RecordId,
        fired_leads: u32,
    ) -> StorageResult<ScheduleRecord> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let record = inner.open_record_mut(id)?;
        record.fired_leads = record.fired_leads.max(fired_leads);
        record.status = status_for(record.fired_leads);
        Ok(record.clone())
    }

    async fn reschedule_record(
        &self,
        id: RecordId,
        scheduled_at: DateTime<Utc>,
        fired_leads: u32,
        job: Option<JobSchedule>,
    ) -> StorageResult<ScheduleRecord> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let record = inner.open_record_mut(id)?;
        record.scheduled_at = scheduled_at;
        record.fired_leads = fired_leads;
        record.status = status_for(fired_leads);
        let record = record.clone();
        inner.jobs.remove(&id);
        if let Some(job) = job {
            inner.jobs.insert(id, job.into_job(id));
        }
        Ok(record)
    }

    async fn close_record(&self, id: RecordId) -> StorageResult<ScheduleRecord> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let record = inner.open_record_mut(id)?;
        record.status = RecordStatus::Closed;
        let record = record.clone();
        inner.jobs.remove(&id);
        Ok(record)
    }

    async fn create_submission(
        &self,
        record_id: RecordId,
        user_id: UserId,
        body: &str,
    ) -> StorageResult<Submission> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get(&record_id)
            .ok_or_else(|| StorageError::NotFound(format!("record {}", record_id)))?;
        if record.kind != RecordKind::ReportDeadline || !record.is_open() {
            return Err(StorageError::Conflict(format!(
                "record {} does not accept submissions",
                record_id
            )));
        }
        if inner
            .submissions
            .iter()
            .any(|s| s.record_id == record_id && s.user_id == user_id)
        {
            return Err(StorageError::AlreadyExists(format!(
                "submission of user {} for record {}",
                user_id, record_id
            )));
        }
        let submission = Submission {
            id: next_id(&mut inner.last_submission_id),
            record_id,
            user_id,
            body: body.to_string(),
            submitted_at: Utc::now(),
        };
        inner.submissions.push(submission.clone());
        Ok(submission)
    }

    async fn list_submissions(&self, record_id: RecordId) -> StorageResult<Vec<Submission>> {
        self.pause().await;
        Ok(self
            .inner
            .read()
            .await
            .submissions
            .iter()
            .filter(|s| s.record_id == record_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn upsert_job(&self, job: &ReminderJob) -> StorageResult<()> {
        self.pause().await;
        self.inner
            .write()
            .await
            .jobs
            .insert(job.record_id, job.clone());
        Ok(())
    }

    async fn get_job(&self, record_id: RecordId) -> StorageResult<Option<ReminderJob>> {
        self.pause().await;
        Ok(self.inner.read().await.jobs.get(&record_id).cloned())
    }

    async fn remove_job(&self, record_id: RecordId) -> StorageResult<bool> {
        self.pause().await;
        Ok(self.inner.write().await.jobs.remove(&record_id).is_some())
    }

    async fn peek_earliest_job(&self) -> StorageResult<Option<ReminderJob>> {
        self.pause().await;
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .values()
            .min_by(|a, b| {
                a.next_fire_at
                    .cmp(&b.next_fire_at)
                    .then(a.record_id.cmp(&b.record_id))
            })
            .cloned())
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> StorageResult<Vec<ReminderJob>> {
        self.pause().await;
        let mut due: Vec<ReminderJob> = self
            .inner
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.next_fire_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_fire_at
                .cmp(&b.next_fire_at)
                .then(a.record_id.cmp(&b.record_id))
        });
        Ok(due)
    }
}
