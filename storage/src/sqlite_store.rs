//! SQLite store: every trait in [`crate::store`] backed by sqlx.
//!
//! Tables are created on startup. Mutations spanning several rows (record + job, section +
//! instructors) run inside one transaction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbot_core::{CourseId, RecordId, Role, SectionId, UserId};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::models::{
    normalize_code, Course, JobSchedule, NewRecord, RecordKind, RecordStatus, ReminderJob,
    ReminderTarget, ScheduleRecord, Section, Session, Submission, UserRecord,
};
use crate::sqlite_pool::SqlitePoolManager;
use crate::store::{DirectoryStore, JobStore, RecordStore, SessionStore, StorageResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        role TEXT NOT NULL,
        username TEXT,
        full_name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS courses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        archived INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        course_id INTEGER NOT NULL REFERENCES courses(id),
        name TEXT NOT NULL COLLATE NOCASE,
        created_at TEXT NOT NULL,
        UNIQUE (course_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS section_instructors (
        section_id INTEGER NOT NULL REFERENCES sections(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        PRIMARY KEY (section_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS enrollments (
        section_id INTEGER NOT NULL REFERENCES sections(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        enrolled_at TEXT NOT NULL,
        PRIMARY KEY (section_id, user_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_enrollments_user_id ON enrollments(user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        section_id INTEGER NOT NULL REFERENCES sections(id),
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        scheduled_at TEXT NOT NULL,
        status TEXT NOT NULL,
        fired_leads INTEGER NOT NULL DEFAULT 0,
        created_by INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_records_section_id ON records(section_id)",
    r#"
    CREATE TABLE IF NOT EXISTS submissions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        record_id INTEGER NOT NULL REFERENCES records(id),
        user_id INTEGER NOT NULL,
        body TEXT NOT NULL,
        submitted_at TEXT NOT NULL,
        UNIQUE (record_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reminder_jobs (
        record_id INTEGER PRIMARY KEY,
        next_fire_at TEXT NOT NULL,
        target TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reminder_jobs_next_fire_at ON reminder_jobs(next_fire_at)",
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        user_id INTEGER PRIMARY KEY,
        state TEXT NOT NULL,
        data TEXT NOT NULL,
        last_activity TEXT NOT NULL
    )
    "#,
];

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    role: String,
    username: Option<String>,
    full_name: String,
    active: bool,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SectionRow {
    id: i64,
    course_id: i64,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    section_id: i64,
    kind: String,
    title: String,
    scheduled_at: DateTime<Utc>,
    status: String,
    fired_leads: i64,
    created_by: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for ScheduleRecord {
    type Error = StorageError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(ScheduleRecord {
            id: row.id,
            section_id: row.section_id,
            kind: row.kind.parse().map_err(StorageError::Corrupt)?,
            title: row.title,
            scheduled_at: row.scheduled_at,
            status: row.status.parse().map_err(StorageError::Corrupt)?,
            fired_leads: row.fired_leads.max(0) as u32,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    record_id: i64,
    next_fire_at: DateTime<Utc>,
    target: String,
}

impl TryFrom<JobRow> for ReminderJob {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(ReminderJob {
            record_id: row.record_id,
            next_fire_at: row.next_fire_at,
            target: serde_json::from_str::<ReminderTarget>(&row.target)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    user_id: i64,
    state: String,
    data: String,
    last_activity: DateTime<Utc>,
}

fn status_for(fired_leads: u32) -> RecordStatus {
    if fired_leads > 0 {
        RecordStatus::Reminded
    } else {
        RecordStatus::Pending
    }
}

async fn fetch_user(conn: &mut SqliteConnection, id: UserId) -> StorageResult<Option<UserRecord>> {
    let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let sections: Vec<(i64,)> =
        sqlx::query_as("SELECT section_id FROM enrollments WHERE user_id = ? ORDER BY section_id")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(Some(UserRecord {
        id: row.id,
        role: row.role.parse::<Role>().map_err(StorageError::Corrupt)?,
        username: row.username,
        full_name: row.full_name,
        active: row.active,
        sections: sections.into_iter().map(|(s,)| s).collect(),
        created_at: row.created_at,
        last_seen_at: row.last_seen_at,
    }))
}

async fn fetch_course(conn: &mut SqliteConnection, id: CourseId) -> StorageResult<Option<Course>> {
    Ok(sqlx::query_as("SELECT * FROM courses WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?)
}

async fn assemble_section(conn: &mut SqliteConnection, row: SectionRow) -> StorageResult<Section> {
    let instructors: Vec<(i64,)> = sqlx::query_as(
        "SELECT user_id FROM section_instructors WHERE section_id = ? ORDER BY rowid",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;
    let roster: Vec<(i64,)> =
        sqlx::query_as("SELECT user_id FROM enrollments WHERE section_id = ? ORDER BY rowid")
            .bind(row.id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(Section {
        id: row.id,
        course_id: row.course_id,
        name: row.name,
        instructors: instructors.into_iter().map(|(u,)| u).collect(),
        roster: roster.into_iter().map(|(u,)| u).collect(),
        created_at: row.created_at,
    })
}

async fn fetch_section(conn: &mut SqliteConnection, id: SectionId) -> StorageResult<Option<Section>> {
    let row: Option<SectionRow> = sqlx::query_as("SELECT * FROM sections WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(Some(assemble_section(conn, row).await?)),
        None => Ok(None),
    }
}

async fn fetch_sections(
    conn: &mut SqliteConnection,
    rows: Vec<SectionRow>,
) -> StorageResult<Vec<Section>> {
    let mut sections = Vec::with_capacity(rows.len());
    for row in rows {
        sections.push(assemble_section(conn, row).await?);
    }
    Ok(sections)
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    id: RecordId,
) -> StorageResult<Option<ScheduleRecord>> {
    let row: Option<RecordRow> = sqlx::query_as("SELECT * FROM records WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(ScheduleRecord::try_from).transpose()
}

/// Fetches a record that must exist and be open.
async fn fetch_open_record(
    conn: &mut SqliteConnection,
    id: RecordId,
) -> StorageResult<ScheduleRecord> {
    let record = fetch_record(conn, id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("record {}", id)))?;
    if !record.is_open() {
        return Err(StorageError::Conflict(format!("record {} is closed", id)));
    }
    Ok(record)
}

async fn write_job(conn: &mut SqliteConnection, job: &ReminderJob) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO reminder_jobs (record_id, next_fire_at, target)
        VALUES (?, ?, ?)
        ON CONFLICT(record_id) DO UPDATE SET
            next_fire_at = excluded.next_fire_at,
            target = excluded.target
        "#,
    )
    .bind(job.record_id)
    .bind(job.next_fire_at)
    .bind(serde_json::to_string(&job.target)?)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Store backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool_manager: SqlitePoolManager,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool_manager = SqlitePoolManager::new(database_url).await?;
        let store = Self { pool_manager };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StorageError> {
        info!("Creating database tables if not exist");
        let pool = self.pool_manager.pool();
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
        info!("Database tables created successfully");
        Ok(())
    }

    async fn conn(&self) -> StorageResult<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        Ok(self.pool_manager.pool().acquire().await?)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load_session(&self, user_id: UserId) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool_manager.pool())
            .await?;
        match row {
            Some(row) => Ok(Some(Session {
                user_id: row.user_id,
                state: row.state,
                data: serde_json::from_str::<BTreeMap<String, String>>(&row.data)?,
                last_activity: row.last_activity,
            })),
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &Session) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (user_id, state, data, last_activity)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                state = excluded.state,
                data = excluded.data,
                last_activity = excluded.last_activity
            "#,
        )
        .bind(session.user_id)
        .bind(&session.state)
        .bind(serde_json::to_string(&session.data)?)
        .bind(session.last_activity)
        .execute(self.pool_manager.pool())
        .await?;
        debug!(user_id = session.user_id, state = %session.state, "Saved session");
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for SqliteStore {
    async fn register_user(
        &self,
        id: UserId,
        username: Option<&str>,
        full_name: &str,
        default_role: Role,
    ) -> StorageResult<UserRecord> {
        let now = Utc::now();
        let mut conn = self.conn().await?;
        sqlx::query(
            r#"
            INSERT INTO users (id, role, username, full_name, active, created_at, last_seen_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                full_name = excluded.full_name,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(id)
        .bind(default_role.as_str())
        .bind(username)
        .bind(full_name)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        fetch_user(&mut conn, id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))
    }

    async fn get_user(&self, id: UserId) -> StorageResult<Option<UserRecord>> {
        let mut conn = self.conn().await?;
        fetch_user(&mut conn, id).await
    }

    async fn set_role(&self, id: UserId, role: Role) -> StorageResult<UserRecord> {
        let mut conn = self.conn().await?;
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("user {}", id)));
        }
        info!(user_id = id, role = %role, "Role updated");
        fetch_user(&mut conn, id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))
    }

    async fn set_active(&self, id: UserId, active: bool) -> StorageResult<UserRecord> {
        let mut conn = self.conn().await?;
        let result = sqlx::query("UPDATE users SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("user {}", id)));
        }
        fetch_user(&mut conn, id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))
    }

    async fn list_users(&self, role: Option<Role>) -> StorageResult<Vec<UserRecord>> {
        let mut conn = self.conn().await?;
        let role = role.map(|r| r.as_str());
        let ids: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM users WHERE ?1 IS NULL OR role = ?1 ORDER BY id")
                .bind(role)
                .fetch_all(&mut *conn)
                .await?;
        let mut users = Vec::with_capacity(ids.len());
        for (id,) in ids {
            if let Some(user) = fetch_user(&mut conn, id).await? {
                users.push(user);
            }
        }
        Ok(users)
    }

    async fn create_course(&self, code: &str, title: &str) -> StorageResult<Course> {
        let code = normalize_code(code);
        let mut tx = self.pool_manager.pool().begin().await?;
        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM courses WHERE code = ?")
            .bind(&code)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(StorageError::AlreadyExists(format!("course {}", code)));
        }
        let result = sqlx::query(
            "INSERT INTO courses (code, title, archived, created_at) VALUES (?, ?, 0, ?)",
        )
        .bind(&code)
        .bind(title)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        let course = fetch_course(&mut tx, result.last_insert_rowid())
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("course {}", code)))?;
        tx.commit().await?;
        info!(course_id = course.id, code = %course.code, "Course created");
        Ok(course)
    }

    async fn get_course(&self, id: CourseId) -> StorageResult<Option<Course>> {
        let mut conn = self.conn().await?;
        fetch_course(&mut conn, id).await
    }

    async fn find_course_by_code(&self, code: &str) -> StorageResult<Option<Course>> {
        Ok(sqlx::query_as("SELECT * FROM courses WHERE code = ?")
            .bind(normalize_code(code))
            .fetch_optional(self.pool_manager.pool())
            .await?)
    }

    async fn list_courses(&self, include_archived: bool) -> StorageResult<Vec<Course>> {
        Ok(
            sqlx::query_as("SELECT * FROM courses WHERE archived = 0 OR ? ORDER BY id")
                .bind(include_archived)
                .fetch_all(self.pool_manager.pool())
                .await?,
        )
    }

    async fn archive_course(&self, id: CourseId) -> StorageResult<Course> {
        let mut tx = self.pool_manager.pool().begin().await?;
        let mut course = fetch_course(&mut tx, id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("course {}", id)))?;
        if course.archived {
            return Err(StorageError::Conflict(format!(
                "course {} is already archived",
                course.code
            )));
        }
        sqlx::query("UPDATE courses SET archived = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        course.archived = true;
        Ok(course)
    }

    async fn create_section(
        &self,
        course_id: CourseId,
        name: &str,
        instructors: &[UserId],
    ) -> StorageResult<Section> {
        let name = name.trim();
        let mut tx = self.pool_manager.pool().begin().await?;
        let course = fetch_course(&mut tx, course_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("course {}", course_id)))?;
        if course.archived {
            return Err(StorageError::Conflict(format!(
                "course {} is archived",
                course.code
            )));
        }
        for instructor in instructors {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
                .bind(*instructor)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(StorageError::NotFound(format!("user {}", instructor)));
            }
        }
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM sections WHERE course_id = ? AND name = ?")
                .bind(course_id)
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(StorageError::AlreadyExists(format!("section {}", name)));
        }
        let result =
            sqlx::query("INSERT INTO sections (course_id, name, created_at) VALUES (?, ?, ?)")
                .bind(course_id)
                .bind(name)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        let section_id = result.last_insert_rowid();
        for instructor in instructors {
            sqlx::query("INSERT OR IGNORE INTO section_instructors (section_id, user_id) VALUES (?, ?)")
                .bind(section_id)
                .bind(*instructor)
                .execute(&mut *tx)
                .await?;
        }
        let section = fetch_section(&mut tx, section_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("section {}", section_id)))?;
        tx.commit().await?;
        info!(section_id, course_id, "Section created");
        Ok(section)
    }

    async fn get_section(&self, id: SectionId) -> StorageResult<Option<Section>> {
        let mut conn = self.conn().await?;
        fetch_section(&mut conn, id).await
    }

    async fn list_sections(&self, course_id: CourseId) -> StorageResult<Vec<Section>> {
        let mut conn = self.conn().await?;
        let rows: Vec<SectionRow> =
            sqlx::query_as("SELECT * FROM sections WHERE course_id = ? ORDER BY id")
                .bind(course_id)
                .fetch_all(&mut *conn)
                .await?;
        fetch_sections(&mut conn, rows).await
    }

    async fn sections_for_user(&self, user_id: UserId) -> StorageResult<Vec<Section>> {
        let mut conn = self.conn().await?;
        let rows: Vec<SectionRow> = sqlx::query_as(
            r#"
            SELECT * FROM sections
            WHERE id IN (SELECT section_id FROM enrollments WHERE user_id = ?)
               OR id IN (SELECT section_id FROM section_instructors WHERE user_id = ?)
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
        fetch_sections(&mut conn, rows).await
    }

    async fn enroll(&self, section_id: SectionId, user_id: UserId) -> StorageResult<Section> {
        let mut tx = self.pool_manager.pool().begin().await?;
        if fetch_user(&mut tx, user_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("user {}", user_id)));
        }
        let section = fetch_section(&mut tx, section_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("section {}", section_id)))?;
        if section.is_enrolled(user_id) {
            return Err(StorageError::AlreadyExists(format!(
                "user {} in section {}",
                user_id, section.name
            )));
        }
        sqlx::query("INSERT INTO enrollments (section_id, user_id, enrolled_at) VALUES (?, ?, ?)")
            .bind(section_id)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        let section = fetch_section(&mut tx, section_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("section {}", section_id)))?;
        tx.commit().await?;
        Ok(section)
    }

    async fn unenroll(&self, section_id: SectionId, user_id: UserId) -> StorageResult<Section> {
        let mut tx = self.pool_manager.pool().begin().await?;
        let section = fetch_section(&mut tx, section_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("section {}", section_id)))?;
        let result = sqlx::query("DELETE FROM enrollments WHERE section_id = ? AND user_id = ?")
            .bind(section_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "user {} in section {}",
                user_id, section.name
            )));
        }
        let section = fetch_section(&mut tx, section_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("section {}", section_id)))?;
        tx.commit().await?;
        Ok(section)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_record(
        &self,
        new: &NewRecord,
        fired_leads: u32,
        job: Option<JobSchedule>,
    ) -> StorageResult<ScheduleRecord> {
        let mut tx = self.pool_manager.pool().begin().await?;
        if fetch_section(&mut tx, new.section_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("section {}", new.section_id)));
        }
        let result = sqlx::query(
            r#"
            INSERT INTO records (section_id, kind, title, scheduled_at, status, fired_leads, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.section_id)
        .bind(new.kind.as_str())
        .bind(&new.title)
        .bind(new.scheduled_at)
        .bind(status_for(fired_leads).as_str())
        .bind(fired_leads as i64)
        .bind(new.created_by)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        let record_id = result.last_insert_rowid();
        if let Some(job) = job {
            write_job(&mut tx, &job.into_job(record_id)).await?;
        }
        let record = fetch_record(&mut tx, record_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("record {}", record_id)))?;
        tx.commit().await?;
        info!(record_id, section_id = new.section_id, "Record created");
        Ok(record)
    }

    async fn get_record(&self, id: RecordId) -> StorageResult<Option<ScheduleRecord>> {
        let mut conn = self.conn().await?;
        fetch_record(&mut conn, id).await
    }

    async fn list_records(&self, section_id: SectionId) -> StorageResult<Vec<ScheduleRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT * FROM records WHERE section_id = ? ORDER BY scheduled_at, id",
        )
        .bind(section_id)
        .fetch_all(self.pool_manager.pool())
        .await?;
        rows.into_iter().map(ScheduleRecord::try_from).collect()
    }

    async fn list_open_records(&self) -> StorageResult<Vec<ScheduleRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT * FROM records WHERE status != ? ORDER BY scheduled_at, id",
        )
        .bind(RecordStatus::Closed.as_str())
        .fetch_all(self.pool_manager.pool())
        .await?;
        rows.into_iter().map(ScheduleRecord::try_from).collect()
    }

    async fn mark_lead_fired(
        &self,
        id: RecordId,
        fired_leads: u32,
    ) -> StorageResult<ScheduleRecord> {
        let mut tx = self.pool_manager.pool().begin().await?;
        let mut record = fetch_open_record(&mut tx, id).await?;
        record.fired_leads = record.fired_leads.max(fired_leads);
        record.status = status_for(record.fired_leads);
        sqlx::query("UPDATE records SET fired_leads = ?, status = ? WHERE id = ?")
            .bind(record.fired_leads as i64)
            .bind(record.status.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn reschedule_record(
        &self,
        id: RecordId,
        scheduled_at: DateTime<Utc>,
        fired_leads: u32,
        job: Option<JobSchedule>,
    ) -> StorageResult<ScheduleRecord> {
        let mut tx = self.pool_manager.pool().begin().await?;
        let mut record = fetch_open_record(&mut tx, id).await?;
        record.scheduled_at = scheduled_at;
        record.fired_leads = fired_leads;
        record.status = status_for(fired_leads);
        sqlx::query("UPDATE records SET scheduled_at = ?, fired_leads = ?, status = ? WHERE id = ?")
            .bind(scheduled_at)
            .bind(fired_leads as i64)
            .bind(record.status.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM reminder_jobs WHERE record_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if let Some(job) = job {
            write_job(&mut tx, &job.into_job(id)).await?;
        }
        tx.commit().await?;
        info!(record_id = id, %scheduled_at, "Record rescheduled");
        Ok(record)
    }

    async fn close_record(&self, id: RecordId) -> StorageResult<ScheduleRecord> {
        let mut tx = self.pool_manager.pool().begin().await?;
        let mut record = fetch_open_record(&mut tx, id).await?;
        record.status = RecordStatus::Closed;
        sqlx::query("UPDATE records SET status = ? WHERE id = ?")
            .bind(record.status.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM reminder_jobs WHERE record_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(record_id = id, "Record closed");
        Ok(record)
    }

    async fn create_submission(
        &self,
        record_id: RecordId,
        user_id: UserId,
        body: &str,
    ) -> StorageResult<Submission> {
        let mut tx = self.pool_manager.pool().begin().await?;
        let record = fetch_record(&mut tx, record_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("record {}", record_id)))?;
        if record.kind != RecordKind::ReportDeadline || !record.is_open() {
            return Err(StorageError::Conflict(format!(
                "record {} does not accept submissions",
                record_id
            )));
        }
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM submissions WHERE record_id = ? AND user_id = ?")
                .bind(record_id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(StorageError::AlreadyExists(format!(
                "submission of user {} for record {}",
                user_id, record_id
            )));
        }
        let submitted_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO submissions (record_id, user_id, body, submitted_at) VALUES (?, ?, ?, ?)",
        )
        .bind(record_id)
        .bind(user_id)
        .bind(body)
        .bind(submitted_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Submission {
            id: result.last_insert_rowid(),
            record_id,
            user_id,
            body: body.to_string(),
            submitted_at,
        })
    }

    async fn list_submissions(&self, record_id: RecordId) -> StorageResult<Vec<Submission>> {
        Ok(
            sqlx::query_as("SELECT * FROM submissions WHERE record_id = ? ORDER BY id")
                .bind(record_id)
                .fetch_all(self.pool_manager.pool())
                .await?,
        )
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn upsert_job(&self, job: &ReminderJob) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        write_job(&mut conn, job).await
    }

    async fn get_job(&self, record_id: RecordId) -> StorageResult<Option<ReminderJob>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM reminder_jobs WHERE record_id = ?")
            .bind(record_id)
            .fetch_optional(self.pool_manager.pool())
            .await?;
        row.map(ReminderJob::try_from).transpose()
    }

    async fn remove_job(&self, record_id: RecordId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM reminder_jobs WHERE record_id = ?")
            .bind(record_id)
            .execute(self.pool_manager.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn peek_earliest_job(&self) -> StorageResult<Option<ReminderJob>> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT * FROM reminder_jobs ORDER BY next_fire_at, record_id LIMIT 1",
        )
        .fetch_optional(self.pool_manager.pool())
        .await?;
        row.map(ReminderJob::try_from).transpose()
    }

    async fn due_jobs(&self, now: DateTime<Utc>) -> StorageResult<Vec<ReminderJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM reminder_jobs WHERE next_fire_at <= ? ORDER BY next_fire_at, record_id",
        )
        .bind(now)
        .fetch_all(self.pool_manager.pool())
        .await?;
        rows.into_iter().map(ReminderJob::try_from).collect()
    }
}
