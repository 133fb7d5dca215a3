//! Schedule records (exams, report deadlines), submissions and reminder jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use classbot_core::{RecordId, SectionId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Exam,
    ReportDeadline,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Exam => "exam",
            RecordKind::ReportDeadline => "report",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Exam => f.write_str("exam"),
            RecordKind::ReportDeadline => f.write_str("report deadline"),
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exam" => Ok(RecordKind::Exam),
            "report" | "report_deadline" | "deadline" => Ok(RecordKind::ReportDeadline),
            other => Err(format!("unknown record kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    Pending,
    Reminded,
    Closed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Reminded => "reminded",
            RecordStatus::Closed => "closed",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "reminded" => Ok(RecordStatus::Reminded),
            "closed" => Ok(RecordStatus::Closed),
            other => Err(format!("unknown record status: {}", other)),
        }
    }
}

/// An exam or report deadline owned by a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: RecordId,
    pub section_id: SectionId,
    pub kind: RecordKind,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: RecordStatus,
    /// Number of configured lead times (longest first) already fired.
    pub fired_leads: u32,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl ScheduleRecord {
    pub fn is_open(&self) -> bool {
        self.status != RecordStatus::Closed
    }
}

/// Input for creating a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub section_id: SectionId,
    pub kind: RecordKind,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub created_by: UserId,
}

/// A student's report for a report-deadline record. One per (record, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Submission {
    pub id: i64,
    pub record_id: RecordId,
    pub user_id: UserId,
    pub body: String,
    pub submitted_at: DateTime<Utc>,
}

/// Who receives a record's reminders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReminderTarget {
    /// The section's roster at fire time.
    Section(SectionId),
    /// Exactly these users.
    Users(Vec<UserId>),
}

/// Next fire instant for a record; at most one per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderJob {
    pub record_id: RecordId,
    pub next_fire_at: DateTime<Utc>,
    pub target: ReminderTarget,
}

/// Job fields written together with a record mutation (the record id is filled in by the store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSchedule {
    pub next_fire_at: DateTime<Utc>,
    pub target: ReminderTarget,
}

impl JobSchedule {
    pub fn into_job(self, record_id: RecordId) -> ReminderJob {
        ReminderJob {
            record_id,
            next_fire_at: self.next_fire_at,
            target: self.target,
        }
    }
}
