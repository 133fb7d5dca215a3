//! Syntax-level parsing of step input. Reference lookups happen in the engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use classbot_core::{Role, SectionId};
use storage::RecordKind;

use crate::error::WorkflowError;
use crate::state::Field;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_REPORT_LEN: usize = 4000;
pub const MAX_MESSAGE_LEN: usize = 3500;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"];

/// Non-empty text of at most `max` characters, trimmed.
pub fn parse_text(field: Field, raw: &str, max: usize) -> Result<String, WorkflowError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(WorkflowError::validation(field.label(), "it must not be empty"));
    }
    if text.chars().count() > max {
        return Err(WorkflowError::validation(
            field.label(),
            format!("it must be at most {} characters", max),
        ));
    }
    Ok(text.to_string())
}

pub fn parse_id(field: Field, raw: &str) -> Result<i64, WorkflowError> {
    let raw = raw.trim().trim_start_matches('#');
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| WorkflowError::validation(field.label(), "send a positive number"))
}

/// `YYYY-MM-DD HH:MM` (UTC) or RFC 3339, strictly after `now`.
pub fn parse_due_at(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, WorkflowError> {
    let raw = raw.trim();
    let parsed = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .ok_or_else(|| {
            WorkflowError::validation(Field::DueAt.label(), "use the format YYYY-MM-DD HH:MM")
        })?;
    if parsed <= now {
        return Err(WorkflowError::validation(
            Field::DueAt.label(),
            "the time must be in the future",
        ));
    }
    Ok(parsed)
}

/// 2-16 characters from letters, digits, `-` and `_`; upper-cased.
pub fn parse_course_code(raw: &str) -> Result<String, WorkflowError> {
    let code = raw.trim();
    let len = code.chars().count();
    let valid = (2..=16).contains(&len)
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(WorkflowError::validation(
            Field::CourseCode.label(),
            "use 2-16 letters, digits, - or _",
        ));
    }
    Ok(code.to_ascii_uppercase())
}

pub fn parse_record_kind(raw: &str) -> Result<RecordKind, WorkflowError> {
    raw.parse::<RecordKind>()
        .map_err(|_| WorkflowError::validation(Field::RecordKind.label(), "answer exam or report"))
}

pub fn parse_role(raw: &str) -> Result<Role, WorkflowError> {
    raw.parse::<Role>().map_err(|_| {
        WorkflowError::validation(
            Field::Role.label(),
            "answer superadmin, admin, instructor or student",
        )
    })
}

/// Recipients of an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Students,
    Instructors,
    /// Roster and instructors of one section.
    Section(SectionId),
}

impl Audience {
    /// Keyboard choices; a section is picked by id.
    pub const KEYWORDS: [&'static str; 3] = ["all", "students", "instructors"];
}

/// Stored form: `all`, `students`, `instructors` or `section:<id>`.
impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::All => f.write_str("all"),
            Audience::Students => f.write_str("students"),
            Audience::Instructors => f.write_str("instructors"),
            Audience::Section(id) => write!(f, "section:{}", id),
        }
    }
}

impl FromStr for Audience {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Audience::All),
            "students" => Ok(Audience::Students),
            "instructors" => Ok(Audience::Instructors),
            other => other
                .strip_prefix("section:")
                .and_then(|id| id.parse().ok())
                .map(Audience::Section)
                .ok_or_else(|| format!("unknown audience: {}", other)),
        }
    }
}

/// A keyword (any case) or a section id such as `12` or `#12`.
pub fn parse_audience(raw: &str) -> Result<Audience, WorkflowError> {
    let raw = raw.trim().to_ascii_lowercase();
    match raw.as_str() {
        "all" | "everyone" => Ok(Audience::All),
        "students" => Ok(Audience::Students),
        "instructors" => Ok(Audience::Instructors),
        other => parse_id(Field::Audience, other)
            .map(Audience::Section)
            .map_err(|_| {
                WorkflowError::validation(
                    Field::Audience.label(),
                    "answer all, students, instructors or a section id",
                )
            }),
    }
}

/// Answer at the confirmation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
}

pub fn parse_answer(raw: &str) -> Option<Answer> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "confirm" | "ok" => Some(Answer::Yes),
        "no" | "n" => Some(Answer::No),
        _ => None,
    }
}

/// Display form used in prompts and messages.
pub fn format_when(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}
