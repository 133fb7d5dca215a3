//! Users, courses and sections.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use classbot_core::{CourseId, Role, SectionId, UserId};
use serde::{Deserialize, Serialize};

/// A registered user. Never deleted; `active = false` marks deactivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub role: Role,
    pub username: Option<String>,
    pub full_name: String,
    pub active: bool,
    /// Sections whose roster holds this user. Derived from rosters on load.
    pub sections: BTreeSet<SectionId>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Course {
    pub id: CourseId,
    /// Upper-cased, unique.
    pub code: String,
    pub title: String,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// A section of a course: instructors plus an ordered roster of students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub course_id: CourseId,
    pub name: String,
    pub instructors: Vec<UserId>,
    /// Enrollment order; a user appears at most once.
    pub roster: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Section {
    pub fn is_instructor(&self, user_id: UserId) -> bool {
        self.instructors.contains(&user_id)
    }

    pub fn is_enrolled(&self, user_id: UserId) -> bool {
        self.roster.contains(&user_id)
    }
}

/// Normalizes a course code for storage and lookup.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
