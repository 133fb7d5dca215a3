//! Reference lookups for step input and the keyboard choices offered with each prompt.

use chrono::{DateTime, Utc};
use classbot_core::{Role, UserId};
use permission_gate::Action;
use storage::{Course, RecordKind, ScheduleRecord, Section, UserRecord};
use tracing::debug;

use crate::engine::{preview, ConversationEngine, StepData};
use crate::error::WorkflowError;
use crate::field::{
    format_when, parse_audience, parse_course_code, parse_due_at, parse_id, parse_record_kind,
    parse_role, parse_text, Audience, MAX_MESSAGE_LEN, MAX_NAME_LEN, MAX_REPORT_LEN,
    MAX_TITLE_LEN,
};
use crate::state::{Field, Workflow};

const MAX_CHOICES: usize = 12;

/// Accepted field input: the value kept in session data and how it is shown back.
pub(crate) struct Resolved {
    pub value: String,
    pub label: String,
}

impl Resolved {
    fn new(value: impl ToString, label: impl Into<String>) -> Self {
        Self {
            value: value.to_string(),
            label: label.into(),
        }
    }
}

/// Id stored for `field` by an earlier step.
pub(crate) fn data_id(data: &StepData, field: Field) -> Result<i64, WorkflowError> {
    data.get(field.key())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| {
            WorkflowError::Conflict(format!("the {} from an earlier step is missing", field.label()))
        })
}

pub(crate) fn data_text<'a>(data: &'a StepData, field: Field) -> Result<&'a str, WorkflowError> {
    data.get(field.key()).map(String::as_str).ok_or_else(|| {
        WorkflowError::Conflict(format!("the {} from an earlier step is missing", field.label()))
    })
}

/// Display label stored for `field`, falling back to the raw value.
pub(crate) fn data_label(data: &StepData, field: Field) -> String {
    data.get(&field.label_key())
        .or_else(|| data.get(field.key()))
        .cloned()
        .unwrap_or_default()
}

/// Action whose section scope restricts the section choice in `workflow`.
fn section_scope(workflow: Workflow) -> Option<Action> {
    match workflow {
        Workflow::EnrollStudent | Workflow::Unenroll | Workflow::Schedule => {
            Some(workflow.action())
        }
        _ => None,
    }
}

fn matches_section(section: &Section, raw: &str) -> bool {
    section.name.eq_ignore_ascii_case(raw) || raw.parse::<i64>().ok() == Some(section.id)
}

fn is_open_report(record: &ScheduleRecord) -> bool {
    record.is_open() && record.kind == RecordKind::ReportDeadline
}

fn user_label(user: &UserRecord) -> String {
    format!("{} ({})", user.full_name, user.id)
}

impl ConversationEngine {
    /// Validates `raw` for `field`: syntax first, then lookups through the store.
    pub(crate) async fn resolve_field(
        &self,
        workflow: Workflow,
        field: Field,
        raw: &str,
        data: &StepData,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Resolved, WorkflowError> {
        let raw = raw.trim();
        match field {
            Field::Course => {
                let course = self.lookup_course(raw).await?;
                Ok(Resolved::new(course.id, course.code))
            }
            Field::Section => {
                let course_id = data_id(data, Field::Course)?;
                let sections = self.bounded(self.store.list_sections(course_id)).await?;
                let section = sections
                    .into_iter()
                    .find(|s| matches_section(s, raw))
                    .ok_or_else(|| {
                        WorkflowError::validation(field.label(), "no section with that name or id")
                    })?;
                if let Some(action) = section_scope(workflow) {
                    let allowed = self
                        .check(
                            self.gate.authorize_in_section(user_id, action, &section),
                            action,
                        )
                        .await;
                    match allowed {
                        Ok(()) => {}
                        Err(WorkflowError::PermissionDenied(_)) => {
                            return Err(WorkflowError::validation(
                                field.label(),
                                "you do not teach this section",
                            ))
                        }
                        Err(e) => return Err(e),
                    }
                }
                let label = format!("{} / {}", data_label(data, Field::Course), section.name);
                Ok(Resolved::new(section.id, label))
            }
            Field::Student | Field::User => {
                let user = self.lookup_user(field, raw).await?;
                Ok(Resolved::new(user.id, user_label(&user)))
            }
            Field::Instructor => {
                if raw == "-" {
                    return Ok(Resolved::new("", "none"));
                }
                let user = self.lookup_user(field, raw).await?;
                Ok(Resolved::new(user.id, user_label(&user)))
            }
            Field::MemberSection => {
                let sections = self.bounded(self.store.sections_for_user(user_id)).await?;
                let section = sections
                    .into_iter()
                    .filter(|s| s.is_enrolled(user_id))
                    .find(|s| matches_section(s, raw))
                    .ok_or_else(|| {
                        WorkflowError::validation(
                            field.label(),
                            "you are not enrolled in a section with that name or id",
                        )
                    })?;
                Ok(Resolved::new(section.id, section.name))
            }
            Field::OpenReport => {
                let section_id = data_id(data, Field::MemberSection)?;
                let records = self.bounded(self.store.list_records(section_id)).await?;
                let record = records
                    .into_iter()
                    .filter(is_open_report)
                    .find(|r| r.title.eq_ignore_ascii_case(raw) || raw.parse::<i64>().ok() == Some(r.id))
                    .ok_or_else(|| {
                        WorkflowError::validation(field.label(), "no open report with that title or id")
                    })?;
                Ok(Resolved::new(record.id, record.title))
            }
            Field::ReportBody => {
                let body = parse_text(field, raw, MAX_REPORT_LEN)?;
                let label = preview(&body);
                Ok(Resolved::new(body, label))
            }
            Field::RecordKind => {
                let kind = parse_record_kind(raw)?;
                Ok(Resolved::new(kind.as_str(), kind.to_string()))
            }
            Field::Title | Field::CourseTitle => {
                let text = parse_text(field, raw, MAX_TITLE_LEN)?;
                Ok(Resolved::new(&text, text.clone()))
            }
            Field::SectionName => {
                let text = parse_text(field, raw, MAX_NAME_LEN)?;
                Ok(Resolved::new(&text, text.clone()))
            }
            Field::DueAt => {
                let at = parse_due_at(raw, now)?;
                Ok(Resolved::new(at.to_rfc3339(), format_when(at)))
            }
            Field::Record => {
                let id = parse_id(field, raw)?;
                let record = self
                    .bounded(self.store.get_record(id))
                    .await?
                    .filter(ScheduleRecord::is_open)
                    .ok_or_else(|| WorkflowError::validation(field.label(), "no open record with that id"))?;
                let section = self.record_section(&record).await?;
                match self
                    .check(
                        self.gate
                            .authorize_in_section(user_id, Action::ScheduleRecord, &section),
                        Action::ScheduleRecord,
                    )
                    .await
                {
                    Ok(()) => {}
                    Err(WorkflowError::PermissionDenied(_)) => {
                        return Err(WorkflowError::validation(
                            field.label(),
                            "you do not manage that record's section",
                        ))
                    }
                    Err(e) => return Err(e),
                }
                let label = format!(
                    "#{} {} \"{}\" at {}",
                    record.id,
                    record.kind,
                    record.title,
                    format_when(record.scheduled_at)
                );
                Ok(Resolved::new(record.id, label))
            }
            Field::CourseCode => {
                let code = parse_course_code(raw)?;
                if self
                    .bounded(self.store.find_course_by_code(&code))
                    .await?
                    .is_some()
                {
                    return Err(WorkflowError::validation(
                        field.label(),
                        "that code is already taken",
                    ));
                }
                Ok(Resolved::new(&code, code.clone()))
            }
            Field::Role => {
                let role = parse_role(raw)?;
                Ok(Resolved::new(role.as_str(), role.as_str()))
            }
            Field::Audience => {
                let audience = parse_audience(raw)?;
                let label = match audience {
                    Audience::All => "all users".to_string(),
                    Audience::Students => "students".to_string(),
                    Audience::Instructors => "instructors".to_string(),
                    Audience::Section(id) => {
                        let section = self
                            .bounded(self.store.get_section(id))
                            .await?
                            .ok_or_else(|| {
                                WorkflowError::validation(field.label(), "no section with that id")
                            })?;
                        let course = self.bounded(self.store.get_course(section.course_id)).await?;
                        let code = course.map(|c| c.code).unwrap_or_default();
                        format!("section {} / {}", code, section.name)
                    }
                };
                Ok(Resolved::new(audience, label))
            }
            Field::Message => {
                let text = parse_text(field, raw, MAX_MESSAGE_LEN)?;
                let label = preview(&text);
                Ok(Resolved::new(text, label))
            }
        }
    }

    /// Non-archived course by code, or by id when the input is numeric.
    async fn lookup_course(&self, raw: &str) -> Result<Course, WorkflowError> {
        let mut course = self.bounded(self.store.find_course_by_code(raw)).await?;
        if course.is_none() {
            if let Ok(id) = raw.parse::<i64>() {
                course = self.bounded(self.store.get_course(id)).await?;
            }
        }
        course.filter(|c| !c.archived).ok_or_else(|| {
            WorkflowError::validation(Field::Course.label(), "no active course with that code")
        })
    }

    async fn lookup_user(&self, field: Field, raw: &str) -> Result<UserRecord, WorkflowError> {
        let id = parse_id(field, raw)?;
        self.bounded(self.store.get_user(id))
            .await?
            .ok_or_else(|| WorkflowError::validation(field.label(), "no registered user with that id"))
    }

    pub(crate) async fn record_section(
        &self,
        record: &ScheduleRecord,
    ) -> Result<Section, WorkflowError> {
        self.bounded(self.store.get_section(record.section_id))
            .await?
            .ok_or_else(|| WorkflowError::Conflict("the record's section no longer exists".to_string()))
    }

    /// Keyboard choices for `field`. Lookup failures just mean no keyboard.
    pub(crate) async fn choices(
        &self,
        workflow: Workflow,
        field: Field,
        user_id: UserId,
        data: &StepData,
    ) -> Vec<String> {
        match self.lookup_choices(workflow, field, user_id, data).await {
            Ok(mut choices) => {
                choices.truncate(MAX_CHOICES);
                choices
            }
            Err(e) => {
                debug!(user_id, field = field.key(), error = %e, "No choices for prompt");
                Vec::new()
            }
        }
    }

    async fn lookup_choices(
        &self,
        workflow: Workflow,
        field: Field,
        user_id: UserId,
        data: &StepData,
    ) -> Result<Vec<String>, WorkflowError> {
        let choices = match field {
            Field::Course => self
                .bounded(self.store.list_courses(false))
                .await?
                .into_iter()
                .map(|c| c.code)
                .collect(),
            Field::Section => {
                let course_id = data_id(data, Field::Course)?;
                let sections = self.bounded(self.store.list_sections(course_id)).await?;
                let role = self.role_of(user_id).await?;
                sections
                    .into_iter()
                    .filter(|s| match (section_scope(workflow), role) {
                        (Some(_), Some(Role::Instructor)) => s.is_instructor(user_id),
                        _ => true,
                    })
                    .map(|s| s.name)
                    .collect()
            }
            Field::MemberSection => self
                .bounded(self.store.sections_for_user(user_id))
                .await?
                .into_iter()
                .filter(|s| s.is_enrolled(user_id))
                .map(|s| s.name)
                .collect(),
            Field::OpenReport => {
                let section_id = data_id(data, Field::MemberSection)?;
                self.bounded(self.store.list_records(section_id))
                    .await?
                    .into_iter()
                    .filter(is_open_report)
                    .map(|r| r.title)
                    .collect()
            }
            Field::RecordKind => vec![
                RecordKind::Exam.as_str().to_string(),
                RecordKind::ReportDeadline.as_str().to_string(),
            ],
            Field::Role => Role::ALL.iter().map(|r| r.as_str().to_string()).collect(),
            Field::Audience => Audience::KEYWORDS.iter().map(|k| k.to_string()).collect(),
            _ => Vec::new(),
        };
        Ok(choices)
    }
}
