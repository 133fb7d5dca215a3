//! Confirm step: mandatory permission re-check, then one mutation per workflow.

use chrono::{DateTime, Utc};
use classbot_core::{OutboundIntent, Role, UserId};
use permission_gate::{action_for_granting, Action};
use reminder::format_lead;
use storage::{NewRecord, RecordKind, ScheduleRecord, Section, UserRecord};
use tracing::info;

use crate::engine::{ConversationEngine, StepData};
use crate::error::WorkflowError;
use crate::field::{format_when, Audience};
use crate::resolve::{data_id, data_label, data_text};
use crate::state::{Field, Workflow};

fn parse_stored<T: std::str::FromStr>(data: &StepData, field: Field) -> Result<T, WorkflowError> {
    data_text(data, field)?.parse::<T>().map_err(|_| {
        WorkflowError::Conflict(format!("the stored {} is unreadable", field.label()))
    })
}

fn stored_time(data: &StepData) -> Result<DateTime<Utc>, WorkflowError> {
    DateTime::parse_from_rfc3339(data_text(data, Field::DueAt)?)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| WorkflowError::Conflict("the stored date is unreadable".to_string()))
}

fn is_admin(user: &UserRecord) -> bool {
    matches!(user.role, Role::Admin | Role::SuperAdmin)
}

impl ConversationEngine {
    /// Applies the collected data. Returns the confirmation for the user, followed by any
    /// notifications the workflow sends to others.
    pub(crate) async fn commit(
        &self,
        workflow: Workflow,
        user_id: UserId,
        data: &StepData,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboundIntent>, WorkflowError> {
        let message = match workflow {
            Workflow::Enroll => {
                let section = self.stored_section(data, Field::Section).await?;
                self.require_in_section(user_id, Action::EnrollSelf, &section)
                    .await?;
                self.bounded(self.store.enroll(section.id, user_id)).await?;
                format!(
                    "You are enrolled in {}.",
                    data_label(data, Field::Section)
                )
            }
            Workflow::EnrollStudent => {
                let section = self.stored_section(data, Field::Section).await?;
                self.require_in_section(user_id, Action::EnrollStudent, &section)
                    .await?;
                let student = data_id(data, Field::Student)?;
                self.bounded(self.store.enroll(section.id, student)).await?;
                format!(
                    "Enrolled {} in {}.",
                    data_label(data, Field::Student),
                    data_label(data, Field::Section)
                )
            }
            Workflow::Unenroll => {
                let section = self.stored_section(data, Field::Section).await?;
                self.require_in_section(user_id, Action::EnrollStudent, &section)
                    .await?;
                let student = data_id(data, Field::Student)?;
                self.bounded(self.store.unenroll(section.id, student)).await?;
                format!(
                    "Removed {} from {}.",
                    data_label(data, Field::Student),
                    data_label(data, Field::Section)
                )
            }
            Workflow::SubmitReport => {
                let record = self.stored_record(data, Field::OpenReport).await?;
                let section = self.record_section(&record).await?;
                self.require_in_section(user_id, Action::SubmitReport, &section)
                    .await?;
                let body = data_text(data, Field::ReportBody)?;
                self.bounded(self.store.create_submission(record.id, user_id, body))
                    .await?;
                format!("Your report for \"{}\" was submitted.", record.title)
            }
            Workflow::Schedule => {
                let section = self.stored_section(data, Field::Section).await?;
                self.require_in_section(user_id, Action::ScheduleRecord, &section)
                    .await?;
                let kind: RecordKind = parse_stored(data, Field::RecordKind)?;
                let new = NewRecord {
                    section_id: section.id,
                    kind,
                    title: data_text(data, Field::Title)?.to_string(),
                    scheduled_at: stored_time(data)?,
                    created_by: user_id,
                };
                let record = self
                    .bounded(self.scheduler.schedule_record(new, now))
                    .await?;
                format!(
                    "Scheduled {} \"{}\" for {} (record #{}). Reminders: {}.",
                    record.kind,
                    record.title,
                    format_when(record.scheduled_at),
                    record.id,
                    self.lead_summary()
                )
            }
            Workflow::Reschedule => {
                let record = self.stored_record(data, Field::Record).await?;
                let section = self.record_section(&record).await?;
                self.require_in_section(user_id, Action::ScheduleRecord, &section)
                    .await?;
                let at = stored_time(data)?;
                let record = self
                    .bounded(self.scheduler.reschedule_record(record.id, at, now))
                    .await?;
                format!(
                    "Moved {} \"{}\" to {}.",
                    record.kind,
                    record.title,
                    format_when(record.scheduled_at)
                )
            }
            Workflow::CloseRecord => {
                let record = self.stored_record(data, Field::Record).await?;
                let section = self.record_section(&record).await?;
                self.require_in_section(user_id, Action::ScheduleRecord, &section)
                    .await?;
                let record = self.bounded(self.scheduler.close_record(record.id)).await?;
                format!("Closed record #{} \"{}\".", record.id, record.title)
            }
            Workflow::CreateCourse => {
                self.require(user_id, Action::ManageCourse).await?;
                let code = data_text(data, Field::CourseCode)?;
                let title = data_text(data, Field::CourseTitle)?;
                let course = self.bounded(self.store.create_course(code, title)).await?;
                format!(
                    "Created course {}: {} (id {}).",
                    course.code, course.title, course.id
                )
            }
            Workflow::ArchiveCourse => {
                self.require(user_id, Action::ManageCourse).await?;
                let course_id = data_id(data, Field::Course)?;
                let course = self.bounded(self.store.archive_course(course_id)).await?;
                format!("Archived course {}.", course.code)
            }
            Workflow::CreateSection => {
                self.require(user_id, Action::ManageSection).await?;
                let course_id = data_id(data, Field::Course)?;
                let name = data_text(data, Field::SectionName)?;
                let instructors = match data_text(data, Field::Instructor)? {
                    "" => Vec::new(),
                    _ => vec![data_id(data, Field::Instructor)?],
                };
                let section = self
                    .bounded(self.store.create_section(course_id, name, &instructors))
                    .await?;
                format!(
                    "Created section {} in {} (id {}).",
                    section.name,
                    data_label(data, Field::Course),
                    section.id
                )
            }
            Workflow::SetRole => {
                let role: Role = parse_stored(data, Field::Role)?;
                self.require(user_id, Action::ManageUsers).await?;
                self.check(self.gate.may_grant(user_id, role), action_for_granting(role))
                    .await?;
                let target = self.stored_target(data, user_id).await?;
                if is_admin(&target) {
                    self.require(user_id, Action::ManageAdmins).await?;
                }
                let updated = self.bounded(self.store.set_role(target.id, role)).await?;
                format!("{} is now {}.", updated.full_name, updated.role)
            }
            Workflow::DeactivateUser => {
                self.require(user_id, Action::ManageUsers).await?;
                let target = self.stored_target(data, user_id).await?;
                if is_admin(&target) {
                    self.require(user_id, Action::ManageAdmins).await?;
                }
                if !target.active {
                    return Err(WorkflowError::Conflict(
                        "the user is already deactivated".to_string(),
                    ));
                }
                let updated = self
                    .bounded(self.store.set_active(target.id, false))
                    .await?;
                format!("{} has been deactivated.", updated.full_name)
            }
            Workflow::Broadcast => return self.broadcast(user_id, data).await,
        };
        Ok(vec![OutboundIntent::confirmation(user_id, message)])
    }

    /// Confirmation for the sender plus one notification for every active recipient.
    async fn broadcast(
        &self,
        user_id: UserId,
        data: &StepData,
    ) -> Result<Vec<OutboundIntent>, WorkflowError> {
        self.require(user_id, Action::Broadcast).await?;
        let audience: Audience = parse_stored(data, Field::Audience)?;
        let text = data_text(data, Field::Message)?;
        let recipients = self.recipients(audience, user_id).await?;
        if recipients.is_empty() {
            return Err(WorkflowError::Conflict(
                "nobody else is in that audience".to_string(),
            ));
        }
        info!(
            user_id,
            audience = %audience,
            recipients = recipients.len(),
            "step: broadcast prepared"
        );
        Ok(vec![
            OutboundIntent::confirmation(
                user_id,
                format!(
                    "Announcement sent to {} (recipients: {}).",
                    data_label(data, Field::Audience),
                    recipients.len()
                ),
            ),
            OutboundIntent::notification(recipients, format!("Announcement:\n{}", text)),
        ])
    }

    /// Active members of `audience` other than the sender, ordered by id.
    async fn recipients(
        &self,
        audience: Audience,
        sender: UserId,
    ) -> Result<Vec<UserId>, WorkflowError> {
        let users = match audience {
            Audience::All => self.bounded(self.store.list_users(None)).await?,
            Audience::Students => {
                self.bounded(self.store.list_users(Some(Role::Student)))
                    .await?
            }
            Audience::Instructors => {
                self.bounded(self.store.list_users(Some(Role::Instructor)))
                    .await?
            }
            Audience::Section(id) => {
                let section = self.bounded(self.store.get_section(id)).await?.ok_or_else(|| {
                    WorkflowError::Conflict("the section no longer exists".to_string())
                })?;
                let mut users = Vec::new();
                for member in section.instructors.iter().chain(&section.roster) {
                    if let Some(user) = self.bounded(self.store.get_user(*member)).await? {
                        users.push(user);
                    }
                }
                users
            }
        };
        let mut ids: Vec<UserId> = users
            .into_iter()
            .filter(|u| u.active && u.id != sender)
            .map(|u| u.id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn require(&self, user_id: UserId, action: Action) -> Result<(), WorkflowError> {
        self.check(self.gate.authorize(user_id, action), action)
            .await
    }

    async fn require_in_section(
        &self,
        user_id: UserId,
        action: Action,
        section: &Section,
    ) -> Result<(), WorkflowError> {
        self.check(
            self.gate.authorize_in_section(user_id, action, section),
            action,
        )
        .await
    }

    /// Section chosen earlier; it may have disappeared since.
    async fn stored_section(&self, data: &StepData, field: Field) -> Result<Section, WorkflowError> {
        let id = data_id(data, field)?;
        self.bounded(self.store.get_section(id))
            .await?
            .ok_or_else(|| WorkflowError::Conflict("the section no longer exists".to_string()))
    }

    /// Open record chosen earlier; it may have been closed since.
    async fn stored_record(
        &self,
        data: &StepData,
        field: Field,
    ) -> Result<ScheduleRecord, WorkflowError> {
        let id = data_id(data, field)?;
        self.bounded(self.store.get_record(id))
            .await?
            .filter(ScheduleRecord::is_open)
            .ok_or_else(|| WorkflowError::Conflict(format!("record #{} is no longer open", id)))
    }

    /// User whose role or status is being changed. Configured super-admins and the sender
    /// themselves are off limits.
    async fn stored_target(
        &self,
        data: &StepData,
        user_id: UserId,
    ) -> Result<UserRecord, WorkflowError> {
        let id = data_id(data, Field::User)?;
        if self.gate.is_configured_superadmin(id) {
            return Err(WorkflowError::Conflict(
                "configured super-admins cannot be changed here".to_string(),
            ));
        }
        if id == user_id {
            return Err(WorkflowError::Conflict(
                "you cannot change your own account".to_string(),
            ));
        }
        self.bounded(self.store.get_user(id))
            .await?
            .ok_or_else(|| WorkflowError::Conflict(format!("user {} not found", id)))
    }

    fn lead_summary(&self) -> String {
        let leads = self.scheduler.config().lead_times();
        if leads.is_empty() {
            return "none".to_string();
        }
        leads
            .iter()
            .map(|lead| format!("{} before", format_lead(*lead)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
