//! Workflows, their fields and the conversation state tag.
//!
//! A session's state is stored as a plain tag so it survives restarts:
//! `idle`, `<workflow>:<field>` while a field is awaited, `<workflow>:confirm` at the end.

use std::fmt;

use permission_gate::Action;
use storage::IDLE_STATE;

/// One multi-step workflow started by a slash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workflow {
    Enroll,
    EnrollStudent,
    Unenroll,
    SubmitReport,
    Schedule,
    Reschedule,
    CloseRecord,
    CreateCourse,
    ArchiveCourse,
    CreateSection,
    SetRole,
    DeactivateUser,
    Broadcast,
}

impl Workflow {
    pub const ALL: [Workflow; 13] = [
        Workflow::Enroll,
        Workflow::EnrollStudent,
        Workflow::Unenroll,
        Workflow::SubmitReport,
        Workflow::Schedule,
        Workflow::Reschedule,
        Workflow::CloseRecord,
        Workflow::CreateCourse,
        Workflow::ArchiveCourse,
        Workflow::CreateSection,
        Workflow::SetRole,
        Workflow::DeactivateUser,
        Workflow::Broadcast,
    ];

    /// Name used in state tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Enroll => "enroll",
            Workflow::EnrollStudent => "enroll_student",
            Workflow::Unenroll => "unenroll",
            Workflow::SubmitReport => "submit_report",
            Workflow::Schedule => "schedule",
            Workflow::Reschedule => "reschedule",
            Workflow::CloseRecord => "close_record",
            Workflow::CreateCourse => "create_course",
            Workflow::ArchiveCourse => "archive_course",
            Workflow::CreateSection => "create_section",
            Workflow::SetRole => "set_role",
            Workflow::DeactivateUser => "deactivate_user",
            Workflow::Broadcast => "broadcast",
        }
    }

    /// Slash command (without `/`) that starts the workflow.
    pub fn command(&self) -> &'static str {
        match self {
            Workflow::Enroll => "enroll",
            Workflow::EnrollStudent => "enrollstudent",
            Workflow::Unenroll => "unenroll",
            Workflow::SubmitReport => "report",
            Workflow::Schedule => "schedule",
            Workflow::Reschedule => "reschedule",
            Workflow::CloseRecord => "close",
            Workflow::CreateCourse => "newcourse",
            Workflow::ArchiveCourse => "archivecourse",
            Workflow::CreateSection => "newsection",
            Workflow::SetRole => "setrole",
            Workflow::DeactivateUser => "deactivate",
            Workflow::Broadcast => "broadcast",
        }
    }

    pub fn from_command(name: &str) -> Option<Workflow> {
        Workflow::ALL.into_iter().find(|w| w.command() == name)
    }

    pub fn from_name(name: &str) -> Option<Workflow> {
        Workflow::ALL.into_iter().find(|w| w.as_str() == name)
    }

    /// Shown in /help and in the confirmation summary.
    pub fn description(&self) -> &'static str {
        match self {
            Workflow::Enroll => "Enroll yourself in a section",
            Workflow::EnrollStudent => "Enroll a student in a section",
            Workflow::Unenroll => "Remove a student from a section",
            Workflow::SubmitReport => "Submit a report",
            Workflow::Schedule => "Schedule an exam or report deadline",
            Workflow::Reschedule => "Move an exam or report deadline",
            Workflow::CloseRecord => "Close an exam or report deadline",
            Workflow::CreateCourse => "Create a course",
            Workflow::ArchiveCourse => "Archive a course",
            Workflow::CreateSection => "Create a section",
            Workflow::SetRole => "Change a user's role",
            Workflow::DeactivateUser => "Deactivate a user",
            Workflow::Broadcast => "Send an announcement",
        }
    }

    /// Action checked when the workflow starts. `SetRole` is checked again at confirm
    /// against the role being granted.
    pub fn action(&self) -> Action {
        match self {
            Workflow::Enroll => Action::EnrollSelf,
            Workflow::EnrollStudent | Workflow::Unenroll => Action::EnrollStudent,
            Workflow::SubmitReport => Action::SubmitReport,
            Workflow::Schedule | Workflow::Reschedule | Workflow::CloseRecord => {
                Action::ScheduleRecord
            }
            Workflow::CreateCourse | Workflow::ArchiveCourse => Action::ManageCourse,
            Workflow::CreateSection => Action::ManageSection,
            Workflow::SetRole | Workflow::DeactivateUser => Action::ManageUsers,
            Workflow::Broadcast => Action::Broadcast,
        }
    }

    /// Fields in the order they are asked.
    pub fn fields(&self) -> &'static [Field] {
        match self {
            Workflow::Enroll => &[Field::Course, Field::Section],
            Workflow::EnrollStudent | Workflow::Unenroll => {
                &[Field::Course, Field::Section, Field::Student]
            }
            Workflow::SubmitReport => &[Field::MemberSection, Field::OpenReport, Field::ReportBody],
            Workflow::Schedule => &[
                Field::Course,
                Field::Section,
                Field::RecordKind,
                Field::Title,
                Field::DueAt,
            ],
            Workflow::Reschedule => &[Field::Record, Field::DueAt],
            Workflow::CloseRecord => &[Field::Record],
            Workflow::CreateCourse => &[Field::CourseCode, Field::CourseTitle],
            Workflow::ArchiveCourse => &[Field::Course],
            Workflow::CreateSection => &[Field::Course, Field::SectionName, Field::Instructor],
            Workflow::SetRole => &[Field::User, Field::Role],
            Workflow::DeactivateUser => &[Field::User],
            Workflow::Broadcast => &[Field::Audience, Field::Message],
        }
    }

    pub fn first_field(&self) -> Field {
        self.fields()[0]
    }

    /// Field after `field`, or `None` when the next step is confirmation.
    pub fn next_field(&self, field: Field) -> Option<Field> {
        let fields = self.fields();
        let pos = fields.iter().position(|f| *f == field)?;
        fields.get(pos + 1).copied()
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.fields().contains(&field)
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value collected from the user during a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Course,
    Section,
    Student,
    MemberSection,
    OpenReport,
    ReportBody,
    RecordKind,
    Title,
    DueAt,
    Record,
    CourseCode,
    CourseTitle,
    SectionName,
    Instructor,
    User,
    Role,
    Audience,
    Message,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::Course,
        Field::Section,
        Field::Student,
        Field::MemberSection,
        Field::OpenReport,
        Field::ReportBody,
        Field::RecordKind,
        Field::Title,
        Field::DueAt,
        Field::Record,
        Field::CourseCode,
        Field::CourseTitle,
        Field::SectionName,
        Field::Instructor,
        Field::User,
        Field::Role,
        Field::Audience,
        Field::Message,
    ];

    /// Key in session data and in state tags.
    pub fn key(&self) -> &'static str {
        match self {
            Field::Course => "course",
            Field::Section => "section",
            Field::Student => "student",
            Field::MemberSection => "member_section",
            Field::OpenReport => "open_report",
            Field::ReportBody => "report_body",
            Field::RecordKind => "record_kind",
            Field::Title => "title",
            Field::DueAt => "due_at",
            Field::Record => "record",
            Field::CourseCode => "course_code",
            Field::CourseTitle => "course_title",
            Field::SectionName => "section_name",
            Field::Instructor => "instructor",
            Field::User => "user",
            Field::Role => "role",
            Field::Audience => "audience",
            Field::Message => "message",
        }
    }

    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.key() == key)
    }

    /// Key of the human-readable label stored next to the value.
    pub fn label_key(&self) -> String {
        format!("{}_label", self.key())
    }

    /// Name used in validation messages and the confirmation summary.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Course => "course",
            Field::Section | Field::MemberSection => "section",
            Field::Student => "student",
            Field::OpenReport => "report",
            Field::ReportBody => "report text",
            Field::RecordKind => "type",
            Field::Title => "title",
            Field::DueAt => "date",
            Field::Record => "record",
            Field::CourseCode => "course code",
            Field::CourseTitle => "course title",
            Field::SectionName => "section name",
            Field::Instructor => "instructor",
            Field::User => "user",
            Field::Role => "role",
            Field::Audience => "audience",
            Field::Message => "message",
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Field::Course => "Which course? Send the course code.",
            Field::Section => "Which section? Send its name or id.",
            Field::Student => "Send the numeric user id of the student.",
            Field::MemberSection => "Which of your sections? Send its name or id.",
            Field::OpenReport => "Which report? Send its title or id.",
            Field::ReportBody => "Send your report text.",
            Field::RecordKind => "Is it an exam or a report deadline? (exam / report)",
            Field::Title => "Send a title.",
            Field::DueAt => "When? Send a UTC date and time as YYYY-MM-DD HH:MM.",
            Field::Record => "Send the record id (see /myschedule).",
            Field::CourseCode => "Send the new course code (2-16 letters, digits, - or _).",
            Field::CourseTitle => "Send the course title.",
            Field::SectionName => "Send the section name.",
            Field::Instructor => "Send the instructor's user id, or - for none.",
            Field::User => "Send the numeric user id.",
            Field::Role => "Which role? (superadmin / admin / instructor / student)",
            Field::Audience => {
                "Who should receive it? (all / students / instructors, or a section id)"
            }
            Field::Message => "Send the announcement text.",
        }
    }
}

/// Where a user's conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvState {
    Idle,
    Awaiting(Workflow, Field),
    Confirming(Workflow),
}

impl ConvState {
    pub fn tag(&self) -> String {
        match self {
            ConvState::Idle => IDLE_STATE.to_string(),
            ConvState::Awaiting(workflow, field) => format!("{}:{}", workflow, field.key()),
            ConvState::Confirming(workflow) => format!("{}:confirm", workflow),
        }
    }

    /// Parses a stored tag. `None` for anything unrecognised, including a field that does not
    /// belong to the workflow.
    pub fn from_tag(tag: &str) -> Option<ConvState> {
        if tag == IDLE_STATE {
            return Some(ConvState::Idle);
        }
        let (workflow, step) = tag.split_once(':')?;
        let workflow = Workflow::from_name(workflow)?;
        if step == "confirm" {
            return Some(ConvState::Confirming(workflow));
        }
        let field = Field::from_key(step)?;
        workflow
            .has_field(field)
            .then_some(ConvState::Awaiting(workflow, field))
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ConvState::Idle)
    }

    pub fn workflow(&self) -> Option<Workflow> {
        match self {
            ConvState::Idle => None,
            ConvState::Awaiting(workflow, _) | ConvState::Confirming(workflow) => Some(*workflow),
        }
    }
}
