//! Action taxonomy and the static role → action table.

use std::fmt;

use classbot_core::Role;
use serde::{Deserialize, Serialize};

/// Everything a user can ask the bot to do that needs authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    ManageCourse,
    ManageSection,
    EnrollSelf,
    EnrollStudent,
    SubmitReport,
    ViewReports,
    ScheduleRecord,
    ManageUsers,
    ManageAdmins,
    ViewSchedule,
    Broadcast,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::ManageCourse,
        Action::ManageSection,
        Action::EnrollSelf,
        Action::EnrollStudent,
        Action::SubmitReport,
        Action::ViewReports,
        Action::ScheduleRecord,
        Action::ManageUsers,
        Action::ManageAdmins,
        Action::ViewSchedule,
        Action::Broadcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ManageCourse => "manage_course",
            Action::ManageSection => "manage_section",
            Action::EnrollSelf => "enroll_self",
            Action::EnrollStudent => "enroll_student",
            Action::SubmitReport => "submit_report",
            Action::ViewReports => "view_reports",
            Action::ScheduleRecord => "schedule_record",
            Action::ManageUsers => "manage_users",
            Action::ManageAdmins => "manage_admins",
            Action::ViewSchedule => "view_schedule",
            Action::Broadcast => "broadcast",
        }
    }

    /// True for actions that an instructor may only exercise on sections they teach.
    pub fn is_section_scoped(&self) -> bool {
        matches!(
            self,
            Action::EnrollStudent | Action::ScheduleRecord | Action::ViewReports
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ADMIN_ACTIONS: &[Action] = &[
    Action::ManageCourse,
    Action::ManageSection,
    Action::EnrollStudent,
    Action::ViewReports,
    Action::ScheduleRecord,
    Action::ManageUsers,
    Action::ViewSchedule,
    Action::Broadcast,
];

const INSTRUCTOR_ACTIONS: &[Action] = &[
    Action::EnrollStudent,
    Action::ViewReports,
    Action::ScheduleRecord,
    Action::ViewSchedule,
];

const STUDENT_ACTIONS: &[Action] = &[
    Action::EnrollSelf,
    Action::SubmitReport,
    Action::ViewSchedule,
];

/// Actions a role may perform. Roles do not inherit from each other.
pub fn permitted_actions(role: Role) -> &'static [Action] {
    match role {
        Role::SuperAdmin => &Action::ALL,
        Role::Admin => ADMIN_ACTIONS,
        Role::Instructor => INSTRUCTOR_ACTIONS,
        Role::Student => STUDENT_ACTIONS,
    }
}

pub fn role_permits(role: Role, action: Action) -> bool {
    permitted_actions(role).contains(&action)
}

/// Action needed to give someone `role`.
pub fn action_for_granting(role: Role) -> Action {
    match role {
        Role::SuperAdmin | Role::Admin => Action::ManageAdmins,
        Role::Instructor | Role::Student => Action::ManageUsers,
    }
}
