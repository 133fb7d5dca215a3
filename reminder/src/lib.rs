//! # reminder
//!
//! Restart-safe reminder scheduling for exams and report deadlines. Jobs live in the store;
//! [`ReminderScheduler::tick`] fires due lead times at most once each and closes records
//! whose time has passed.

mod config;
mod error;
mod scheduler;

pub use config::{format_lead, parse_lead_times, ReminderConfig};
pub use error::SchedulerError;
pub use scheduler::{ReminderScheduler, TickReport};
