//! Reminder scheduler: a durable job queue in the store, driven by explicit ticks.
//!
//! Each record has at most one job. The job's `next_fire_at` is the next configured lead instant,
//! or the record's scheduled time once every lead has fired (the closing tick). The record's
//! `fired_leads` marker is written before the job is moved, so a restart between the two writes
//! never re-sends a lead.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use classbot_core::{Bot, OutboundIntent, RecordId, UserId};
use futures::future::join_all;
use storage::{
    JobSchedule, NewRecord, RecordKind, ReminderJob, ReminderTarget, ScheduleRecord, StorageError,
    Store,
};
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{format_lead, ReminderConfig};
use crate::error::SchedulerError;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Lead reminders fired (one per record, whatever the audience size).
    pub fired: usize,
    /// Records closed because their scheduled time passed.
    pub closed: usize,
    /// Due jobs dropped or re-derived without sending anything.
    pub skipped: usize,
    /// Individual sends that failed or timed out.
    pub failed_deliveries: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        *self == TickReport::default()
    }
}

/// A lead reminder waiting for its deliveries before the marker is persisted.
struct Firing {
    record: ScheduleRecord,
    lead_index: usize,
    target: ReminderTarget,
}

/// Outcome of looking at one due job.
enum Planned {
    Fire(Firing),
    Closed(ScheduleRecord),
    Nothing,
}

pub struct ReminderScheduler {
    store: Arc<dyn Store>,
    bot: Arc<dyn Bot>,
    config: ReminderConfig,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn Store>, bot: Arc<dyn Bot>, config: ReminderConfig) -> Self {
        Self { store, bot, config }
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.config
    }

    /// Fire instant for lead `index`; past the last lead it is the scheduled time itself.
    fn fire_at(&self, scheduled_at: DateTime<Utc>, index: usize) -> DateTime<Utc> {
        match self.config.lead_times().get(index) {
            Some(lead) => lead_instant(scheduled_at, *lead),
            None => scheduled_at,
        }
    }

    /// Marker and first fire instant for a record scheduled now: leads already past are skipped.
    fn initial_plan(&self, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> (u32, DateTime<Utc>) {
        let skipped = self
            .config
            .lead_times()
            .iter()
            .take_while(|lead| lead_instant(scheduled_at, **lead) < now)
            .count();
        (skipped as u32, self.fire_at(scheduled_at, skipped))
    }

    /// Creates the record and its job targeting the section roster.
    pub async fn schedule_record(
        &self,
        new: NewRecord,
        now: DateTime<Utc>,
    ) -> Result<ScheduleRecord, SchedulerError> {
        let target = ReminderTarget::Section(new.section_id);
        self.schedule_with_target(new, target, now).await
    }

    /// Creates the record with reminders going to exactly `users`.
    pub async fn schedule_record_for_users(
        &self,
        new: NewRecord,
        users: Vec<UserId>,
        now: DateTime<Utc>,
    ) -> Result<ScheduleRecord, SchedulerError> {
        self.schedule_with_target(new, ReminderTarget::Users(users), now)
            .await
    }

    async fn schedule_with_target(
        &self,
        new: NewRecord,
        target: ReminderTarget,
        now: DateTime<Utc>,
    ) -> Result<ScheduleRecord, SchedulerError> {
        if new.scheduled_at <= now {
            return Err(SchedulerError::InPast(new.scheduled_at));
        }
        let (fired_leads, next_fire_at) = self.initial_plan(new.scheduled_at, now);
        let record = self
            .store
            .create_record(
                &new,
                fired_leads,
                Some(JobSchedule {
                    next_fire_at,
                    target,
                }),
            )
            .await?;
        info!(
            record_id = record.id,
            section_id = record.section_id,
            scheduled_at = %record.scheduled_at,
            fired_leads,
            next_fire_at = %next_fire_at,
            "step: record scheduled"
        );
        Ok(record)
    }

    /// Moves a record: the marker is re-derived for the new time and the job replaced atomically.
    pub async fn reschedule_record(
        &self,
        id: RecordId,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ScheduleRecord, SchedulerError> {
        if scheduled_at <= now {
            return Err(SchedulerError::InPast(scheduled_at));
        }
        let record = self
            .store
            .get_record(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("record {}", id)))?;
        let target = match self.store.get_job(id).await? {
            Some(job) => job.target,
            None => ReminderTarget::Section(record.section_id),
        };
        let (fired_leads, next_fire_at) = self.initial_plan(scheduled_at, now);
        let record = self
            .store
            .reschedule_record(
                id,
                scheduled_at,
                fired_leads,
                Some(JobSchedule {
                    next_fire_at,
                    target,
                }),
            )
            .await?;
        info!(record_id = id, scheduled_at = %scheduled_at, next_fire_at = %next_fire_at, "step: record rescheduled");
        Ok(record)
    }

    /// Closes a record ahead of time; its job goes with it.
    pub async fn close_record(&self, id: RecordId) -> Result<ScheduleRecord, SchedulerError> {
        let record = self.store.close_record(id).await?;
        info!(record_id = id, "step: record closed");
        Ok(record)
    }

    /// Gives every open record without a job a fresh one, derived from its persisted marker.
    /// Returns the number of jobs created.
    pub async fn recover(&self) -> Result<usize, SchedulerError> {
        let mut created = 0;
        for record in self.store.list_open_records().await? {
            if self.store.get_job(record.id).await?.is_some() {
                continue;
            }
            let job = ReminderJob {
                record_id: record.id,
                next_fire_at: self.fire_at(record.scheduled_at, record.fired_leads as usize),
                target: ReminderTarget::Section(record.section_id),
            };
            self.store.upsert_job(&job).await?;
            debug!(record_id = record.id, next_fire_at = %job.next_fire_at, "Recovered reminder job");
            created += 1;
        }
        if created > 0 {
            info!(created, "Reminder jobs recovered");
        }
        Ok(created)
    }

    /// One scan: fires due leads, closes records whose time has come.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, SchedulerError> {
        let due = self.store.due_jobs(now).await?;
        let mut report = TickReport::default();
        if due.is_empty() {
            return Ok(report);
        }
        debug!(due = due.len(), now = %now, "step: tick");

        let mut firings = Vec::new();
        let mut closed = Vec::new();
        for job in due {
            match self.plan_job(&job, now).await {
                Ok(Planned::Fire(firing)) => firings.push(firing),
                Ok(Planned::Closed(record)) => closed.push(record),
                Ok(Planned::Nothing) => report.skipped += 1,
                Err(e) => {
                    warn!(record_id = job.record_id, error = %e, "Failed to process reminder job");
                    report.skipped += 1;
                }
            }
        }
        report.closed = closed.len();

        let mut outgoing: Vec<OutboundIntent> = Vec::new();
        for firing in &firings {
            match self.audience(&firing.record, &firing.target).await {
                Ok(audience) if audience.is_empty() => {
                    debug!(record_id = firing.record.id, "Empty audience, nothing to send");
                }
                Ok(audience) => {
                    let lead = self.config.lead_times()[firing.lead_index];
                    outgoing.push(OutboundIntent::notification(
                        audience,
                        lead_message(&firing.record, lead),
                    ));
                }
                Err(e) => {
                    warn!(record_id = firing.record.id, error = %e, "Failed to resolve audience");
                }
            }
        }
        for record in &closed {
            match self.closing_summary(record).await {
                Ok(Some(intent)) => outgoing.push(intent),
                Ok(None) => {}
                Err(e) => warn!(record_id = record.id, error = %e, "Failed to build closing summary"),
            }
        }

        report.failed_deliveries += self.deliver_all(&outgoing).await;

        for firing in firings {
            let record_id = firing.record.id;
            let marker = firing.lead_index as u32 + 1;
            if let Err(e) = self.store.mark_lead_fired(record_id, marker).await {
                warn!(record_id, error = %e, "Failed to persist lead marker");
                continue;
            }
            let job = ReminderJob {
                record_id,
                next_fire_at: self.fire_at(firing.record.scheduled_at, marker as usize),
                target: firing.target,
            };
            if let Err(e) = self.store.upsert_job(&job).await {
                warn!(record_id, error = %e, "Failed to move reminder job");
                continue;
            }
            info!(record_id, fired_leads = marker, next_fire_at = %job.next_fire_at, "step: lead fired");
            report.fired += 1;
        }

        info!(
            fired = report.fired,
            closed = report.closed,
            skipped = report.skipped,
            failed_deliveries = report.failed_deliveries,
            "step: tick done"
        );
        Ok(report)
    }

    /// Decides what a due job means now. Closing happens here; lead firings are returned.
    async fn plan_job(&self, job: &ReminderJob, now: DateTime<Utc>) -> Result<Planned, StorageError> {
        let record = match self.store.get_record(job.record_id).await? {
            Some(record) if record.is_open() => record,
            _ => {
                self.store.remove_job(job.record_id).await?;
                debug!(record_id = job.record_id, "Dropped job of missing or closed record");
                return Ok(Planned::Nothing);
            }
        };

        if now >= record.scheduled_at {
            return match self.store.close_record(record.id).await {
                Ok(closed) => {
                    info!(record_id = closed.id, "step: record closed by scheduler");
                    Ok(Planned::Closed(closed))
                }
                Err(StorageError::Conflict(_)) => {
                    self.store.remove_job(record.id).await?;
                    Ok(Planned::Nothing)
                }
                Err(e) => Err(e),
            };
        }

        let first_unfired = record.fired_leads as usize;
        let lead_index = (first_unfired..self.config.lead_times().len())
            .filter(|i| self.fire_at(record.scheduled_at, *i) <= now)
            .last();
        match lead_index {
            Some(lead_index) => {
                if lead_index > first_unfired {
                    info!(
                        record_id = record.id,
                        collapsed = lead_index - first_unfired,
                        "Missed leads collapsed into latest"
                    );
                }
                Ok(Planned::Fire(Firing {
                    record,
                    lead_index,
                    target: job.target.clone(),
                }))
            }
            None => {
                // Marker already past this job's instant: a previous tick fired but did not move the job.
                let next_fire_at = self.fire_at(record.scheduled_at, first_unfired);
                self.store
                    .upsert_job(&ReminderJob {
                        record_id: record.id,
                        next_fire_at,
                        target: job.target.clone(),
                    })
                    .await?;
                debug!(record_id = record.id, next_fire_at = %next_fire_at, "Lead already fired, job re-derived");
                Ok(Planned::Nothing)
            }
        }
    }

    /// Summary for the section's instructors once a record closes.
    async fn closing_summary(
        &self,
        record: &ScheduleRecord,
    ) -> Result<Option<OutboundIntent>, StorageError> {
        let Some(section) = self.store.get_section(record.section_id).await? else {
            return Ok(None);
        };
        if section.instructors.is_empty() {
            return Ok(None);
        }
        let content = match record.kind {
            RecordKind::Exam => format!(
                "Exam \"{}\" in section {} has ended ({} students enrolled).",
                record.title,
                section.name,
                section.roster.len()
            ),
            RecordKind::ReportDeadline => {
                let submissions = self.store.list_submissions(record.id).await?;
                let submitted = section
                    .roster
                    .iter()
                    .filter(|id| submissions.iter().any(|s| s.user_id == **id))
                    .count();
                format!(
                    "Report \"{}\" in section {} is closed: {}/{} students submitted.",
                    record.title,
                    section.name,
                    submitted,
                    section.roster.len()
                )
            }
        };
        Ok(Some(OutboundIntent::notification(section.instructors, content)))
    }

    /// Recipients of a lead reminder. Report deadlines skip students who already submitted.
    async fn audience(
        &self,
        record: &ScheduleRecord,
        target: &ReminderTarget,
    ) -> Result<Vec<UserId>, StorageError> {
        match target {
            ReminderTarget::Users(users) => Ok(users.clone()),
            ReminderTarget::Section(section_id) => {
                let Some(section) = self.store.get_section(*section_id).await? else {
                    return Ok(Vec::new());
                };
                if record.kind != RecordKind::ReportDeadline {
                    return Ok(section.roster);
                }
                let submitted: Vec<UserId> = self
                    .store
                    .list_submissions(record.id)
                    .await?
                    .into_iter()
                    .map(|s| s.user_id)
                    .collect();
                Ok(section
                    .roster
                    .into_iter()
                    .filter(|id| !submitted.contains(id))
                    .collect())
            }
        }
    }

    /// Sends every intent to every target concurrently, each send bounded by the delivery timeout.
    /// Returns the number of failed sends.
    async fn deliver_all(&self, intents: &[OutboundIntent]) -> usize {
        let sends = intents.iter().flat_map(|intent| {
            intent.targets.iter().map(move |target| {
                let bot = Arc::clone(&self.bot);
                let limit = self.config.delivery_timeout;
                async move {
                    match timeout(limit, bot.send_intent(*target, intent)).await {
                        Ok(Ok(())) => true,
                        Ok(Err(e)) => {
                            warn!(user_id = *target, error = %e, "Reminder delivery failed");
                            false
                        }
                        Err(_) => {
                            warn!(user_id = *target, "Reminder delivery timed out");
                            false
                        }
                    }
                }
            })
        });
        join_all(sends).await.into_iter().filter(|ok| !ok).count()
    }

    /// Drives [`tick`](Self::tick) on the configured interval until `shutdown` is cancelled.
    /// Tick errors are logged and the loop continues.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "Reminder scheduler started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reminder scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Reminder tick failed");
                    }
                }
            }
        }
    }
}

/// `scheduled_at - lead`, clamped to the earliest representable instant.
fn lead_instant(scheduled_at: DateTime<Utc>, lead: Duration) -> DateTime<Utc> {
    scheduled_at
        .checked_sub_signed(lead)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn when(record: &ScheduleRecord) -> String {
    record.scheduled_at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn lead_message(record: &ScheduleRecord, lead: Duration) -> String {
    match record.kind {
        RecordKind::Exam => format!(
            "Reminder ({}): exam \"{}\" starts at {}.",
            format_lead(lead),
            record.title,
            when(record)
        ),
        RecordKind::ReportDeadline => format!(
            "Reminder ({}): report \"{}\" is due at {}. Submit it with /report.",
            format_lead(lead),
            record.title,
            when(record)
        ),
    }
}
