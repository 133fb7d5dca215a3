//! Conversation engine: a finite-state machine per user, persisted through the session store.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use classbot_core::{InboundEvent, KeyboardRef, OutboundIntent, Role, UserId};
use dashmap::DashMap;
use permission_gate::{Action, PermissionGate};
use reminder::ReminderScheduler;
use storage::{Session, StorageError, Store};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::WorkflowError;
use crate::field::{format_when, parse_answer, parse_id, Answer};
use crate::state::{ConvState, Field, Workflow};

/// Field values and labels collected so far, keyed by [`Field::key`] and [`Field::label_key`].
pub type StepData = BTreeMap<String, String>;

const IDLE_HINT: &str = "I am not waiting for anything right now. Send /help to see what you can do.";
const BUSY_HINT: &str = "Finish the current step or send /cancel first.";
const ANSWER_HINT: &str = "Please answer yes or no.";
const PREVIEW_LEN: usize = 60;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Inactivity after which a half-finished workflow is abandoned.
    pub session_timeout: chrono::Duration,
    /// Upper bound for every storage call made during a transition.
    pub storage_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_timeout: chrono::Duration::minutes(30),
            storage_timeout: Duration::from_secs(3),
        }
    }
}

/// What a transition does with the stored session.
enum Next {
    /// Leave storage alone (used when storage itself is failing).
    Untouched,
    /// Keep state and data; refresh activity.
    Stay,
    Go(ConvState, StepData),
    /// The step already wrote the session itself.
    Persisted,
}

struct Step {
    next: Next,
    intents: Vec<OutboundIntent>,
}

impl Step {
    fn stay(intents: Vec<OutboundIntent>) -> Self {
        Self {
            next: Next::Stay,
            intents,
        }
    }

    fn go(state: ConvState, data: StepData, intents: Vec<OutboundIntent>) -> Self {
        Self {
            next: Next::Go(state, data),
            intents,
        }
    }

    fn idle(intents: Vec<OutboundIntent>) -> Self {
        Self::go(ConvState::Idle, StepData::new(), intents)
    }

    fn untouched(intents: Vec<OutboundIntent>) -> Self {
        Self {
            next: Next::Untouched,
            intents,
        }
    }

    fn persisted(intents: Vec<OutboundIntent>) -> Self {
        Self {
            next: Next::Persisted,
            intents,
        }
    }
}

/// Drives every user's workflows. Transitions for one user are serialized by a per-user lock;
/// different users proceed concurrently.
pub struct ConversationEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) gate: Arc<PermissionGate>,
    pub(crate) scheduler: Arc<ReminderScheduler>,
    config: EngineConfig,
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        gate: Arc<PermissionGate>,
        scheduler: Arc<ReminderScheduler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            gate,
            scheduler,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Users whose per-user lock is currently held or awaited.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    pub async fn handle_event(&self, event: &InboundEvent) -> Vec<OutboundIntent> {
        self.handle_event_at(event, Utc::now()).await
    }

    /// Applies one event at `now` and returns the intents to deliver. Never fails: every error
    /// path ends in a defined state plus an error intent.
    pub async fn handle_event_at(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Vec<OutboundIntent> {
        let user_id = event.user_id();
        let lock = self.locks.entry(user_id).or_default().clone();
        let intents = {
            let _guard = lock.lock().await;
            self.transition(event, now).await
        };
        drop(lock);
        // Only the map still holds it: nobody is waiting for this user.
        self.locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);
        intents
    }

    async fn transition(&self, event: &InboundEvent, now: DateTime<Utc>) -> Vec<OutboundIntent> {
        let user_id = event.user_id();
        let (state, data, stored_active) = match self.restore(user_id, now).await {
            Ok(restored) => restored,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to load session");
                return vec![OutboundIntent::error(user_id, e.user_message())];
            }
        };
        debug!(user_id, state = %state.tag(), payload = %event.payload, "Handling event");

        let step = match state {
            ConvState::Idle => self.on_idle(event, now).await,
            ConvState::Awaiting(workflow, field) => {
                self.on_awaiting(workflow, field, data.clone(), event, now)
                    .await
            }
            ConvState::Confirming(workflow) => {
                self.on_confirming(workflow, data.clone(), event, now).await
            }
        };

        let Step { next, mut intents } = step;
        let (next_state, next_data) = match next {
            Next::Untouched | Next::Persisted => return intents,
            Next::Stay => (state, data),
            Next::Go(next_state, next_data) => (next_state, next_data),
        };
        if next_state.is_idle() && !stored_active {
            return intents;
        }
        if let Err(e) = self.persist(user_id, next_state, next_data, now).await {
            intents.push(OutboundIntent::error(user_id, e.user_message()));
        }
        intents
    }

    /// Writes the session under the storage timeout.
    async fn persist(
        &self,
        user_id: UserId,
        state: ConvState,
        data: StepData,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let session = Session {
            user_id,
            state: state.tag(),
            data,
            last_activity: now,
        };
        self.bounded(self.store.save_session(&session))
            .await
            .map_err(|e| {
                warn!(user_id, state = %session.state, error = %e, "Failed to save session");
                e
            })
    }

    /// Loads the stored session. Unrecognised tags, undecodable data and expired sessions come
    /// back as idle with `stored_active = true` so the reset gets persisted.
    async fn restore(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(ConvState, StepData, bool), WorkflowError> {
        let loaded = self
            .bounded(async { Ok::<_, WorkflowError>(self.store.load_session(user_id).await) })
            .await?;
        let session = match loaded {
            Ok(Some(session)) if !session.is_idle() => session,
            Ok(_) => return Ok((ConvState::Idle, StepData::new(), false)),
            Err(StorageError::Corrupt(reason)) => {
                warn!(user_id, reason = %reason, "Unreadable session, resetting to idle");
                return Ok((ConvState::Idle, StepData::new(), true));
            }
            Err(e) => return Err(e.into()),
        };
        let Some(state) = ConvState::from_tag(&session.state) else {
            warn!(user_id, state = %session.state, "Unrecognised session state, resetting to idle");
            return Ok((ConvState::Idle, StepData::new(), true));
        };
        if now - session.last_activity > self.config.session_timeout {
            info!(user_id, state = %session.state, last_activity = %session.last_activity, "Session expired, starting from idle");
            return Ok((ConvState::Idle, StepData::new(), true));
        }
        Ok((state, session.data, true))
    }

    async fn on_idle(&self, event: &InboundEvent, now: DateTime<Utc>) -> Step {
        let user_id = event.user_id();
        let Some(command) = event.command_name() else {
            return Step::stay(vec![OutboundIntent::prompt(user_id, IDLE_HINT)]);
        };
        let result = match command.as_str() {
            "cancel" => Ok(OutboundIntent::prompt(user_id, "Nothing to cancel.")),
            "start" | "help" => self.help(user_id).await,
            "whoami" => self.whoami(event).await,
            "myschedule" => self.my_schedule(user_id, now).await,
            "submissions" => self.submissions(user_id, event.command_args()).await,
            name => match Workflow::from_command(name) {
                Some(workflow) => return self.start_workflow(workflow, user_id).await,
                None => Ok(OutboundIntent::error(
                    user_id,
                    format!("Unknown command /{}. Send /help to see what you can do.", name),
                )),
            },
        };
        match result {
            Ok(intent) => Step::stay(vec![intent]),
            Err(e @ WorkflowError::TransientStorage(_)) => {
                Step::untouched(vec![OutboundIntent::error(user_id, e.user_message())])
            }
            Err(e) => Step::stay(vec![OutboundIntent::error(user_id, e.user_message())]),
        }
    }

    async fn start_workflow(&self, workflow: Workflow, user_id: UserId) -> Step {
        let action = workflow.action();
        match self.check(self.gate.authorize(user_id, action), action).await {
            Ok(()) => {}
            Err(e @ WorkflowError::TransientStorage(_)) => {
                return Step::untouched(vec![OutboundIntent::error(user_id, e.user_message())])
            }
            Err(e) => return Step::stay(vec![OutboundIntent::error(user_id, e.user_message())]),
        }
        info!(user_id, workflow = %workflow, "step: workflow started");
        let data = StepData::new();
        let field = workflow.first_field();
        let prompt = self.prompt_for(workflow, field, user_id, &data).await;
        Step::go(ConvState::Awaiting(workflow, field), data, vec![prompt])
    }

    async fn on_awaiting(
        &self,
        workflow: Workflow,
        field: Field,
        mut data: StepData,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Step {
        let user_id = event.user_id();
        match event.command_name().as_deref() {
            Some("cancel") => return cancelled(user_id, workflow),
            Some(_) => {
                let prompt = self.prompt_for(workflow, field, user_id, &data).await;
                return Step::stay(vec![OutboundIntent::error(user_id, BUSY_HINT), prompt]);
            }
            None => {}
        }

        let resolved = self
            .resolve_field(workflow, field, &event.payload, &data, user_id, now)
            .await;
        match resolved {
            Ok(resolved) => {
                info!(user_id, workflow = %workflow, field = field.key(), "step: field accepted");
                data.insert(field.key().to_string(), resolved.value);
                data.insert(field.label_key(), resolved.label);
                match workflow.next_field(field) {
                    Some(next) => {
                        let prompt = self.prompt_for(workflow, next, user_id, &data).await;
                        Step::go(ConvState::Awaiting(workflow, next), data, vec![prompt])
                    }
                    None => {
                        let prompt = confirm_prompt(workflow, user_id, &data);
                        Step::go(ConvState::Confirming(workflow), data, vec![prompt])
                    }
                }
            }
            Err(error @ WorkflowError::Validation { .. }) => {
                debug!(user_id, workflow = %workflow, field = field.key(), error = %error, "Invalid input");
                let prompt = self.prompt_for(workflow, field, user_id, &data).await;
                Step::stay(vec![OutboundIntent::error(user_id, error.user_message()), prompt])
            }
            Err(e) => fail(user_id, workflow, e),
        }
    }

    async fn on_confirming(
        &self,
        workflow: Workflow,
        data: StepData,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Step {
        let user_id = event.user_id();
        match event.command_name().as_deref() {
            Some("cancel") => return cancelled(user_id, workflow),
            Some(_) => {
                let prompt = confirm_prompt(workflow, user_id, &data);
                return Step::stay(vec![OutboundIntent::error(user_id, BUSY_HINT), prompt]);
            }
            None => {}
        }

        match parse_answer(&event.payload) {
            Some(Answer::No) => cancelled(user_id, workflow),
            None => {
                let prompt = confirm_prompt(workflow, user_id, &data);
                Step::stay(vec![OutboundIntent::error(user_id, ANSWER_HINT), prompt])
            }
            Some(Answer::Yes) => self.confirm(workflow, user_id, data, now).await,
        }
    }

    /// Leaves Confirm before the mutation runs, so a lost session write can never replay it.
    /// A transient failure of the mutation itself puts the Confirm step back.
    async fn confirm(
        &self,
        workflow: Workflow,
        user_id: UserId,
        data: StepData,
        now: DateTime<Utc>,
    ) -> Step {
        if let Err(e) = self.persist(user_id, ConvState::Idle, StepData::new(), now).await {
            return fail(user_id, workflow, e);
        }
        match self.commit(workflow, user_id, &data, now).await {
            Ok(intents) => {
                info!(user_id, workflow = %workflow, "step: workflow committed");
                Step::persisted(intents)
            }
            Err(e @ WorkflowError::TransientStorage(_)) => {
                warn!(user_id, workflow = %workflow, error = %e, "Transient failure at confirm, restoring the step");
                let mut intents = vec![OutboundIntent::error(user_id, e.user_message())];
                let restored = self
                    .persist(user_id, ConvState::Confirming(workflow), data.clone(), now)
                    .await;
                if restored.is_ok() {
                    intents.push(confirm_prompt(workflow, user_id, &data));
                } else {
                    intents.push(OutboundIntent::error(
                        user_id,
                        format!("Start again with /{} when the service is back.", workflow.command()),
                    ));
                }
                Step::persisted(intents)
            }
            Err(e) => {
                info!(user_id, workflow = %workflow, error = %e, "step: workflow aborted");
                Step::persisted(vec![OutboundIntent::error(user_id, e.user_message())])
            }
        }
    }

    /// Prompt for `field` with choices looked up from the store when the field has any.
    async fn prompt_for(
        &self,
        workflow: Workflow,
        field: Field,
        user_id: UserId,
        data: &StepData,
    ) -> OutboundIntent {
        let intent = OutboundIntent::prompt(user_id, field.prompt());
        let choices = self.choices(workflow, field, user_id, data).await;
        if choices.is_empty() {
            intent
        } else {
            intent.with_keyboard(KeyboardRef::Choices(choices))
        }
    }

    /// Runs a storage future under the storage timeout.
    pub(crate) async fn bounded<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, WorkflowError>
    where
        E: Into<WorkflowError>,
    {
        match tokio::time::timeout(self.config.storage_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(WorkflowError::TransientStorage(format!(
                "storage call exceeded {:?}",
                self.config.storage_timeout
            ))),
        }
    }

    /// Runs a gate decision under the storage timeout; a denial becomes `PermissionDenied`.
    pub(crate) async fn check(
        &self,
        decision: impl Future<Output = bool>,
        action: Action,
    ) -> Result<(), WorkflowError> {
        match tokio::time::timeout(self.config.storage_timeout, decision).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(WorkflowError::PermissionDenied(action)),
            Err(_) => Err(WorkflowError::TransientStorage(
                "permission lookup timed out".to_string(),
            )),
        }
    }

    /// Effective role under the storage timeout.
    pub(crate) async fn role_of(&self, user_id: UserId) -> Result<Option<Role>, WorkflowError> {
        tokio::time::timeout(self.config.storage_timeout, self.gate.resolve_role(user_id))
            .await
            .map_err(|_| WorkflowError::TransientStorage("role lookup timed out".to_string()))
    }

    async fn help(&self, user_id: UserId) -> Result<OutboundIntent, WorkflowError> {
        let permitted = tokio::time::timeout(
            self.config.storage_timeout,
            self.gate.permitted(user_id),
        )
        .await
        .map_err(|_| WorkflowError::TransientStorage("permission lookup timed out".to_string()))?;
        if permitted.is_empty() {
            return Ok(OutboundIntent::prompt(
                user_id,
                "You have no permissions here. Contact an administrator.",
            ));
        }
        let mut lines = vec![
            "Available commands:".to_string(),
            "/whoami - Show your role and sections".to_string(),
        ];
        if permitted.contains(&Action::ViewSchedule) {
            lines.push("/myschedule - Upcoming exams and report deadlines".to_string());
        }
        if permitted.contains(&Action::ViewReports) {
            lines.push("/submissions <record id> - Reports submitted for a deadline".to_string());
        }
        lines.extend(
            Workflow::ALL
                .iter()
                .filter(|w| permitted.contains(&w.action()))
                .map(|w| format!("/{} - {}", w.command(), w.description())),
        );
        lines.push("/cancel - Abandon the current step".to_string());
        Ok(OutboundIntent::prompt(user_id, lines.join("\n")))
    }

    async fn whoami(&self, event: &InboundEvent) -> Result<OutboundIntent, WorkflowError> {
        let user_id = event.user_id();
        let role = self.role_of(user_id).await?;
        let record = self.bounded(self.store.get_user(user_id)).await?;
        let sections = self.bounded(self.store.sections_for_user(user_id)).await?;

        let name = record
            .map(|u| u.full_name)
            .unwrap_or_else(|| event.user.display_name());
        let role = role.map_or_else(|| "none".to_string(), |r| r.to_string());
        let sections = if sections.is_empty() {
            "none".to_string()
        } else {
            sections
                .iter()
                .map(|s| format!("{} (#{})", s.name, s.id))
                .collect::<Vec<_>>()
                .join(", ")
        };
        Ok(OutboundIntent::confirmation(
            user_id,
            format!("{} (id {})\nRole: {}\nSections: {}", name, user_id, role, sections),
        ))
    }

    async fn my_schedule(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<OutboundIntent, WorkflowError> {
        self.check(
            self.gate.authorize(user_id, Action::ViewSchedule),
            Action::ViewSchedule,
        )
        .await?;
        let sections = self.bounded(self.store.sections_for_user(user_id)).await?;
        let mut upcoming = Vec::new();
        for section in &sections {
            let records = self.bounded(self.store.list_records(section.id)).await?;
            upcoming.extend(
                records
                    .into_iter()
                    .filter(|r| r.is_open() && r.scheduled_at > now)
                    .map(|r| (r, section.name.clone())),
            );
        }
        if upcoming.is_empty() {
            return Ok(OutboundIntent::confirmation(
                user_id,
                "No upcoming exams or report deadlines.",
            ));
        }
        upcoming.sort_by_key(|(r, _)| (r.scheduled_at, r.id));
        let lines: Vec<String> = upcoming
            .iter()
            .map(|(r, section)| {
                format!(
                    "#{} {} \"{}\" - {} (section {})",
                    r.id,
                    r.kind,
                    r.title,
                    format_when(r.scheduled_at),
                    section
                )
            })
            .collect();
        Ok(OutboundIntent::confirmation(
            user_id,
            format!("Upcoming:\n{}", lines.join("\n")),
        ))
    }

    /// `/submissions <record id>`: read-only, gated by ViewReports on the record's section.
    async fn submissions(
        &self,
        user_id: UserId,
        args: &str,
    ) -> Result<OutboundIntent, WorkflowError> {
        let Ok(record_id) = parse_id(Field::Record, args) else {
            return Ok(OutboundIntent::error(user_id, "Usage: /submissions <record id>"));
        };
        let Some(record) = self.bounded(self.store.get_record(record_id)).await? else {
            return Ok(OutboundIntent::error(user_id, format!("No record #{}.", record_id)));
        };
        let section = self
            .bounded(self.store.get_section(record.section_id))
            .await?
            .ok_or_else(|| WorkflowError::Conflict("the section no longer exists".to_string()))?;
        self.check(
            self.gate
                .authorize_in_section(user_id, Action::ViewReports, &section),
            Action::ViewReports,
        )
        .await?;

        let submissions = self.bounded(self.store.list_submissions(record.id)).await?;
        let mut lines = vec![format!(
            "Submissions for \"{}\": {}/{}",
            record.title,
            submissions.len(),
            section.roster.len()
        )];
        for submission in &submissions {
            let name = match self.bounded(self.store.get_user(submission.user_id)).await? {
                Some(user) => user.full_name,
                None => format!("User {}", submission.user_id),
            };
            lines.push(format!("- {}: {}", name, preview(&submission.body)));
        }
        Ok(OutboundIntent::confirmation(user_id, lines.join("\n")))
    }
}

fn cancelled(user_id: UserId, workflow: Workflow) -> Step {
    info!(user_id, workflow = %workflow, "step: workflow cancelled");
    Step::idle(vec![OutboundIntent::confirmation(user_id, "Cancelled.")])
}

/// Non-validation failure: transient errors keep the session, everything else resets it.
fn fail(user_id: UserId, workflow: Workflow, error: WorkflowError) -> Step {
    let intent = OutboundIntent::error(user_id, error.user_message());
    match error {
        WorkflowError::TransientStorage(reason) => {
            warn!(user_id, workflow = %workflow, reason = %reason, "Transient storage failure, session kept");
            Step::untouched(vec![intent])
        }
        other => {
            info!(user_id, workflow = %workflow, error = %other, "step: workflow aborted");
            Step::idle(vec![intent])
        }
    }
}

fn confirm_prompt(workflow: Workflow, user_id: UserId, data: &StepData) -> OutboundIntent {
    let mut lines = vec![format!("Please confirm: {}.", workflow.description())];
    for field in workflow.fields() {
        let value = data
            .get(&field.label_key())
            .or_else(|| data.get(field.key()))
            .map(String::as_str)
            .unwrap_or("-");
        lines.push(format!("{}: {}", field.label(), value));
    }
    lines.push("Reply yes or no.".to_string());
    OutboundIntent::prompt(user_id, lines.join("\n")).with_keyboard(KeyboardRef::ConfirmCancel)
}

/// First line of `text`, shortened for listings.
pub(crate) fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > PREVIEW_LEN || line.len() < text.trim_end().len() {
        let short: String = line.chars().take(PREVIEW_LEN).collect();
        format!("{}...", short)
    } else {
        line.to_string()
    }
}
