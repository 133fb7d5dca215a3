//! Integration tests for [`conversation::ConversationEngine`] and [`conversation::ConversationHandler`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use classbot_core::{
    Bot, Handler, HandlerResponse, InboundEvent, IntentKind, KeyboardRef, OutboundIntent, Role,
    User, UserId,
};
use conversation::{ConversationEngine, ConversationHandler, EngineConfig, Field, Workflow};
use permission_gate::{role_permits, PermissionGate, UnknownUserPolicy};
use reminder::{ReminderConfig, ReminderScheduler};
use storage::{
    Course, DirectoryStore, InMemoryStore, JobStore, NewRecord, RecordKind, RecordStore,
    ScheduleRecord, Section, Session, SessionStore, SqliteStore, Store,
};
use tempfile::TempDir;
use tokio::sync::Mutex;

const ROOT: UserId = 1;
const ADMIN: UserId = 2;
const TEACHER: UserId = 10;
const OTHER_TEACHER: UserId = 11;
const STUDENT: UserId = 100;
const NEWBIE: UserId = 101;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, 8, 0, 0).unwrap()
}

struct NullBot;

#[async_trait]
impl Bot for NullBot {
    async fn send_intent(&self, _target: UserId, _intent: &OutboundIntent) -> classbot_core::Result<()> {
        Ok(())
    }
}

/// Records every delivered (target, intent) pair.
#[derive(Default)]
struct RecordingBot {
    sent: Mutex<Vec<(UserId, OutboundIntent)>>,
}

impl RecordingBot {
    async fn sent_to(&self, user: UserId) -> Vec<OutboundIntent> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, i)| i.clone())
            .collect()
    }
}

#[async_trait]
impl Bot for RecordingBot {
    async fn send_intent(&self, target: UserId, intent: &OutboundIntent) -> classbot_core::Result<()> {
        self.sent.lock().await.push((target, intent.clone()));
        Ok(())
    }
}

struct Seed {
    course: Course,
    section: Section,
    report: ScheduleRecord,
}

async fn seed(store: &dyn Store) -> Seed {
    let users = [
        (ROOT, "Root", Role::SuperAdmin),
        (ADMIN, "Ada Admin", Role::Admin),
        (TEACHER, "Tom Teacher", Role::Instructor),
        (OTHER_TEACHER, "Olga Teacher", Role::Instructor),
        (STUDENT, "Sam Student", Role::Student),
        (NEWBIE, "Nina New", Role::Student),
    ];
    for (id, name, role) in users {
        store.register_user(id, None, name, role).await.unwrap();
    }
    let course = store.create_course("CS101", "Intro to CS").await.unwrap();
    let section = store.create_section(course.id, "A", &[TEACHER]).await.unwrap();
    let section = store.enroll(section.id, STUDENT).await.unwrap();
    let report = store
        .create_record(
            &NewRecord {
                section_id: section.id,
                kind: RecordKind::ReportDeadline,
                title: "Lab 1".to_string(),
                scheduled_at: now() + Duration::days(3),
                created_by: TEACHER,
            },
            0,
            None,
        )
        .await
        .unwrap();
    Seed {
        course,
        section,
        report,
    }
}

fn engine_for(store: Arc<dyn Store>, config: EngineConfig) -> ConversationEngine {
    let gate = Arc::new(PermissionGate::new(
        store.clone(),
        UnknownUserPolicy::Student,
        [ROOT],
    ));
    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        Arc::new(NullBot),
        ReminderConfig::default(),
    ));
    ConversationEngine::new(store, gate, scheduler, config)
}

async fn setup() -> (Arc<InMemoryStore>, ConversationEngine, Seed) {
    let store = Arc::new(InMemoryStore::new());
    let seed = seed(store.as_ref()).await;
    let engine = engine_for(store.clone(), EngineConfig::default());
    (store, engine, seed)
}

fn event(user: UserId, payload: &str) -> InboundEvent {
    if payload.starts_with('/') {
        InboundEvent::command(User::with_id(user), payload)
    } else {
        InboundEvent::text(User::with_id(user), payload)
    }
}

async fn send(engine: &ConversationEngine, user: UserId, payload: &str) -> Vec<OutboundIntent> {
    engine.handle_event_at(&event(user, payload), now()).await
}

async fn state_of(store: &dyn Store, user: UserId) -> String {
    store
        .load_session(user)
        .await
        .unwrap()
        .map(|s| s.state)
        .unwrap_or_else(|| "idle".to_string())
}

/// **Test: Enrollment from a fresh session, with one invalid course code on the way.**
///
/// **Setup:** Seeded store; the student has no session.
/// **Action:** /enroll, bad code, valid code, section, yes.
/// **Expected:** Same prompt after the bad code; enrollment created; session back to idle.
#[tokio::test]
async fn test_enroll_scenario() {
    let (store, engine, seed) = setup().await;

    let first = send(&engine, NEWBIE, "/enroll").await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].kind, IntentKind::Prompt);
    assert_eq!(first[0].content, Field::Course.prompt());
    assert_eq!(
        first[0].keyboard,
        Some(KeyboardRef::Choices(vec!["CS101".to_string()]))
    );
    assert_eq!(state_of(store.as_ref(), NEWBIE).await, "enroll:course");

    let rejected = send(&engine, NEWBIE, "MATH9").await;
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0].kind, IntentKind::Error);
    assert_eq!(rejected[1], first[0]);
    assert_eq!(state_of(store.as_ref(), NEWBIE).await, "enroll:course");

    let section_prompt = send(&engine, NEWBIE, "cs101").await;
    assert_eq!(section_prompt[0].content, Field::Section.prompt());
    assert_eq!(state_of(store.as_ref(), NEWBIE).await, "enroll:section");

    let confirm = send(&engine, NEWBIE, "a").await;
    assert_eq!(confirm[0].keyboard, Some(KeyboardRef::ConfirmCancel));
    assert!(confirm[0].content.contains("CS101 / A"));
    assert_eq!(state_of(store.as_ref(), NEWBIE).await, "enroll:confirm");

    let done = send(&engine, NEWBIE, "yes").await;
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].kind, IntentKind::Confirmation);
    assert_eq!(done[0].targets, vec![NEWBIE]);

    let section = store.get_section(seed.section.id).await.unwrap().unwrap();
    assert_eq!(section.roster, vec![STUDENT, NEWBIE]);
    let session = store.load_session(NEWBIE).await.unwrap().unwrap();
    assert!(session.is_idle());
    assert!(session.data.is_empty());
}

/// **Test: /cancel from every step of every workflow returns to idle without side effects.**
#[tokio::test]
async fn test_cancel_from_every_step() {
    let (store, engine, seed) = setup().await;
    let report_id = seed.report.id.to_string();
    let report_id = report_id.as_str();

    let cases: Vec<(UserId, &str, Vec<&str>)> = vec![
        (NEWBIE, "/enroll", vec!["CS101", "A"]),
        (ROOT, "/enrollstudent", vec!["CS101", "A", "101"]),
        (ROOT, "/unenroll", vec!["CS101", "A", "100"]),
        (STUDENT, "/report", vec!["A", "Lab 1", "My findings"]),
        (
            TEACHER,
            "/schedule",
            vec!["CS101", "A", "exam", "Midterm", "2030-07-01 09:00"],
        ),
        (TEACHER, "/reschedule", vec![report_id, "2030-07-02 09:00"]),
        (TEACHER, "/close", vec![report_id]),
        (ADMIN, "/newcourse", vec!["BIO2", "Biology"]),
        (ADMIN, "/archivecourse", vec!["CS101"]),
        (ADMIN, "/newsection", vec!["CS101", "B", "10"]),
        (ADMIN, "/setrole", vec!["100", "instructor"]),
        (ADMIN, "/deactivate", vec!["100"]),
    ];

    for (user, command, inputs) in &cases {
        for k in 0..=inputs.len() {
            let started = send(&engine, *user, command).await;
            assert_eq!(started[0].kind, IntentKind::Prompt, "{} did not start", command);
            for input in &inputs[..k] {
                let reply = send(&engine, *user, input).await;
                assert_eq!(
                    reply[0].kind,
                    IntentKind::Prompt,
                    "{} rejected {:?}: {}",
                    command,
                    input,
                    reply[0].content
                );
            }
            let cancelled = send(&engine, *user, "/cancel").await;
            assert_eq!(cancelled, vec![OutboundIntent::confirmation(*user, "Cancelled.")]);
            let session = store.load_session(*user).await.unwrap().unwrap();
            assert!(session.is_idle(), "{} step {} not idle", command, k);
            assert!(session.data.is_empty());
        }
    }

    assert_eq!(store.list_courses(true).await.unwrap().len(), 1);
    let course = store.find_course_by_code("CS101").await.unwrap().unwrap();
    assert!(!course.archived);
    assert_eq!(store.list_sections(seed.course.id).await.unwrap().len(), 1);
    let section = store.get_section(seed.section.id).await.unwrap().unwrap();
    assert_eq!(section.roster, vec![STUDENT]);
    assert_eq!(store.list_records(seed.section.id).await.unwrap().len(), 1);
    assert!(store.list_submissions(seed.report.id).await.unwrap().is_empty());
    let record = store.get_record(seed.report.id).await.unwrap().unwrap();
    assert_eq!(record.scheduled_at, seed.report.scheduled_at);
    assert!(record.is_open());
    let student = store.get_user(STUDENT).await.unwrap().unwrap();
    assert_eq!(student.role, Role::Student);
    assert!(student.active);
}

/// **Test: Invalid input at any step re-sends the exact same prompt and keeps the state.**
#[tokio::test]
async fn test_invalid_input_never_advances() {
    let (store, engine, _seed) = setup().await;

    let steps: [(&str, &[&str]); 5] = [
        ("CS101", &["NOPE", "12345"]),
        ("A", &["Z"]),
        ("exam", &["quiz"]),
        ("Midterm", &["   "]),
        ("2030-07-01 09:00", &["tomorrow", "2020-01-01 10:00", "2030-06-01 08:00"]),
    ];

    let mut prompt = send(&engine, TEACHER, "/schedule").await.remove(0);
    for (valid, invalid) in steps {
        let state = state_of(store.as_ref(), TEACHER).await;
        for bad in invalid {
            let reply = send(&engine, TEACHER, bad).await;
            assert_eq!(reply.len(), 2, "input {:?}", bad);
            assert_eq!(reply[0].kind, IntentKind::Error);
            assert_eq!(reply[1], prompt);
            assert_eq!(state_of(store.as_ref(), TEACHER).await, state);
        }
        prompt = send(&engine, TEACHER, valid).await.remove(0);
    }
    assert_eq!(state_of(store.as_ref(), TEACHER).await, "schedule:confirm");
}

/// **Test: A denied action never starts, and never leaves a session behind.**
#[tokio::test]
async fn test_denied_workflow_does_not_start() {
    let (store, engine, _seed) = setup().await;

    let reply = send(&engine, STUDENT, "/newcourse").await;
    assert_eq!(
        reply,
        vec![OutboundIntent::error(STUDENT, "You are not allowed to manage course.")]
    );
    assert!(store.load_session(STUDENT).await.unwrap().is_none());

    let reply = send(&engine, TEACHER, "/setrole").await;
    assert_eq!(reply[0].kind, IntentKind::Error);
    assert_eq!(state_of(store.as_ref(), TEACHER).await, "idle");
}

/// **Test: Instructors can only pick sections they teach.**
#[tokio::test]
async fn test_instructor_limited_to_own_sections() {
    let (store, engine, _seed) = setup().await;

    send(&engine, OTHER_TEACHER, "/schedule").await;
    let section_prompt = send(&engine, OTHER_TEACHER, "CS101").await;
    assert_eq!(section_prompt[0].keyboard, None);

    let reply = send(&engine, OTHER_TEACHER, "A").await;
    assert_eq!(reply[0].kind, IntentKind::Error);
    assert!(reply[0].content.contains("you do not teach this section"));
    assert_eq!(
        state_of(store.as_ref(), OTHER_TEACHER).await,
        "schedule:section"
    );
}

/// **Test: Permission is checked again at confirm; a revoked role stops the mutation.**
#[tokio::test]
async fn test_revoked_permission_blocks_commit() {
    let (store, engine, _seed) = setup().await;

    send(&engine, ADMIN, "/newcourse").await;
    send(&engine, ADMIN, "BIO2").await;
    send(&engine, ADMIN, "Biology").await;
    store.set_role(ADMIN, Role::Student).await.unwrap();

    let reply = send(&engine, ADMIN, "yes").await;
    assert_eq!(
        reply,
        vec![OutboundIntent::error(ADMIN, "You are not allowed to manage course.")]
    );
    assert!(store.find_course_by_code("BIO2").await.unwrap().is_none());
    assert_eq!(state_of(store.as_ref(), ADMIN).await, "idle");
}

/// **Test: Granting admin needs ManageAdmins; a super-admin may change roles.**
#[tokio::test]
async fn test_role_changes_respect_grant_rules() {
    let (store, engine, _seed) = setup().await;

    for input in ["/setrole", "100", "admin"] {
        send(&engine, ADMIN, input).await;
    }
    let reply = send(&engine, ADMIN, "yes").await;
    assert_eq!(reply[0].kind, IntentKind::Error);
    assert_eq!(reply[0].content, "You are not allowed to manage admins.");
    assert_eq!(store.get_user(STUDENT).await.unwrap().unwrap().role, Role::Student);

    for input in ["/setrole", "100", "instructor"] {
        send(&engine, ROOT, input).await;
    }
    let reply = send(&engine, ROOT, "y").await;
    assert_eq!(reply[0].kind, IntentKind::Confirmation);
    assert_eq!(
        store.get_user(STUDENT).await.unwrap().unwrap().role,
        Role::Instructor
    );
}

/// **Test: A rejected mutation (duplicate enrollment) reports failure and resets to idle.**
#[tokio::test]
async fn test_duplicate_enrollment_fails_and_resets() {
    let (store, engine, _seed) = setup().await;

    for input in ["/enroll", "CS101", "A"] {
        send(&engine, STUDENT, input).await;
    }
    let reply = send(&engine, STUDENT, "confirm").await;
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].kind, IntentKind::Error);
    assert!(reply[0].content.contains("already exists"));
    assert_eq!(state_of(store.as_ref(), STUDENT).await, "idle");
}

/// **Test: An abandoned session expires; the next event starts from idle.**
#[tokio::test]
async fn test_inactivity_expiry() {
    let (store, engine, _seed) = setup().await;

    send(&engine, NEWBIE, "/enroll").await;

    let still_fresh = engine
        .handle_event_at(&event(NEWBIE, "CS101"), now() + Duration::minutes(29))
        .await;
    assert_eq!(still_fresh[0].content, Field::Section.prompt());

    let later = now() + Duration::minutes(29) + Duration::minutes(31);
    let reply = engine.handle_event_at(&event(NEWBIE, "A"), later).await;
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].kind, IntentKind::Prompt);
    assert!(reply[0].content.contains("/help"));
    let session = store.load_session(NEWBIE).await.unwrap().unwrap();
    assert!(session.is_idle());
    assert!(session.data.is_empty());
}

/// **Test: An unrecognised stored state tag resets the session to idle.**
#[tokio::test]
async fn test_unknown_state_tag_resets() {
    let (store, engine, _seed) = setup().await;
    let mut session = Session::idle(NEWBIE, now());
    session.state = "enroll:banana".to_string();
    session.data.insert("course".to_string(), "1".to_string());
    store.save_session(&session).await.unwrap();

    let reply = send(&engine, NEWBIE, "A").await;
    assert_eq!(reply[0].kind, IntentKind::Prompt);
    let session = store.load_session(NEWBIE).await.unwrap().unwrap();
    assert!(session.is_idle());
    assert!(session.data.is_empty());
}

/// **Test: Other commands during a workflow are rejected with the current prompt repeated.**
#[tokio::test]
async fn test_commands_rejected_mid_workflow() {
    let (store, engine, _seed) = setup().await;

    let prompt = send(&engine, NEWBIE, "/enroll").await.remove(0);
    let reply = send(&engine, NEWBIE, "/help").await;
    assert_eq!(reply.len(), 2);
    assert_eq!(reply[0].kind, IntentKind::Error);
    assert_eq!(reply[1], prompt);
    assert_eq!(state_of(store.as_ref(), NEWBIE).await, "enroll:course");
}

/// **Test: Confirm re-prompts on unclear answers and cancels on "no".**
#[tokio::test]
async fn test_confirm_answers() {
    let (store, engine, seed) = setup().await;

    for input in ["/enroll", "CS101", "A"] {
        send(&engine, NEWBIE, input).await;
    }
    let reply = send(&engine, NEWBIE, "maybe").await;
    assert_eq!(reply[0].kind, IntentKind::Error);
    assert_eq!(reply[1].keyboard, Some(KeyboardRef::ConfirmCancel));
    assert_eq!(state_of(store.as_ref(), NEWBIE).await, "enroll:confirm");

    let reply = send(&engine, NEWBIE, "no").await;
    assert_eq!(reply, vec![OutboundIntent::confirmation(NEWBIE, "Cancelled.")]);
    let section = store.get_section(seed.section.id).await.unwrap().unwrap();
    assert!(!section.is_enrolled(NEWBIE));
}

/// **Test: Scheduling through the engine creates the record and its first reminder job.**
#[tokio::test]
async fn test_schedule_creates_record_and_job() {
    let (store, engine, seed) = setup().await;

    for input in ["/schedule", "CS101", "A", "exam", "Midterm", "2030-06-03 09:00"] {
        send(&engine, TEACHER, input).await;
    }
    let reply = send(&engine, TEACHER, "yes").await;
    assert_eq!(reply[0].kind, IntentKind::Confirmation);
    assert!(reply[0].content.contains("24h before, 1h before"));

    let records = store.list_records(seed.section.id).await.unwrap();
    let exam = records
        .iter()
        .find(|r| r.title == "Midterm")
        .expect("exam created");
    assert_eq!(exam.kind, RecordKind::Exam);
    assert_eq!(exam.created_by, TEACHER);
    let job = store.get_job(exam.id).await.unwrap().expect("job created");
    assert_eq!(job.next_fire_at, exam.scheduled_at - Duration::hours(24));
}

/// **Test: Rescheduling and closing go through the scheduler.**
#[tokio::test]
async fn test_reschedule_and_close() {
    let (store, engine, seed) = setup().await;
    let id = seed.report.id.to_string();

    for input in ["/reschedule", id.as_str(), "2030-06-10 12:00"] {
        send(&engine, TEACHER, input).await;
    }
    let reply = send(&engine, TEACHER, "yes").await;
    assert_eq!(reply[0].kind, IntentKind::Confirmation);
    let record = store.get_record(seed.report.id).await.unwrap().unwrap();
    assert_eq!(record.scheduled_at, Utc.with_ymd_and_hms(2030, 6, 10, 12, 0, 0).unwrap());
    assert!(store.get_job(seed.report.id).await.unwrap().is_some());

    for input in ["/close", id.as_str()] {
        send(&engine, TEACHER, input).await;
    }
    let reply = send(&engine, TEACHER, "yes").await;
    assert_eq!(reply[0].kind, IntentKind::Confirmation);
    let record = store.get_record(seed.report.id).await.unwrap().unwrap();
    assert!(!record.is_open());
    assert!(store.get_job(seed.report.id).await.unwrap().is_none());
}

/// **Test: Report submission, then /submissions gated by section scope.**
#[tokio::test]
async fn test_submit_report_and_view_submissions() {
    let (store, engine, seed) = setup().await;

    let prompt = send(&engine, STUDENT, "/report").await;
    assert_eq!(
        prompt[0].keyboard,
        Some(KeyboardRef::Choices(vec!["A".to_string()]))
    );
    for input in ["A", "lab 1", "Results attached"] {
        send(&engine, STUDENT, input).await;
    }
    let reply = send(&engine, STUDENT, "yes").await;
    assert_eq!(reply[0].kind, IntentKind::Confirmation);
    assert_eq!(store.list_submissions(seed.report.id).await.unwrap().len(), 1);

    let command = format!("/submissions {}", seed.report.id);
    let reply = send(&engine, TEACHER, &command).await;
    assert_eq!(reply[0].kind, IntentKind::Confirmation);
    assert!(reply[0].content.contains("1/1"));
    assert!(reply[0].content.contains("Sam Student: Results attached"));

    let reply = send(&engine, OTHER_TEACHER, &command).await;
    assert_eq!(reply[0].kind, IntentKind::Error);
    let reply = send(&engine, STUDENT, &command).await;
    assert_eq!(reply[0].content, "You are not allowed to view reports.");
    assert_eq!(state_of(store.as_ref(), STUDENT).await, "idle");
}

/// **Test: Read-only commands reflect the sender's role and sections.**
#[tokio::test]
async fn test_read_only_commands() {
    let (_store, engine, _seed) = setup().await;

    let help = send(&engine, STUDENT, "/help").await.remove(0);
    assert!(help.content.contains("/enroll"));
    assert!(help.content.contains("/report"));
    assert!(!help.content.contains("/newcourse"));

    let help = send(&engine, ADMIN, "/start").await.remove(0);
    assert!(help.content.contains("/newcourse"));
    assert!(help.content.contains("/submissions"));

    let schedule = send(&engine, STUDENT, "/myschedule").await.remove(0);
    assert!(schedule.content.contains("Lab 1"));
    let schedule = send(&engine, NEWBIE, "/myschedule").await.remove(0);
    assert_eq!(schedule.content, "No upcoming exams or report deadlines.");

    let me = send(&engine, ROOT, "/whoami").await.remove(0);
    assert!(me.content.contains("Role: superadmin"));

    let unknown = send(&engine, STUDENT, "/dance").await.remove(0);
    assert_eq!(unknown.kind, IntentKind::Error);
    let hint = send(&engine, STUDENT, "hello").await.remove(0);
    assert!(hint.content.contains("/help"));
}

/// **Test: A slow store yields a transient error and leaves the stored session untouched.**
#[tokio::test]
async fn test_storage_timeout_preserves_session() {
    let store = InMemoryStore::with_latency(StdDuration::from_millis(200));
    let mut session = Session::idle(NEWBIE, now());
    session.state = "enroll:section".to_string();
    session.data.insert("course".to_string(), "1".to_string());
    store.save_session(&session).await.unwrap();

    let engine = engine_for(
        Arc::new(store.clone()),
        EngineConfig {
            storage_timeout: StdDuration::from_millis(50),
            ..EngineConfig::default()
        },
    );
    let reply = send(&engine, NEWBIE, "A").await;
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].kind, IntentKind::Error);
    assert!(reply[0].content.contains("temporarily unavailable"));

    let stored = store.load_session(NEWBIE).await.unwrap().unwrap();
    assert_eq!(stored, session);
}

/// **Test: A mid-workflow session survives a restart (SQLite).**
#[tokio::test]
async fn test_session_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("classbot.db");
    let path = path.to_str().expect("utf-8 path");

    let section_id = {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(path).await.unwrap());
        let seed = seed(store.as_ref()).await;
        let engine = engine_for(store.clone(), EngineConfig::default());
        send(&engine, NEWBIE, "/enroll").await;
        send(&engine, NEWBIE, "CS101").await;
        assert_eq!(state_of(store.as_ref(), NEWBIE).await, "enroll:section");
        seed.section.id
    };

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(path).await.unwrap());
    let engine = engine_for(store.clone(), EngineConfig::default());
    let confirm = send(&engine, NEWBIE, "A").await;
    assert_eq!(confirm[0].keyboard, Some(KeyboardRef::ConfirmCancel));
    let done = send(&engine, NEWBIE, "yes").await;
    assert_eq!(done[0].kind, IntentKind::Confirmation);

    let section = store.get_section(section_id).await.unwrap().unwrap();
    assert!(section.is_enrolled(NEWBIE));
}

/// **Test: Concurrent events for one user are serialized.**
///
/// **Expected:** One of two simultaneous /enroll events starts the workflow; the other sees it
/// already active and is rejected.
#[tokio::test]
async fn test_same_user_events_are_serialized() {
    let (_store, engine, _seed) = setup().await;

    let a = event(NEWBIE, "/enroll");
    let b = event(NEWBIE, "/enroll");
    let (ra, rb) = tokio::join!(
        engine.handle_event_at(&a, now()),
        engine.handle_event_at(&b, now())
    );
    let mut lengths = vec![ra.len(), rb.len()];
    lengths.sort();
    assert_eq!(lengths, vec![1, 2]);
}

/// **Test: The queued handler answers each user's events in arrival order.**
#[tokio::test]
async fn test_queued_handler_preserves_order() {
    let store = Arc::new(InMemoryStore::new());
    seed(store.as_ref()).await;
    let engine = Arc::new(engine_for(store.clone(), EngineConfig::default()));
    let bot = Arc::new(RecordingBot::default());
    let handler = ConversationHandler::queued(engine, bot.clone());

    for payload in ["/enroll", "CS101", "A", "yes"] {
        let response = handler.handle(&event(NEWBIE, payload)).await.unwrap();
        assert_eq!(response, HandlerResponse::Stop);
    }
    handler.handle(&event(STUDENT, "/whoami")).await.unwrap();

    let mut delivered = Vec::new();
    for _ in 0..100 {
        delivered = bot.sent_to(NEWBIE).await;
        if delivered.len() == 4 && !bot.sent_to(STUDENT).await.is_empty() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    let contents: Vec<&str> = delivered.iter().map(|i| i.content.as_str()).collect();
    assert_eq!(contents[0], Field::Course.prompt());
    assert_eq!(contents[1], Field::Section.prompt());
    assert!(contents[2].starts_with("Please confirm"));
    assert_eq!(delivered[3].kind, IntentKind::Confirmation);
    assert_eq!(bot.sent_to(STUDENT).await.len(), 1);
}

/// **Test: Inline mode returns the intents to the chain instead of delivering them.**
#[tokio::test]
async fn test_inline_handler_replies() {
    let store = Arc::new(InMemoryStore::new());
    seed(store.as_ref()).await;
    let engine = Arc::new(engine_for(store.clone(), EngineConfig::default()));
    let handler = ConversationHandler::inline(engine);

    let response = handler.handle(&event(NEWBIE, "/enroll")).await.unwrap();
    match response {
        HandlerResponse::Reply(intents) => {
            assert_eq!(intents.len(), 1);
            assert_eq!(intents[0].content, Field::Course.prompt());
        }
        other => panic!("expected Reply, got {:?}", other),
    }
}

/// **Test: Every workflow is refused to every role that lacks its action.**
///
/// **Setup:** seeded users for admin, instructor and student.
/// **Action:** each role sends every workflow command its role table does not cover.
/// **Expected:** a permission error naming the action, and no session is left behind.
#[tokio::test]
async fn test_workflows_refused_without_their_action() {
    let (store, engine, _seed) = setup().await;

    let mut refused = 0;
    for (user, role) in [
        (ADMIN, Role::Admin),
        (TEACHER, Role::Instructor),
        (STUDENT, Role::Student),
    ] {
        for workflow in Workflow::ALL {
            let action = workflow.action();
            if role_permits(role, action) {
                continue;
            }
            let reply = send(&engine, user, &format!("/{}", workflow.command())).await;
            let expected = format!("You are not allowed to {}.", action.as_str().replace('_', " "));
            assert_eq!(reply, vec![OutboundIntent::error(user, expected)], "{} {}", role, workflow);
            assert!(
                store.load_session(user).await.unwrap().is_none(),
                "{} {} left a session",
                role,
                workflow
            );
            refused += 1;
        }
    }
    assert!(refused >= Workflow::ALL.len());
}

/// **Test: /myschedule and its /help line need the view-schedule permission.**
#[tokio::test]
async fn test_schedule_view_needs_permission() {
    let (store, engine, _seed) = setup().await;
    store.set_active(STUDENT, false).await.unwrap();

    let reply = send(&engine, STUDENT, "/myschedule").await;
    assert_eq!(
        reply,
        vec![OutboundIntent::error(STUDENT, "You are not allowed to view schedule.")]
    );
    let help = send(&engine, STUDENT, "/help").await.remove(0);
    assert!(!help.content.contains("/myschedule"));

    let help = send(&engine, NEWBIE, "/help").await.remove(0);
    assert!(help.content.contains("/myschedule"));
}

/// **Test: A lost session write at confirm never applies the mutation twice.**
///
/// **Setup:** instructor at `schedule:confirm`; the next session write fails.
/// **Action:** yes, then yes again.
/// **Expected:** the first yes reports only the outage and keeps the confirm step; the second
/// creates the record. Exactly one record exists.
#[tokio::test]
async fn test_failed_session_write_at_confirm_commits_once() {
    let (store, engine, seed) = setup().await;
    for input in ["/schedule", "CS101", "A", "exam", "Midterm", "2030-06-03 09:00"] {
        send(&engine, TEACHER, input).await;
    }
    assert_eq!(state_of(store.as_ref(), TEACHER).await, "schedule:confirm");

    store.fail_session_saves(1);
    let first = send(&engine, TEACHER, "yes").await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].kind, IntentKind::Error);
    assert!(first[0].content.contains("temporarily unavailable"));
    assert_eq!(state_of(store.as_ref(), TEACHER).await, "schedule:confirm");

    let second = send(&engine, TEACHER, "yes").await;
    assert_eq!(second.len(), 1, "got {:?}", second);
    assert_eq!(second[0].kind, IntentKind::Confirmation);
    assert_eq!(state_of(store.as_ref(), TEACHER).await, "idle");

    let midterms = store
        .list_records(seed.section.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.title == "Midterm")
        .count();
    assert_eq!(midterms, 1);
}

/// **Test: A stored session whose data cannot be decoded is reset instead of blocking the user.**
///
/// **Setup:** SQLite store with a raw session row holding `not json`.
/// **Action:** /help, then /enroll.
/// **Expected:** help is answered, the stored session is reset to idle, the workflow starts.
#[tokio::test]
async fn test_undecodable_session_resets_to_idle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("classbot.db");
    let path = path.to_str().expect("utf-8 path");
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(path).await.unwrap());
    seed(store.as_ref()).await;
    let raw = sqlx::SqlitePool::connect(&format!("sqlite:{}", path))
        .await
        .unwrap();
    sqlx::query("INSERT INTO sessions (user_id, state, data, last_activity) VALUES (?, ?, ?, ?)")
        .bind(STUDENT)
        .bind("enroll:course")
        .bind("not json")
        .bind(now())
        .execute(&raw)
        .await
        .unwrap();
    let engine = engine_for(store.clone(), EngineConfig::default());

    let help = send(&engine, STUDENT, "/help").await;
    assert_eq!(help.len(), 1);
    assert!(help[0].content.contains("/enroll"), "got {:?}", help);
    assert_eq!(state_of(store.as_ref(), STUDENT).await, "idle");

    let start = send(&engine, STUDENT, "/enroll").await;
    assert_eq!(start[0].content, Field::Course.prompt());
    assert_eq!(state_of(store.as_ref(), STUDENT).await, "enroll:course");
}

/// **Test: An admin announcement to students reaches each active student once.**
///
/// **Setup:** seeded users; the newer student is deactivated halfway through.
/// **Action:** /broadcast, students, message, yes.
/// **Expected:** audience keyboard offered; confirmation for the admin plus one notification
/// whose targets are the active students only.
#[tokio::test]
async fn test_broadcast_to_students() {
    let (store, engine, _seed) = setup().await;

    let prompt = send(&engine, ADMIN, "/broadcast").await.remove(0);
    assert_eq!(prompt.content, Field::Audience.prompt());
    assert_eq!(
        prompt.keyboard,
        Some(KeyboardRef::Choices(vec![
            "all".to_string(),
            "students".to_string(),
            "instructors".to_string()
        ]))
    );
    let prompt = send(&engine, ADMIN, "Students").await.remove(0);
    assert_eq!(prompt.content, Field::Message.prompt());
    let confirm = send(&engine, ADMIN, "Room 101 is closed today.").await.remove(0);
    assert!(confirm.content.contains("audience: students"));
    assert!(confirm.content.contains("message: Room 101 is closed today."));

    store.set_active(NEWBIE, false).await.unwrap();
    let reply = send(&engine, ADMIN, "yes").await;
    assert_eq!(reply.len(), 2);
    assert_eq!(reply[0].kind, IntentKind::Confirmation);
    assert!(reply[0].content.contains("recipients: 1"), "got {:?}", reply[0]);
    assert_eq!(
        reply[1],
        OutboundIntent::notification(vec![STUDENT], "Announcement:\nRoom 101 is closed today.")
    );
    assert_eq!(state_of(store.as_ref(), ADMIN).await, "idle");
}

/// **Test: Announcement audiences: everyone but the sender, or one section's members.**
#[tokio::test]
async fn test_broadcast_audiences() {
    let (_store, engine, seed) = setup().await;

    for input in ["/broadcast", "all", "Exams start Monday."] {
        send(&engine, ADMIN, input).await;
    }
    let reply = send(&engine, ADMIN, "yes").await;
    assert_eq!(
        reply[1].targets,
        vec![ROOT, TEACHER, OTHER_TEACHER, STUDENT, NEWBIE]
    );

    let section = format!("#{}", seed.section.id);
    for input in ["/broadcast", section.as_str(), "Lab moved to room 2."] {
        send(&engine, ROOT, input).await;
    }
    let reply = send(&engine, ROOT, "yes").await;
    assert!(reply[0].content.contains("section CS101 / A"), "got {:?}", reply[0]);
    assert_eq!(reply[1].targets, vec![TEACHER, STUDENT]);

    let reply = send(&engine, ADMIN, "/broadcast").await;
    assert_eq!(reply.len(), 1);
    let reply = send(&engine, ADMIN, "#999").await;
    assert_eq!(reply[0].kind, IntentKind::Error);
    assert!(reply[0].content.contains("no section with that id"));
}

/// **Test: Per-user locks are dropped once a user's events are done.**
#[tokio::test]
async fn test_user_locks_are_released() {
    let (_store, engine, _seed) = setup().await;

    let (a, b, c) = (
        event(NEWBIE, "/enroll"),
        event(NEWBIE, "CS101"),
        event(STUDENT, "/help"),
    );
    tokio::join!(
        engine.handle_event_at(&a, now()),
        engine.handle_event_at(&b, now()),
        engine.handle_event_at(&c, now())
    );
    assert_eq!(engine.active_locks(), 0);
}

/// **Test: An idle queue worker exits; the user's next event starts a new one.**
#[tokio::test]
async fn test_idle_queue_worker_exits() {
    let store = Arc::new(InMemoryStore::new());
    seed(store.as_ref()).await;
    let engine = Arc::new(engine_for(store.clone(), EngineConfig::default()));
    let bot = Arc::new(RecordingBot::default());
    let handler = ConversationHandler::queued(engine, bot.clone())
        .with_queue_idle_timeout(StdDuration::from_millis(50));

    handler.handle(&event(NEWBIE, "/enroll")).await.unwrap();
    for _ in 0..100 {
        if bot.sent_to(NEWBIE).await.len() == 1 && handler.active_queues() == 0 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert_eq!(handler.active_queues(), 0);

    handler.handle(&event(NEWBIE, "CS101")).await.unwrap();
    let mut delivered = Vec::new();
    for _ in 0..100 {
        delivered = bot.sent_to(NEWBIE).await;
        if delivered.len() == 2 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].content, Field::Section.prompt());
}
