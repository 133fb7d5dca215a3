//! Store contract shared by every implementation. Each function exercises one trait.

use chrono::{Duration, TimeZone, Utc};
use classbot_core::Role;
use storage::{
    JobSchedule, NewRecord, RecordKind, RecordStatus, ReminderJob, ReminderTarget, Session,
    StorageError, Store,
};

pub async fn sessions_round_trip<S: Store>(store: &S) {
    assert!(store.load_session(1).await.unwrap().is_none());

    let mut session = Session::idle(1, Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap());
    session.state = "enroll:section".to_string();
    session.data.insert("course".to_string(), "3".to_string());
    store.save_session(&session).await.unwrap();
    assert_eq!(store.load_session(1).await.unwrap(), Some(session.clone()));

    session.state = "idle".to_string();
    session.data.clear();
    store.save_session(&session).await.unwrap();
    let loaded = store.load_session(1).await.unwrap().unwrap();
    assert!(loaded.is_idle());
    assert!(loaded.data.is_empty());
}

pub async fn directory_rules<S: Store>(store: &S) {
    let student = store
        .register_user(10, Some("stu"), "Stu Dent", Role::Student)
        .await
        .unwrap();
    assert_eq!(student.role, Role::Student);
    assert!(student.active);

    // Re-registering refreshes names but keeps the role.
    store.set_role(10, Role::Instructor).await.unwrap();
    let again = store
        .register_user(10, Some("stu2"), "Stu Two", Role::Student)
        .await
        .unwrap();
    assert_eq!(again.role, Role::Instructor);
    assert_eq!(again.username.as_deref(), Some("stu2"));
    store.set_role(10, Role::Student).await.unwrap();

    store
        .register_user(20, None, "Ian Structor", Role::Instructor)
        .await
        .unwrap();

    let everyone: Vec<_> = store
        .list_users(None)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(everyone, vec![10, 20]);
    let instructors = store.list_users(Some(Role::Instructor)).await.unwrap();
    assert_eq!(instructors.len(), 1);
    assert_eq!(instructors[0].id, 20);

    let course = store.create_course("cs101", "Intro").await.unwrap();
    assert_eq!(course.code, "CS101");
    assert!(matches!(
        store.create_course("CS101", "Dup").await,
        Err(StorageError::AlreadyExists(_))
    ));
    assert_eq!(
        store.find_course_by_code("Cs101").await.unwrap().map(|c| c.id),
        Some(course.id)
    );

    let section = store
        .create_section(course.id, "A", &[20])
        .await
        .unwrap();
    assert_eq!(section.instructors, vec![20]);
    assert!(matches!(
        store.create_section(course.id, "a", &[]).await,
        Err(StorageError::AlreadyExists(_))
    ));
    assert!(matches!(
        store.create_section(course.id, "B", &[999]).await,
        Err(StorageError::NotFound(_))
    ));

    store
        .register_user(11, None, "Other", Role::Student)
        .await
        .unwrap();
    store.enroll(section.id, 10).await.unwrap();
    let section = store.enroll(section.id, 11).await.unwrap();
    assert_eq!(section.roster, vec![10, 11]);
    assert!(matches!(
        store.enroll(section.id, 10).await,
        Err(StorageError::AlreadyExists(_))
    ));
    assert!(matches!(
        store.enroll(section.id, 12345).await,
        Err(StorageError::NotFound(_))
    ));

    let user = store.get_user(10).await.unwrap().unwrap();
    assert!(user.sections.contains(&section.id));
    let instructed = store.sections_for_user(20).await.unwrap();
    assert_eq!(instructed.len(), 1);

    let section = store.unenroll(section.id, 10).await.unwrap();
    assert_eq!(section.roster, vec![11]);
    assert!(matches!(
        store.unenroll(section.id, 10).await,
        Err(StorageError::NotFound(_))
    ));

    let archived = store.archive_course(course.id).await.unwrap();
    assert!(archived.archived);
    assert!(matches!(
        store.archive_course(course.id).await,
        Err(StorageError::Conflict(_))
    ));
    assert!(store.list_courses(false).await.unwrap().is_empty());
    assert_eq!(store.list_courses(true).await.unwrap().len(), 1);
    assert!(matches!(
        store.create_section(course.id, "C", &[]).await,
        Err(StorageError::Conflict(_))
    ));

    let deactivated = store.set_active(11, false).await.unwrap();
    assert!(!deactivated.active);
}

pub async fn records_and_jobs<S: Store>(store: &S) {
    store
        .register_user(30, None, "Student", Role::Student)
        .await
        .unwrap();
    let course = store.create_course("MATH", "Math").await.unwrap();
    let section = store.create_section(course.id, "1", &[]).await.unwrap();
    store.enroll(section.id, 30).await.unwrap();

    let at = Utc.with_ymd_and_hms(2030, 5, 1, 12, 0, 0).unwrap();
    let new = NewRecord {
        section_id: section.id,
        kind: RecordKind::ReportDeadline,
        title: "Lab 1".to_string(),
        scheduled_at: at,
        created_by: 1,
    };
    let record = store
        .create_record(
            &new,
            0,
            Some(JobSchedule {
                next_fire_at: at - Duration::hours(24),
                target: ReminderTarget::Section(section.id),
            }),
        )
        .await
        .unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
    let job = store.get_job(record.id).await.unwrap().unwrap();
    assert_eq!(job.next_fire_at, at - Duration::hours(24));

    // Marker only moves forward.
    let marked = store.mark_lead_fired(record.id, 1).await.unwrap();
    assert_eq!(marked.fired_leads, 1);
    assert_eq!(marked.status, RecordStatus::Reminded);
    let marked = store.mark_lead_fired(record.id, 0).await.unwrap();
    assert_eq!(marked.fired_leads, 1);

    // Reschedule replaces the job and resets the marker in one step.
    let later = at + Duration::days(2);
    let moved = store
        .reschedule_record(
            record.id,
            later,
            0,
            Some(JobSchedule {
                next_fire_at: later - Duration::hours(24),
                target: ReminderTarget::Section(section.id),
            }),
        )
        .await
        .unwrap();
    assert_eq!(moved.fired_leads, 0);
    assert_eq!(moved.status, RecordStatus::Pending);
    assert_eq!(
        store.get_job(record.id).await.unwrap().unwrap().next_fire_at,
        later - Duration::hours(24)
    );

    let submission = store
        .create_submission(record.id, 30, "my report")
        .await
        .unwrap();
    assert_eq!(submission.body, "my report");
    assert!(matches!(
        store.create_submission(record.id, 30, "again").await,
        Err(StorageError::AlreadyExists(_))
    ));
    assert_eq!(store.list_submissions(record.id).await.unwrap().len(), 1);

    assert_eq!(store.list_open_records().await.unwrap().len(), 1);
    let closed = store.close_record(record.id).await.unwrap();
    assert_eq!(closed.status, RecordStatus::Closed);
    assert!(store.get_job(record.id).await.unwrap().is_none());
    assert!(store.list_open_records().await.unwrap().is_empty());
    assert!(matches!(
        store.close_record(record.id).await,
        Err(StorageError::Conflict(_))
    ));
    assert!(matches!(
        store.create_submission(record.id, 30, "late").await,
        Err(StorageError::Conflict(_))
    ));
    assert!(matches!(
        store.mark_lead_fired(record.id, 2).await,
        Err(StorageError::Conflict(_))
    ));

    let exam = store
        .create_record(
            &NewRecord {
                kind: RecordKind::Exam,
                title: "Final".to_string(),
                ..new.clone()
            },
            0,
            None,
        )
        .await
        .unwrap();
    assert!(matches!(
        store.create_submission(exam.id, 30, "nope").await,
        Err(StorageError::Conflict(_))
    ));
    assert_eq!(store.list_records(section.id).await.unwrap().len(), 2);
}

pub async fn job_ordering<S: Store>(store: &S) {
    let base = Utc.with_ymd_and_hms(2030, 3, 1, 8, 0, 0).unwrap();
    for (record_id, offset) in [(3, 30), (1, 10), (2, 20)] {
        store
            .upsert_job(&ReminderJob {
                record_id,
                next_fire_at: base + Duration::minutes(offset),
                target: ReminderTarget::Users(vec![record_id * 100]),
            })
            .await
            .unwrap();
    }
    assert_eq!(store.peek_earliest_job().await.unwrap().unwrap().record_id, 1);

    let due = store.due_jobs(base + Duration::minutes(20)).await.unwrap();
    assert_eq!(due.iter().map(|j| j.record_id).collect::<Vec<_>>(), vec![1, 2]);
    // Non-destructive.
    assert_eq!(store.due_jobs(base + Duration::minutes(20)).await.unwrap().len(), 2);

    store
        .upsert_job(&ReminderJob {
            record_id: 1,
            next_fire_at: base + Duration::minutes(40),
            target: ReminderTarget::Users(vec![100]),
        })
        .await
        .unwrap();
    assert_eq!(store.peek_earliest_job().await.unwrap().unwrap().record_id, 2);
    assert!(store.remove_job(2).await.unwrap());
    assert!(!store.remove_job(2).await.unwrap());
    let due = store.due_jobs(base + Duration::hours(1)).await.unwrap();
    assert_eq!(due.iter().map(|j| j.record_id).collect::<Vec<_>>(), vec![3, 1]);
    assert_eq!(due[1].target, ReminderTarget::Users(vec![100]));
}
