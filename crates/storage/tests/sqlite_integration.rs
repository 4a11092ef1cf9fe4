use chrono::{Days, NaiveDate};
use coach_core::cascade::{CascadeEdit, InstanceWrite};
use coach_core::model::{
    Completion, DateShift, EnrollmentStatus, InstanceNode, MovementBody, MovementOutline,
    NewEnrollment, NewPracticeInstance, NewPrescriptionInstance, NewProgram, NewProgramLink,
    NewScheduledPractice, NewSetInstance, PracticeOutline, PracticeTemplate, PrescriptionBody,
    PrescriptionOutline, Program, SetBody, SetInstanceId, UserId,
};
use coach_core::time::fixed_now;
use storage::repository::{
    AdvanceCommit, EnrollmentCommit, EnrollmentRepository, InstanceRepository,
    ProgramRepository, ScheduleRepository, StatusChange, StorageError, TemplateRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn today() -> NaiveDate {
    fixed_now().date_naive()
}

fn plus(days: u64) -> NaiveDate {
    today().checked_add_days(Days::new(days)).unwrap()
}

fn outline(title: &str) -> PracticeOutline {
    let set = SetBody {
        reps: Some(8),
        load_value: Some(40.0),
        load_unit: Some("kg".into()),
        duration_secs: None,
    };
    PracticeOutline {
        title: title.into(),
        prescriptions: vec![
            PrescriptionOutline {
                body: PrescriptionBody {
                    block: "warm-up".into(),
                    prescribed_rounds: None,
                },
                movements: vec![MovementOutline {
                    body: MovementBody {
                        movement_class: "breathing".into(),
                        metric_unit: Some("min".into()),
                        metric_value: Some(2.5),
                    },
                    sets: Vec::new(),
                }],
            },
            PrescriptionOutline {
                body: PrescriptionBody {
                    block: "strength".into(),
                    prescribed_rounds: Some(3),
                },
                movements: vec![MovementOutline {
                    body: MovementBody {
                        movement_class: "squat".into(),
                        metric_unit: None,
                        metric_value: None,
                    },
                    sets: vec![set.clone(), set],
                }],
            },
        ],
    }
}

async fn two_session_program(repo: &SqliteRepository) -> (PracticeTemplate, PracticeTemplate, Program) {
    let a = repo.insert_practice_template(&outline("A")).await.unwrap();
    let b = repo.insert_practice_template(&outline("B")).await.unwrap();
    let program = repo
        .insert_program(
            &NewProgram::new(
                "Base",
                vec![
                    NewProgramLink {
                        practice_template_id: b.id,
                        sequence_order: 10,
                        interval_days_after: 3,
                    },
                    NewProgramLink {
                        practice_template_id: a.id,
                        sequence_order: 0,
                        interval_days_after: 2,
                    },
                ],
            )
            .unwrap(),
        )
        .await
        .unwrap();
    (a, b, program)
}

async fn enroll(repo: &SqliteRepository, program: &Program) -> EnrollmentCommit {
    let user = UserId::random();
    let first = program.first_link().unwrap();
    repo.create_enrollment(
        &NewEnrollment::new(program.id(), user, user, Some(first.id)),
        NewScheduledPractice {
            practice_template_id: first.practice_template_id,
            scheduled_date: today(),
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn sqlite_template_tree_round_trips_in_order() {
    let repo = connect("memdb_templates").await;
    let inserted = repo.insert_practice_template(&outline("Day 1")).await.unwrap();

    let fetched = repo.get_practice_template(inserted.id).await.unwrap();
    assert_eq!(fetched, inserted);
    assert_eq!(fetched.prescriptions[0].body.block, "warm-up");
    assert_eq!(fetched.prescriptions[1].movements[0].sets.len(), 2);

    let movement = &inserted.prescriptions[1].movements[0];
    assert_eq!(repo.get_movement_template(movement.id).await.unwrap(), *movement);
    assert_eq!(
        repo.get_set_template(movement.sets[1].id).await.unwrap(),
        movement.sets[1]
    );
    let prescription = &inserted.prescriptions[0];
    assert_eq!(
        repo.get_prescription_template(prescription.id).await.unwrap(),
        *prescription
    );
}

#[tokio::test]
async fn sqlite_program_links_come_back_sorted() {
    let repo = connect("memdb_programs").await;
    let (a, b, program) = two_session_program(&repo).await;

    let fetched = repo.get_program(program.id()).await.unwrap();
    assert_eq!(fetched.title(), "Base");
    let orders: Vec<_> = fetched.links().iter().map(|l| l.sequence_order).collect();
    assert_eq!(orders, vec![0, 10]);
    assert_eq!(fetched.links()[0].practice_template_id, a.id);
    assert_eq!(fetched.links()[1].practice_template_id, b.id);
}

#[tokio::test]
async fn sqlite_enrollment_advances_with_compare_and_set() {
    let repo = connect("memdb_advance").await;
    let (_, b, program) = two_session_program(&repo).await;
    let created = enroll(&repo, &program).await;
    let enrollment = created.enrollment;
    assert_eq!(enrollment.status(), EnrollmentStatus::Active);
    assert_eq!(enrollment.revision(), 0);
    assert_eq!(created.scheduled.unwrap().scheduled_date, today());

    let next = &program.links()[1];
    let commit = AdvanceCommit {
        enrollment_id: enrollment.id(),
        expected_revision: 0,
        status: EnrollmentStatus::Active,
        current_practice_link_id: Some(next.id),
        practice_completion: None,
        schedule: Some(NewScheduledPractice {
            practice_template_id: b.id,
            scheduled_date: plus(3),
        }),
    };
    let advanced = repo.commit_advance(&commit).await.unwrap();
    assert_eq!(advanced.enrollment.current_practice_link_id(), Some(next.id));
    assert_eq!(advanced.enrollment.revision(), 1);

    let err = repo.commit_advance(&commit).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let rows = repo.list_for_enrollment(enrollment.id()).await.unwrap();
    let dates: Vec<_> = rows.iter().map(|r| r.scheduled_date).collect();
    assert_eq!(dates, vec![today(), plus(3)]);

    let listed = repo
        .list_enrollments_for_user(enrollment.user_id())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].revision(), 1);
}

#[tokio::test]
async fn sqlite_start_links_once_and_records_practice_completion() {
    let repo = connect("memdb_start").await;
    let (a, _, program) = two_session_program(&repo).await;
    let created = enroll(&repo, &program).await;
    let row = created.scheduled.unwrap();
    let user = created.enrollment.user_id();

    let new = NewPracticeInstance::from_template(&a, user, row.scheduled_date);
    let started = repo.start_scheduled(row.id, &new).await.unwrap();
    assert_eq!(started.template_id, Some(a.id));
    assert_eq!(
        repo.get_scheduled(row.id).await.unwrap().practice_instance_id,
        Some(started.id)
    );

    let again = repo.start_scheduled(row.id, &new).await.unwrap_err();
    assert!(matches!(again, StorageError::Conflict));

    let finished = repo
        .commit_advance(&AdvanceCommit {
            enrollment_id: created.enrollment.id(),
            expected_revision: 0,
            status: EnrollmentStatus::Completed,
            current_practice_link_id: None,
            practice_completion: Some((started.id, Completion::completed(fixed_now()))),
            schedule: None,
        })
        .await
        .unwrap();
    assert_eq!(finished.enrollment.status(), EnrollmentStatus::Completed);
    assert!(finished.scheduled.is_none());

    let header = repo.get_practice_header(started.id).await.unwrap();
    assert!(header.completion.is_complete());
    assert!(header.completion.completed_at().is_some());
}

#[tokio::test]
async fn sqlite_deferral_moves_rows_and_bumps_revision() {
    let repo = connect("memdb_defer").await;
    let (_, b, program) = two_session_program(&repo).await;
    let created = enroll(&repo, &program).await;
    let id = created.enrollment.id();
    let first = created.scheduled.unwrap();

    let shifted = repo
        .apply_deferral(
            id,
            0,
            &[DateShift {
                id: first.id,
                from: today(),
                to: plus(1),
            }],
        )
        .await
        .unwrap();
    assert_eq!(shifted.revision(), 1);
    assert_eq!(repo.get_scheduled(first.id).await.unwrap().scheduled_date, plus(1));

    let stale = repo.apply_deferral(id, 0, &[]).await.unwrap_err();
    assert!(matches!(stale, StorageError::Conflict));

    let other = enroll(&repo, &program).await;
    let foreign = repo
        .apply_deferral(
            id,
            1,
            &[DateShift {
                id: other.scheduled.unwrap().id,
                from: today(),
                to: plus(1),
            }],
        )
        .await
        .unwrap_err();
    assert!(matches!(foreign, StorageError::NotFound));
    assert_eq!(repo.get_enrollment(id).await.unwrap().revision(), 1);

    let rows = repo
        .list_scheduled(&[id, other.enrollment.id()], today())
        .await
        .unwrap();
    let owners: Vec<_> = rows.iter().map(|r| r.enrollment_id).collect();
    assert_eq!(owners, vec![other.enrollment.id(), id]);
    assert!(rows.iter().all(|r| r.practice_template_id != b.id));
    assert!(repo.list_scheduled(&[], today()).await.unwrap().is_empty());
}

#[tokio::test]
async fn sqlite_cancel_clears_unstarted_future_rows() {
    let repo = connect("memdb_cancel").await;
    let (a, b, program) = two_session_program(&repo).await;
    let created = enroll(&repo, &program).await;
    let id = created.enrollment.id();
    let first = created.scheduled.unwrap();
    repo.start_scheduled(
        first.id,
        &NewPracticeInstance::from_template(&a, created.enrollment.user_id(), today()),
    )
    .await
    .unwrap();
    repo.commit_advance(&AdvanceCommit {
        enrollment_id: id,
        expected_revision: 0,
        status: EnrollmentStatus::Active,
        current_practice_link_id: Some(program.links()[1].id),
        practice_completion: None,
        schedule: Some(NewScheduledPractice {
            practice_template_id: b.id,
            scheduled_date: plus(3),
        }),
    })
    .await
    .unwrap();

    let cancelled = repo
        .update_status(&StatusChange {
            enrollment_id: id,
            expected_revision: 1,
            status: EnrollmentStatus::Cancelled,
            clear_unstarted_from: Some(today()),
        })
        .await
        .unwrap();
    assert_eq!(cancelled.status(), EnrollmentStatus::Cancelled);

    let rows = repo.list_for_enrollment(id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, first.id);
}

#[tokio::test]
async fn sqlite_cascade_edits_commit_together() {
    let repo = connect("memdb_cascade").await;
    let template = repo.insert_practice_template(&outline("Solo")).await.unwrap();
    let user = UserId::random();
    let tree = repo
        .insert_practice_tree(&NewPracticeInstance::from_template(&template, user, today()))
        .await
        .unwrap();
    assert_eq!(
        repo.instance_owner(InstanceNode::Practice(tree.id))
            .await
            .unwrap(),
        user
    );

    let strength = &tree.prescriptions[1];
    let movement_id = strength.movements[0].id;
    let mut last = Vec::new();
    for set in &strength.movements[0].sets {
        last = repo
            .apply_edit(
                CascadeEdit::SetCompletion {
                    set: set.id,
                    complete: true,
                },
                fixed_now(),
            )
            .await
            .unwrap();
    }
    assert!(matches!(last[0], InstanceWrite::SetCompletion { .. }));
    assert!(last
        .iter()
        .any(|w| matches!(w, InstanceWrite::PrescriptionCompletion { .. })));

    let stored = repo.get_practice_tree(tree.id).await.unwrap();
    assert!(stored.prescriptions[1].completion.is_complete());
    assert!(stored.prescriptions[1].movements[0].completion.is_complete());

    let added = repo
        .append_set(
            movement_id,
            &NewSetInstance::from_body(SetBody::default()),
            fixed_now(),
        )
        .await
        .unwrap();
    assert_eq!(added.node.position, 2);
    assert!(!added.node.completion.is_complete());
    assert_eq!(added.writes.len(), 2);

    let deleted = repo
        .apply_edit(CascadeEdit::DeleteSet(added.node.id), fixed_now())
        .await
        .unwrap();
    assert_eq!(deleted[0], InstanceWrite::DeleteSet { id: added.node.id });
    assert!(matches!(
        repo.get_set(added.node.id).await.unwrap_err(),
        StorageError::NotFound
    ));
    let stored = repo.get_practice_tree(tree.id).await.unwrap();
    assert!(stored.prescriptions[1].completion.is_complete());
}

#[tokio::test]
async fn sqlite_appended_block_is_evaluated_before_commit() {
    let repo = connect("memdb_append_block").await;
    let template = repo.insert_practice_template(&outline("Solo")).await.unwrap();
    let tree = repo
        .insert_practice_tree(&NewPracticeInstance::from_template(
            &template,
            UserId::random(),
            today(),
        ))
        .await
        .unwrap();

    let warm_up = NewPrescriptionInstance::from_template(&template.prescriptions[0]);
    let added = repo
        .append_prescription(tree.id, &warm_up, fixed_now())
        .await
        .unwrap();
    assert_eq!(added.node.position, 2);
    assert_eq!(added.writes.len(), 2);
    assert!(added.node.completion.is_complete());
    assert!(added.node.movements[0].completion.is_complete());
}

#[tokio::test]
async fn sqlite_failed_cascade_rolls_back_the_insert() {
    let repo = connect("memdb_rollback").await;
    let template = repo.insert_practice_template(&outline("Solo")).await.unwrap();
    let tree = repo
        .insert_practice_tree(&NewPracticeInstance::from_template(
            &template,
            UserId::random(),
            today(),
        ))
        .await
        .unwrap();
    let movement = &tree.prescriptions[1].movements[0];
    for set in &movement.sets {
        repo.apply_edit(
            CascadeEdit::SetCompletion {
                set: set.id,
                complete: true,
            },
            fixed_now(),
        )
        .await
        .unwrap();
    }

    // Reopening the movement is the write that fails.
    sqlx::query(
        r"
        CREATE TRIGGER freeze_movement_flags BEFORE UPDATE OF complete ON movement_instances
        BEGIN SELECT RAISE(ABORT, 'movement flags are frozen'); END
        ",
    )
    .execute(repo.pool())
    .await
    .unwrap();

    let err = repo
        .append_set(
            movement.id,
            &NewSetInstance::from_body(SetBody::default()),
            fixed_now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Connection(_)));

    let stored = repo.get_practice_tree(tree.id).await.unwrap();
    assert_eq!(stored.prescriptions[1].movements[0].sets.len(), 2);
    assert!(stored.prescriptions[1].movements[0].completion.is_complete());

    let err = repo
        .apply_edit(
            CascadeEdit::SetCompletion {
                set: SetInstanceId::new(9_999),
                complete: true,
            },
            fixed_now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}
