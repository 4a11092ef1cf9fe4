use std::sync::Arc;

use async_trait::async_trait;
use chrono::Days;
use coach_core::model::{
    EnrollmentId, EnrollmentStatus, MovementBody, MovementOutline, NewEnrollment,
    NewProgram, NewProgramLink, NewScheduledPractice, PracticeOutline, PracticeTemplate,
    PrescriptionBody, PrescriptionOutline, Program, ProgramEnrollment, SetBody, UserId,
};
use coach_core::time::fixed_now;
use services::{Clock, CoachServices, ErrorKind, ServiceError};
use storage::repository::{
    AdvanceCommit, EnrollmentCommit, EnrollmentRepository, StatusChange, Storage, StorageError,
};

fn outline(title: &str) -> PracticeOutline {
    PracticeOutline {
        title: title.into(),
        prescriptions: vec![PrescriptionOutline {
            body: PrescriptionBody {
                block: "main".into(),
                prescribed_rounds: Some(3),
            },
            movements: vec![MovementOutline {
                body: MovementBody {
                    movement_class: "squat".into(),
                    metric_unit: None,
                    metric_value: None,
                },
                sets: vec![SetBody::default(); 2],
            }],
        }],
    }
}

/// Template A at order 0 (interval 2), template B at order 1 (interval 3).
async fn two_session_program(storage: &Storage) -> (PracticeTemplate, PracticeTemplate, Program) {
    let a = storage
        .templates
        .insert_practice_template(&outline("Session A"))
        .await
        .unwrap();
    let b = storage
        .templates
        .insert_practice_template(&outline("Session B"))
        .await
        .unwrap();
    let link = |template: &PracticeTemplate, order, interval| NewProgramLink {
        practice_template_id: template.id,
        sequence_order: order,
        interval_days_after: interval,
    };
    let program = storage
        .programs
        .insert_program(&NewProgram::new("Base", vec![link(&a, 0, 2), link(&b, 1, 3)]).unwrap())
        .await
        .unwrap();
    (a, b, program)
}

async fn run_program_flow(services: &CoachServices) {
    let user = UserId::random();
    let today = fixed_now().date_naive();
    let (a, b, program) = two_session_program(services.storage()).await;
    let progress = services.progress();
    let materializer = services.materializer();

    let commit = progress.enroll(program.id(), user, user).await.unwrap();
    let enrollment_id = commit.enrollment.id();
    assert_eq!(commit.enrollment.status(), EnrollmentStatus::Active);
    assert_eq!(
        commit.enrollment.current_practice_link_id(),
        Some(program.links()[0].id)
    );
    let first = commit.scheduled.unwrap();
    assert_eq!(first.scheduled_date, today);
    assert_eq!(first.practice_template_id, a.id);

    let started = materializer
        .start_scheduled_practice(first.id, user)
        .await
        .unwrap();
    assert_eq!(started.template_id, Some(a.id));
    assert_eq!(started.practice_date, today);
    assert!(!started.completion.is_complete());

    let again = materializer
        .start_scheduled_practice(first.id, user)
        .await
        .unwrap();
    assert_eq!(again.id, started.id);

    let outcome = progress
        .complete_and_advance_progress(enrollment_id, user)
        .await
        .unwrap();
    assert_eq!(outcome.completed_practice, Some(started.id));
    assert_eq!(
        outcome.enrollment.current_practice_link_id(),
        Some(program.links()[1].id)
    );
    let second = outcome.scheduled.unwrap();
    assert_eq!(second.practice_template_id, b.id);
    assert_eq!(second.scheduled_date, today.checked_add_days(Days::new(2)).unwrap());

    let tree = materializer.get_instance_tree(started.id, user).await.unwrap();
    assert!(tree.completion.is_complete());
    assert_eq!(tree.completion.completed_at(), Some(fixed_now()));
    assert!(tree.sets().all(|s| !s.completion.is_complete()));

    let finished = progress
        .complete_and_advance_progress(enrollment_id, user)
        .await
        .unwrap();
    assert_eq!(finished.enrollment.status(), EnrollmentStatus::Completed);
    assert_eq!(finished.enrollment.current_practice_link_id(), None);
    assert_eq!(finished.scheduled, None);
    assert_eq!(finished.completed_practice, None);

    let idle = progress
        .complete_and_advance_progress(enrollment_id, user)
        .await
        .unwrap();
    assert_eq!(idle.enrollment, finished.enrollment);
    assert_eq!(idle.scheduled, None);

    let rows = services.scheduler().list(&[enrollment_id], today).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].practice_instance_id, Some(started.id));
}

#[tokio::test]
async fn program_runs_to_completion_in_memory() {
    let services = CoachServices::in_memory(Clock::fixed(fixed_now()));
    run_program_flow(&services).await;
}

#[tokio::test]
async fn program_runs_to_completion_on_sqlite() {
    let services = CoachServices::new_sqlite(
        "sqlite:file:memdb_services_flow?mode=memory&cache=shared",
        Clock::fixed(fixed_now()),
    )
    .await
    .unwrap();
    run_program_flow(&services).await;
}

#[tokio::test]
async fn coach_enrollment_waits_for_the_user() {
    let services = CoachServices::in_memory(Clock::fixed(fixed_now()));
    let (_, _, program) = two_session_program(services.storage()).await;
    let progress = services.progress();
    let (coach, user) = (UserId::random(), UserId::random());

    let commit = progress.enroll(program.id(), user, coach).await.unwrap();
    let id = commit.enrollment.id();
    assert_eq!(commit.enrollment.status(), EnrollmentStatus::Pending);

    let err = progress
        .complete_and_advance_progress(id, user)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = progress
        .complete_and_advance_progress(id, coach)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    assert_eq!(progress.get_enrollment(id, coach).await.unwrap().id(), id);
    let err = progress.get_enrollment(id, UserId::random()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let accepted = progress
        .update_status(id, user, EnrollmentStatus::Active)
        .await
        .unwrap();
    assert_eq!(accepted.status(), EnrollmentStatus::Active);
    assert_eq!(accepted.revision(), 1);

    let listed = progress.list_enrollments_for_user(user).await.unwrap();
    assert_eq!(listed, vec![accepted]);
    assert!(progress.list_enrollments_for_user(coach).await.unwrap().is_empty());
}

#[tokio::test]
async fn status_changes_follow_the_lifecycle() {
    let services = CoachServices::in_memory(Clock::fixed(fixed_now()));
    let (_, _, program) = two_session_program(services.storage()).await;
    let progress = services.progress();
    let user = UserId::random();
    let id = progress.enroll(program.id(), user, user).await.unwrap().enrollment.id();

    let paused = progress
        .update_status(id, user, EnrollmentStatus::Inactive)
        .await
        .unwrap();
    let same = progress
        .update_status(id, user, EnrollmentStatus::Inactive)
        .await
        .unwrap();
    assert_eq!(same.revision(), paused.revision());

    let err = progress
        .complete_and_advance_progress(id, user)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = progress
        .update_status(id, user, EnrollmentStatus::Completed)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let cancelled = progress
        .update_status(id, user, EnrollmentStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status(), EnrollmentStatus::Cancelled);

    let today = fixed_now().date_naive();
    assert!(services.scheduler().list(&[id], today).await.unwrap().is_empty());

    let err = progress
        .update_status(id, user, EnrollmentStatus::Active)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let idle = progress.complete_and_advance_progress(id, user).await.unwrap();
    assert_eq!(idle.enrollment, cancelled);
}

#[tokio::test]
async fn unknown_enrollment_and_empty_program_are_reported() {
    let services = CoachServices::in_memory(Clock::fixed(fixed_now()));
    let user = UserId::random();

    let err = services
        .progress()
        .complete_and_advance_progress(EnrollmentId::new(404), user)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { entity: "enrollment", .. }));

    let empty = services
        .storage()
        .programs
        .insert_program(&NewProgram::new("Nothing yet", Vec::new()).unwrap())
        .await
        .unwrap();
    let err = services.progress().enroll(empty.id(), user, user).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn push_skips_the_session_already_done() {
    let storage = Storage::in_memory();
    let day_zero = fixed_now();
    let services = CoachServices::from_storage(storage.clone(), Clock::fixed(day_zero));
    let (_, _, program) = two_session_program(&storage).await;
    let user = UserId::random();

    let commit = services.progress().enroll(program.id(), user, user).await.unwrap();
    let id = commit.enrollment.id();
    let first = commit.scheduled.unwrap();
    services
        .materializer()
        .start_scheduled_practice(first.id, user)
        .await
        .unwrap();
    let second = services
        .progress()
        .complete_and_advance_progress(id, user)
        .await
        .unwrap()
        .scheduled
        .unwrap();

    let later = CoachServices::from_storage(
        storage,
        Clock::fixed(day_zero.checked_add_days(Days::new(2)).unwrap()),
    );
    later.scheduler().defer_practice(id, user, "push").await.unwrap();

    let rows = later
        .scheduler()
        .list(&[id], day_zero.date_naive())
        .await
        .unwrap();
    let date_of = |row_id| {
        rows.iter()
            .find(|r| r.id == row_id)
            .map(|r| r.scheduled_date)
            .unwrap()
    };
    assert_eq!(date_of(first.id), day_zero.date_naive());
    assert_eq!(
        date_of(second.id),
        day_zero.date_naive().checked_add_days(Days::new(3)).unwrap()
    );
}

/// Serves one fixed snapshot on reads, delegating writes.
struct StaleReads {
    inner: Arc<dyn EnrollmentRepository>,
    snapshot: ProgramEnrollment,
}

#[async_trait]
impl EnrollmentRepository for StaleReads {
    async fn get_enrollment(&self, _id: EnrollmentId) -> Result<ProgramEnrollment, StorageError> {
        Ok(self.snapshot.clone())
    }

    async fn list_enrollments_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<ProgramEnrollment>, StorageError> {
        self.inner.list_enrollments_for_user(user).await
    }

    async fn create_enrollment(
        &self,
        enrollment: &NewEnrollment,
        first: NewScheduledPractice,
    ) -> Result<EnrollmentCommit, StorageError> {
        self.inner.create_enrollment(enrollment, first).await
    }

    async fn update_status(
        &self,
        change: &StatusChange,
    ) -> Result<ProgramEnrollment, StorageError> {
        self.inner.update_status(change).await
    }

    async fn commit_advance(
        &self,
        commit: &AdvanceCommit,
    ) -> Result<EnrollmentCommit, StorageError> {
        self.inner.commit_advance(commit).await
    }
}

#[tokio::test]
async fn stale_revision_surfaces_as_conflict() {
    let storage = Storage::in_memory();
    let clock = Clock::fixed(fixed_now());
    let (_, _, program) = two_session_program(&storage).await;
    let user = UserId::random();

    let fresh = CoachServices::from_storage(storage.clone(), clock);
    let snapshot = fresh
        .progress()
        .enroll(program.id(), user, user)
        .await
        .unwrap()
        .enrollment;
    let id = snapshot.id();

    let stale = CoachServices::from_storage(
        Storage {
            enrollments: Arc::new(StaleReads {
                inner: Arc::clone(&storage.enrollments),
                snapshot,
            }),
            ..storage.clone()
        },
        clock,
    );

    fresh.scheduler().defer_practice(id, user, "push").await.unwrap();

    let err = stale
        .progress()
        .complete_and_advance_progress(id, user)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.is_retryable());

    let err = stale.scheduler().defer_practice(id, user, "shift").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let current = storage.enrollments.get_enrollment(id).await.unwrap();
    assert_eq!(current.revision(), 1);
    assert_eq!(
        current.current_practice_link_id(),
        Some(program.links()[0].id)
    );
}
