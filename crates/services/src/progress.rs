use std::sync::Arc;

use coach_core::model::{
    Completion, EnrollmentId, EnrollmentStatus, NewEnrollment, NewScheduledPractice,
    PracticeInstanceId, Program, ProgramEnrollment, ProgramId, ScheduledPractice, UserId,
};
use coach_core::progress::{AdvancePlan, plan_advance};
use coach_core::time::Clock;
use serde::Serialize;
use storage::repository::{
    AdvanceCommit, EnrollmentCommit, EnrollmentRepository, InstanceRepository, ProgramRepository,
    ScheduleRepository, StatusChange,
};
use tracing::{debug, info};

use crate::error::{ServiceError, StorageContext};

/// Result of `complete_and_advance_progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvanceOutcome {
    pub enrollment: ProgramEnrollment,
    /// Row created for the link just entered; `None` when the program finished.
    pub scheduled: Option<ScheduledPractice>,
    /// Session whose completion was recorded by this call.
    pub completed_practice: Option<PracticeInstanceId>,
}

impl AdvanceOutcome {
    fn unchanged(enrollment: ProgramEnrollment) -> Self {
        Self {
            enrollment,
            scheduled: None,
            completed_practice: None,
        }
    }
}

/// Owns enrollment status and the pointer into the program's links.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    programs: Arc<dyn ProgramRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    schedule: Arc<dyn ScheduleRepository>,
    instances: Arc<dyn InstanceRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        programs: Arc<dyn ProgramRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        schedule: Arc<dyn ScheduleRepository>,
        instances: Arc<dyn InstanceRepository>,
    ) -> Self {
        Self {
            clock,
            programs,
            enrollments,
            schedule,
            instances,
        }
    }

    /// Enroll `user_id` in a program, starting at its first link today.
    ///
    /// Self-enrollment starts active; when a coach enrolls someone else the
    /// enrollment waits in `pending` until accepted.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` for an unknown program and
    /// `ServiceError::Validation` for a program without links.
    pub async fn enroll(
        &self,
        program_id: ProgramId,
        user_id: UserId,
        enrolled_by_user_id: UserId,
    ) -> Result<EnrollmentCommit, ServiceError> {
        let program = self.load_program(program_id).await?;
        let first = program.first_link().ok_or_else(|| {
            ServiceError::Validation(format!("program {program_id} has no sessions"))
        })?;

        let commit = self
            .enrollments
            .create_enrollment(
                &NewEnrollment::new(program_id, user_id, enrolled_by_user_id, Some(first.id)),
                NewScheduledPractice {
                    practice_template_id: first.practice_template_id,
                    scheduled_date: self.clock.today(),
                },
            )
            .await
            .context("program", program_id)?;

        info!(
            enrollment = %commit.enrollment.id(),
            program = %program_id,
            status = %commit.enrollment.status(),
            link = %first.id,
            "enrolled user"
        );
        Ok(commit)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Authorization` unless `actor` is the enrolled
    /// user or the coach who enrolled them.
    pub async fn get_enrollment(
        &self,
        enrollment_id: EnrollmentId,
        actor: UserId,
    ) -> Result<ProgramEnrollment, ServiceError> {
        let enrollment = self.load_enrollment(enrollment_id).await?;
        if !enrollment.is_managed_by(actor) {
            return Err(ServiceError::forbidden(actor, "enrollment", enrollment_id));
        }
        Ok(enrollment)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Storage` if the backend fails.
    pub async fn list_enrollments_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ProgramEnrollment>, ServiceError> {
        Ok(self.enrollments.list_enrollments_for_user(user_id).await?)
    }

    /// Accept, pause, resume or cancel an enrollment.
    ///
    /// Setting the current status again changes nothing. Cancelling drops the
    /// enrollment's sessions that are dated today or later and not started.
    ///
    /// # Errors
    ///
    /// - `ServiceError::Authorization` unless `actor` is the user or their coach
    /// - `ServiceError::Validation` for a transition the lifecycle forbids
    /// - `ServiceError::Conflict` if the enrollment changed meanwhile
    pub async fn update_status(
        &self,
        enrollment_id: EnrollmentId,
        actor: UserId,
        target: EnrollmentStatus,
    ) -> Result<ProgramEnrollment, ServiceError> {
        let enrollment = self.get_enrollment(enrollment_id, actor).await?;
        if !enrollment.check_transition(target)? {
            debug!(enrollment = %enrollment_id, status = %target, "status unchanged");
            return Ok(enrollment);
        }

        let clear_unstarted_from =
            (target == EnrollmentStatus::Cancelled).then(|| self.clock.today());
        let updated = self
            .enrollments
            .update_status(&StatusChange {
                enrollment_id,
                expected_revision: enrollment.revision(),
                status: target,
                clear_unstarted_from,
            })
            .await
            .context("enrollment", enrollment_id)?;

        info!(
            enrollment = %enrollment_id,
            from = %enrollment.status(),
            to = %target,
            "enrollment status changed"
        );
        Ok(updated)
    }

    /// Declare the current session done and move to the next link.
    ///
    /// The session's own completion is recorded directly, whatever the state
    /// of its blocks. Past the last link the enrollment completes and the
    /// pointer is cleared. Calling this on a completed or cancelled enrollment
    /// returns it unchanged.
    ///
    /// # Errors
    ///
    /// - `ServiceError::NotFound` if the enrollment, program or link is missing
    /// - `ServiceError::Authorization` if `user_id` does not own the enrollment
    /// - `ServiceError::Validation` if the enrollment is pending or inactive
    /// - `ServiceError::Conflict` if another advance or deferral won the race
    pub async fn complete_and_advance_progress(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> Result<AdvanceOutcome, ServiceError> {
        let enrollment = self.load_enrollment(enrollment_id).await?;
        if !enrollment.is_owned_by(user_id) {
            return Err(ServiceError::forbidden(user_id, "enrollment", enrollment_id));
        }
        let program = self.load_program(enrollment.program_id()).await?;
        let today = self.clock.today();

        let plan = plan_advance(&enrollment, &program, today)?;
        let status = plan.resulting_status();
        let (next_link, schedule) = match plan {
            AdvancePlan::AlreadyTerminal(status) => {
                debug!(enrollment = %enrollment_id, %status, "advance on finished enrollment");
                return Ok(AdvanceOutcome::unchanged(enrollment));
            }
            AdvancePlan::Finished => (None, None),
            AdvancePlan::Next { link, scheduled } => (Some(link), Some(scheduled)),
        };

        let practice_completion = self.current_session(&enrollment, &program).await?;
        let commit = self
            .enrollments
            .commit_advance(&AdvanceCommit {
                enrollment_id,
                expected_revision: enrollment.revision(),
                status,
                current_practice_link_id: next_link.as_ref().map(|l| l.id),
                practice_completion,
                schedule,
            })
            .await
            .context("enrollment", enrollment_id)?;

        match &next_link {
            Some(link) => info!(
                enrollment = %enrollment_id,
                link = %link.id,
                sequence_order = link.sequence_order,
                "advanced to next session"
            ),
            None => info!(enrollment = %enrollment_id, "program completed"),
        }
        Ok(AdvanceOutcome {
            enrollment: commit.enrollment,
            scheduled: commit.scheduled,
            completed_practice: practice_completion.map(|(id, _)| id),
        })
    }

    /// The session to mark done: the latest started row for the current
    /// link's template. `None` if it was never started or is already done.
    async fn current_session(
        &self,
        enrollment: &ProgramEnrollment,
        program: &Program,
    ) -> Result<Option<(PracticeInstanceId, Completion)>, ServiceError> {
        let Some(link_id) = enrollment.current_practice_link_id() else {
            return Ok(None);
        };
        let template_id = program.link(link_id)?.practice_template_id;

        let rows = self
            .schedule
            .list_for_enrollment(enrollment.id())
            .await
            .context("enrollment", enrollment.id())?;
        let Some(practice_id) = rows
            .iter()
            .filter(|r| r.practice_template_id == template_id)
            .filter_map(|r| r.practice_instance_id.map(|p| (r.scheduled_date, r.id, p)))
            .max()
            .map(|(_, _, p)| p)
        else {
            return Ok(None);
        };

        let header = self
            .instances
            .get_practice_header(practice_id)
            .await
            .context("practice instance", practice_id)?;
        Ok(header
            .completion
            .transition(true, self.clock.now())
            .map(|completion| (practice_id, completion)))
    }

    async fn load_enrollment(&self, id: EnrollmentId) -> Result<ProgramEnrollment, ServiceError> {
        self.enrollments
            .get_enrollment(id)
            .await
            .context("enrollment", id)
    }

    async fn load_program(&self, id: ProgramId) -> Result<Program, ServiceError> {
        self.programs.get_program(id).await.context("program", id)
    }
}
