use std::sync::Arc;

use chrono::NaiveDate;
use coach_core::deferral::plan_deferral;
use coach_core::model::{DeferMode, EnrollmentId, ProgramEnrollment, ScheduledPractice, UserId};
use coach_core::time::Clock;
use storage::repository::{EnrollmentRepository, ScheduleRepository};
use tracing::{debug, info};

use crate::error::{ServiceError, StorageContext};

/// Reads and postpones the scheduled sessions of enrollments.
#[derive(Clone)]
pub struct SchedulerService {
    clock: Clock,
    enrollments: Arc<dyn EnrollmentRepository>,
    schedule: Arc<dyn ScheduleRepository>,
}

impl SchedulerService {
    #[must_use]
    pub fn new(
        clock: Clock,
        enrollments: Arc<dyn EnrollmentRepository>,
        schedule: Arc<dyn ScheduleRepository>,
    ) -> Self {
        Self {
            clock,
            enrollments,
            schedule,
        }
    }

    /// Rows of the given enrollments dated `from` or later, by date.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Storage` if the backend fails.
    pub async fn list(
        &self,
        enrollment_ids: &[EnrollmentId],
        from: NaiveDate,
    ) -> Result<Vec<ScheduledPractice>, ServiceError> {
        Ok(self.schedule.list_scheduled(enrollment_ids, from).await?)
    }

    /// Postpone an enrollment's queue, with `mode` given as `"push"` or
    /// `"shift"`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for any other mode, plus everything
    /// `defer` returns.
    pub async fn defer_practice(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
        mode: &str,
    ) -> Result<Vec<ScheduledPractice>, ServiceError> {
        let enrollment = self.owned_enrollment(enrollment_id, user_id).await?;
        let mode: DeferMode = mode.parse()?;
        self.defer_enrollment(&enrollment, mode).await
    }

    /// Postpone an enrollment's queue by one day.
    ///
    /// `Push` moves only the earliest unstarted session due today (or overdue); `Shift`
    /// moves every session from today on. The new dates are planned from one
    /// snapshot and committed together with a revision bump, so a concurrent
    /// advance or deferral surfaces as a conflict. Returns the queue from
    /// today on.
    ///
    /// # Errors
    ///
    /// - `ServiceError::NotFound` if the enrollment is missing
    /// - `ServiceError::Authorization` if `user_id` does not own it
    /// - `ServiceError::Validation` if it is completed or cancelled
    /// - `ServiceError::Conflict` if it changed since it was read
    pub async fn defer(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
        mode: DeferMode,
    ) -> Result<Vec<ScheduledPractice>, ServiceError> {
        let enrollment = self.owned_enrollment(enrollment_id, user_id).await?;
        self.defer_enrollment(&enrollment, mode).await
    }

    async fn owned_enrollment(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> Result<ProgramEnrollment, ServiceError> {
        let enrollment = self
            .enrollments
            .get_enrollment(enrollment_id)
            .await
            .context("enrollment", enrollment_id)?;
        if !enrollment.is_owned_by(user_id) {
            return Err(ServiceError::forbidden(user_id, "enrollment", enrollment_id));
        }
        Ok(enrollment)
    }

    async fn defer_enrollment(
        &self,
        enrollment: &ProgramEnrollment,
        mode: DeferMode,
    ) -> Result<Vec<ScheduledPractice>, ServiceError> {
        let enrollment_id = enrollment.id();
        if enrollment.status().is_terminal() {
            return Err(ServiceError::Validation(format!(
                "enrollment {enrollment_id} is {}; nothing left to defer",
                enrollment.status()
            )));
        }

        let today = self.clock.today();
        let rows = self
            .schedule
            .list_for_enrollment(enrollment_id)
            .await
            .context("enrollment", enrollment_id)?;
        let shifts = plan_deferral(&rows, today, mode)?;

        if shifts.is_empty() {
            debug!(enrollment = %enrollment_id, %mode, "nothing to defer");
        } else {
            self.schedule
                .apply_deferral(enrollment_id, enrollment.revision(), &shifts)
                .await
                .context("enrollment", enrollment_id)?;
            info!(
                enrollment = %enrollment_id,
                %mode,
                moved = shifts.len(),
                "deferred scheduled practices"
            );
        }

        self.list(&[enrollment_id], today).await
    }
}
