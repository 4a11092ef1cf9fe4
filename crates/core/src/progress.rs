//! Program-sequence advancement.
//!
//! An enrollment points at one link of its program. Advancing moves the
//! pointer to the link with the next larger `sequence_order` and schedules
//! that link's template `interval_days_after` days from today, where the
//! interval is the one of the link being left: it is the gap a link asks for
//! after its own session. Past the last link the enrollment is completed and
//! the pointer cleared.

use chrono::{Days, NaiveDate};
use thiserror::Error;

use crate::model::{
    EnrollmentStatus, NewScheduledPractice, Program, ProgramEnrollment, ProgramError, ProgramId,
    ProgramPracticeLink,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("enrollment is {0}; only active enrollments advance")]
    NotActive(EnrollmentStatus),

    #[error("enrollment belongs to program {expected}, not {found}")]
    ProgramMismatch { expected: ProgramId, found: ProgramId },

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error("next session date {today} + {days} day(s) is out of range")]
    DateOutOfRange { today: NaiveDate, days: u32 },
}

/// What advancing an enrollment should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvancePlan {
    /// The enrollment is already completed or cancelled; nothing to write.
    AlreadyTerminal(EnrollmentStatus),
    /// The current link was the last one: complete and clear the pointer.
    Finished,
    /// Move the pointer to `link` and schedule it.
    Next {
        link: ProgramPracticeLink,
        scheduled: NewScheduledPractice,
    },
}

impl AdvancePlan {
    /// Status the enrollment has once the plan is committed.
    #[must_use]
    pub fn resulting_status(&self) -> EnrollmentStatus {
        match self {
            Self::AlreadyTerminal(status) => *status,
            Self::Finished => EnrollmentStatus::Completed,
            Self::Next { .. } => EnrollmentStatus::Active,
        }
    }
}

/// Plan the next step of `enrollment` through `program`.
///
/// An active enrollment without a pointer is treated as positioned before the
/// first link, which is then scheduled for today.
///
/// # Errors
///
/// - `ProgressError::NotActive` for a pending or inactive enrollment
/// - `ProgressError::ProgramMismatch` if the program is not the enrollment's
/// - `ProgressError::Program` if the pointer names a link outside the program
/// - `ProgressError::DateOutOfRange` if the next date overflows the calendar
pub fn plan_advance(
    enrollment: &ProgramEnrollment,
    program: &Program,
    today: NaiveDate,
) -> Result<AdvancePlan, ProgressError> {
    let status = enrollment.status();
    if status.is_terminal() {
        return Ok(AdvancePlan::AlreadyTerminal(status));
    }
    if status != EnrollmentStatus::Active {
        return Err(ProgressError::NotActive(status));
    }

    if program.id() != enrollment.program_id() {
        return Err(ProgressError::ProgramMismatch {
            expected: enrollment.program_id(),
            found: program.id(),
        });
    }
    let current = match enrollment.current_practice_link_id() {
        Some(link_id) => Some(program.link(link_id)?),
        None => None,
    };

    let Some(next) = program.next_after(current.map(|l| l.sequence_order)) else {
        return Ok(AdvancePlan::Finished);
    };

    let days = current.map_or(0, |l| l.interval_days_after);
    let scheduled_date = today
        .checked_add_days(Days::new(u64::from(days)))
        .ok_or(ProgressError::DateOutOfRange { today, days })?;

    Ok(AdvancePlan::Next {
        link: next.clone(),
        scheduled: NewScheduledPractice {
            practice_template_id: next.practice_template_id,
            scheduled_date,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnrollmentId, PracticeTemplateId, ProgramPracticeLinkId, UserId};

    fn program() -> Program {
        let link = |id: u64, order: u32, interval: u32| ProgramPracticeLink {
            id: ProgramPracticeLinkId::new(id),
            program_id: ProgramId::new(1),
            practice_template_id: PracticeTemplateId::new(id * 10),
            sequence_order: order,
            interval_days_after: interval,
        };
        Program::from_persisted(ProgramId::new(1), "Base", vec![link(1, 0, 2), link(2, 1, 3)])
            .unwrap()
    }

    fn enrollment(status: EnrollmentStatus, link: Option<u64>) -> ProgramEnrollment {
        let user = UserId::random();
        ProgramEnrollment::from_persisted(
            EnrollmentId::new(1),
            ProgramId::new(1),
            user,
            user,
            status,
            link.map(ProgramPracticeLinkId::new),
            0,
        )
        .unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    #[test]
    fn advances_after_the_interval_of_the_link_left() {
        let plan = plan_advance(&enrollment(EnrollmentStatus::Active, Some(1)), &program(), today())
            .unwrap();
        let AdvancePlan::Next { link, scheduled } = plan else {
            panic!("expected next link");
        };
        assert_eq!(link.id, ProgramPracticeLinkId::new(2));
        assert_eq!(scheduled.practice_template_id, PracticeTemplateId::new(20));
        assert_eq!(
            scheduled.scheduled_date,
            NaiveDate::from_ymd_opt(2024, 5, 12).unwrap()
        );
    }

    #[test]
    fn last_link_finishes_the_program() {
        let plan = plan_advance(&enrollment(EnrollmentStatus::Active, Some(2)), &program(), today())
            .unwrap();
        assert_eq!(plan, AdvancePlan::Finished);
        assert_eq!(plan.resulting_status(), EnrollmentStatus::Completed);
    }

    #[test]
    fn terminal_enrollments_are_left_alone() {
        let plan =
            plan_advance(&enrollment(EnrollmentStatus::Completed, None), &program(), today())
                .unwrap();
        assert_eq!(plan, AdvancePlan::AlreadyTerminal(EnrollmentStatus::Completed));
    }

    #[test]
    fn paused_enrollments_do_not_advance() {
        let err = plan_advance(&enrollment(EnrollmentStatus::Inactive, Some(1)), &program(), today())
            .unwrap_err();
        assert_eq!(err, ProgressError::NotActive(EnrollmentStatus::Inactive));
    }

    #[test]
    fn pointer_outside_program_is_reported() {
        let err = plan_advance(&enrollment(EnrollmentStatus::Active, Some(7)), &program(), today())
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressError::Program(ProgramError::UnknownLink { .. })
        ));
    }

    #[test]
    fn missing_pointer_starts_from_the_first_link() {
        let plan = plan_advance(&enrollment(EnrollmentStatus::Active, None), &program(), today())
            .unwrap();
        let AdvancePlan::Next { link, scheduled } = plan else {
            panic!("expected first link");
        };
        assert_eq!(link.id, ProgramPracticeLinkId::new(1));
        assert_eq!(scheduled.scheduled_date, today());
    }

    #[test]
    fn pointer_order_never_decreases() {
        let program = program();
        let mut order = None;
        let mut current = Some(1);
        while let AdvancePlan::Next { link, .. } =
            plan_advance(&enrollment(EnrollmentStatus::Active, current), &program, today()).unwrap()
        {
            assert!(order.is_none_or(|o| link.sequence_order > o));
            order = Some(link.sequence_order);
            current = Some(link.id.value());
        }
        assert_eq!(order, Some(1));
    }
}
