//! Calendar rewrites for postponing an enrollment's scheduled sessions.
//!
//! Dates are computed from the rows as they were before any write, so a row
//! moved by this batch is never moved a second time.

use chrono::{Days, NaiveDate};

use crate::model::{DateShift, DeferMode, ScheduleError, ScheduledPractice};

fn one_day_later(row: &ScheduledPractice) -> Result<DateShift, ScheduleError> {
    let from = row.scheduled_date;
    let to = from
        .checked_add_days(Days::new(1))
        .ok_or(ScheduleError::DateOutOfRange { date: from, days: 1 })?;
    Ok(DateShift { id: row.id, from, to })
}

/// Plan the date changes for deferring `rows` (one enrollment's queue).
///
/// - `Push` moves only the earliest not-yet-started row dated today or before
///   by one day, shrinking the gap to the following session. Ties go to the
///   lowest id. Rows already linked to a session record history and stay put.
/// - `Shift` moves every row dated today or later by one day, keeping their
///   relative spacing.
///
/// An empty result means there was nothing to move.
///
/// # Errors
///
/// Returns `ScheduleError::DateOutOfRange` if a date cannot be moved forward.
pub fn plan_deferral(
    rows: &[ScheduledPractice],
    today: NaiveDate,
    mode: DeferMode,
) -> Result<Vec<DateShift>, ScheduleError> {
    match mode {
        DeferMode::Push => {
            let earliest = rows
                .iter()
                .filter(|r| r.practice_instance_id.is_none() && r.scheduled_date <= today)
                .min_by_key(|r| (r.scheduled_date, r.id));
            earliest.map(one_day_later).into_iter().collect()
        }
        DeferMode::Shift => rows
            .iter()
            .filter(|r| r.scheduled_date >= today)
            .map(one_day_later)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnrollmentId, PracticeInstanceId, PracticeTemplateId, ScheduledPracticeId};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn row(id: u64, date: NaiveDate) -> ScheduledPractice {
        ScheduledPractice {
            id: ScheduledPracticeId::new(id),
            enrollment_id: EnrollmentId::new(1),
            practice_template_id: PracticeTemplateId::new(1),
            practice_instance_id: None,
            scheduled_date: date,
        }
    }

    fn apply(rows: &[ScheduledPractice], shifts: &[DateShift]) -> Vec<NaiveDate> {
        rows.iter()
            .map(|r| {
                shifts
                    .iter()
                    .find(|s| s.id == r.id)
                    .map_or(r.scheduled_date, |s| s.to)
            })
            .collect()
    }

    #[test]
    fn push_moves_only_todays_session() {
        let rows = vec![row(1, d(10)), row(2, d(12)), row(3, d(15))];
        let shifts = plan_deferral(&rows, d(10), DeferMode::Push).unwrap();
        assert_eq!(apply(&rows, &shifts), vec![d(11), d(12), d(15)]);
    }

    #[test]
    fn shift_translates_the_remaining_queue() {
        let rows = vec![row(1, d(10)), row(2, d(12)), row(3, d(15))];
        let shifts = plan_deferral(&rows, d(10), DeferMode::Shift).unwrap();
        assert_eq!(apply(&rows, &shifts), vec![d(11), d(13), d(16)]);
    }

    #[test]
    fn shift_does_not_cascade_into_adjacent_rows() {
        // Back-to-back days: each row moves exactly once.
        let rows = vec![row(1, d(10)), row(2, d(11)), row(3, d(12))];
        let shifts = plan_deferral(&rows, d(10), DeferMode::Shift).unwrap();
        assert_eq!(shifts.len(), 3);
        assert_eq!(apply(&rows, &shifts), vec![d(11), d(12), d(13)]);
    }

    #[test]
    fn push_picks_the_earliest_overdue_row() {
        let rows = vec![row(5, d(10)), row(4, d(8)), row(6, d(8))];
        let shifts = plan_deferral(&rows, d(10), DeferMode::Push).unwrap();
        assert_eq!(
            shifts,
            vec![DateShift {
                id: ScheduledPracticeId::new(4),
                from: d(8),
                to: d(9),
            }]
        );
    }

    #[test]
    fn push_skips_rows_already_started() {
        let mut done = row(1, d(8));
        done.practice_instance_id = Some(PracticeInstanceId::new(7));
        let rows = vec![done, row(2, d(10)), row(3, d(13))];
        let shifts = plan_deferral(&rows, d(10), DeferMode::Push).unwrap();
        assert_eq!(apply(&rows, &shifts), vec![d(8), d(11), d(13)]);

        let rows = vec![rows[0].clone(), row(3, d(13))];
        assert!(plan_deferral(&rows, d(10), DeferMode::Push).unwrap().is_empty());
    }

    #[test]
    fn shift_ignores_past_rows() {
        let rows = vec![row(1, d(3)), row(2, d(10))];
        let shifts = plan_deferral(&rows, d(5), DeferMode::Shift).unwrap();
        assert_eq!(apply(&rows, &shifts), vec![d(3), d(11)]);
    }

    #[test]
    fn nothing_due_means_nothing_to_push() {
        let rows = vec![row(1, d(20))];
        assert!(plan_deferral(&rows, d(10), DeferMode::Push).unwrap().is_empty());
        assert!(plan_deferral(&[], d(10), DeferMode::Shift).unwrap().is_empty());
    }
}
