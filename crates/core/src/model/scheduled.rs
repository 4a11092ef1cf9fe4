use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{EnrollmentId, PracticeInstanceId, PracticeTemplateId, ScheduledPracticeId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScheduleError {
    #[error("unknown deferral mode {0:?}; expected \"push\" or \"shift\"")]
    UnknownDeferMode(String),

    #[error("date {date} plus {days} day(s) is out of range")]
    DateOutOfRange { date: NaiveDate, days: u32 },
}

/// Calendar entry: the enrollment owes a session from `practice_template_id`
/// on `scheduled_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledPractice {
    pub id: ScheduledPracticeId,
    pub enrollment_id: EnrollmentId,
    pub practice_template_id: PracticeTemplateId,
    pub practice_instance_id: Option<PracticeInstanceId>,
    pub scheduled_date: NaiveDate,
}

/// A row about to be scheduled; the enrollment is supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewScheduledPractice {
    pub practice_template_id: PracticeTemplateId,
    pub scheduled_date: NaiveDate,
}

/// How to postpone an enrollment's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferMode {
    /// Move only the earliest session due today (or overdue) by one day.
    Push,
    /// Move every session from today on by one day.
    Shift,
}

impl DeferMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Shift => "shift",
        }
    }
}

impl fmt::Display for DeferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeferMode {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Self::Push),
            "shift" => Ok(Self::Shift),
            other => Err(ScheduleError::UnknownDeferMode(other.to_owned())),
        }
    }
}

/// A planned date change for one scheduled row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateShift {
    pub id: ScheduledPracticeId,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defer_mode_parses_known_values_only() {
        assert_eq!("push".parse::<DeferMode>().unwrap(), DeferMode::Push);
        assert_eq!("shift".parse::<DeferMode>().unwrap(), DeferMode::Shift);
        assert_eq!(
            "Push".parse::<DeferMode>().unwrap_err(),
            ScheduleError::UnknownDeferMode("Push".into())
        );
    }
}
