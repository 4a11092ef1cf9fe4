use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompletionError {
    #[error("completed_at must be set when complete is true")]
    MissingTimestamp,

    #[error("completed_at must be empty when complete is false")]
    UnexpectedTimestamp,
}

/// Completion flag of an instance node.
///
/// `completed_at` is non-null iff `complete` is true. It is stamped on the
/// false→true transition and cleared on true→false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Completion {
    complete: bool,
    completed_at: Option<DateTime<Utc>>,
}

impl Completion {
    /// A node that has not been completed.
    #[must_use]
    pub fn incomplete() -> Self {
        Self::default()
    }

    /// A node completed at `at`.
    #[must_use]
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            complete: true,
            completed_at: Some(at),
        }
    }

    /// Rehydrate from persisted columns.
    ///
    /// # Errors
    ///
    /// Returns `CompletionError` if the flag and the timestamp disagree.
    pub fn from_persisted(
        complete: bool,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, CompletionError> {
        match (complete, completed_at) {
            (true, None) => Err(CompletionError::MissingTimestamp),
            (false, Some(_)) => Err(CompletionError::UnexpectedTimestamp),
            _ => Ok(Self {
                complete,
                completed_at,
            }),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the new completion if setting the flag to `complete` changes it.
    ///
    /// `None` means the stored value already matches and nothing must be
    /// written; the existing timestamp is left untouched in that case.
    #[must_use]
    pub fn transition(&self, complete: bool, now: DateTime<Utc>) -> Option<Self> {
        match (self.complete, complete) {
            (false, true) => Some(Self::completed(now)),
            (true, false) => Some(Self::incomplete()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn stamps_on_false_to_true_and_clears_on_true_to_false() {
        let now = fixed_now();
        let done = Completion::incomplete().transition(true, now).unwrap();
        assert!(done.is_complete());
        assert_eq!(done.completed_at(), Some(now));

        let undone = done.transition(false, now).unwrap();
        assert_eq!(undone, Completion::incomplete());
    }

    #[test]
    fn unchanged_flag_keeps_original_timestamp() {
        let first = fixed_now();
        let done = Completion::completed(first);
        assert!(done.transition(true, first + Duration::hours(1)).is_none());
        assert!(Completion::incomplete().transition(false, first).is_none());
    }

    #[test]
    fn persisted_values_must_agree() {
        let now = fixed_now();
        assert_eq!(
            Completion::from_persisted(true, None).unwrap_err(),
            CompletionError::MissingTimestamp
        );
        assert_eq!(
            Completion::from_persisted(false, Some(now)).unwrap_err(),
            CompletionError::UnexpectedTimestamp
        );
        assert!(Completion::from_persisted(true, Some(now)).is_ok());
    }
}
