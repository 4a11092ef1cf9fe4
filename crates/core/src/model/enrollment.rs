use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{EnrollmentId, ProgramId, ProgramPracticeLinkId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EnrollmentError {
    #[error("cannot move enrollment from {from} to {to}")]
    InvalidTransition {
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },

    #[error("enrollment is {0}; it must be active")]
    NotActive(EnrollmentStatus),

    #[error("enrollment is already {0}")]
    Terminal(EnrollmentStatus),

    #[error("invalid enrollment status: {0}")]
    InvalidStatus(String),

    #[error("completed enrollment cannot keep a current link")]
    CompletedWithPointer,
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle of an enrollment.
///
/// `pending → active → {completed, cancelled}` with `active ⇄ inactive`
/// (pause/resume). `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    Active,
    Inactive,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether a status update may move from `self` to `to`.
    ///
    /// `completed` is only reachable by advancing past the last link, so it is
    /// never a valid target here.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use EnrollmentStatus::{Active, Cancelled, Inactive, Pending};
        matches!(
            (self, to),
            (Pending, Active | Cancelled) | (Active, Inactive | Cancelled) | (Inactive, Active | Cancelled)
        )
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = EnrollmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EnrollmentError::InvalidStatus(other.to_owned())),
        }
    }
}

//
// ─── ENROLLMENT ────────────────────────────────────────────────────────────────
//

/// A user's progress through one program.
///
/// `revision` is the optimistic-concurrency token: every committed mutation
/// bumps it, and every commit is conditional on the revision it was planned
/// against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramEnrollment {
    id: EnrollmentId,
    program_id: ProgramId,
    user_id: UserId,
    enrolled_by_user_id: UserId,
    status: EnrollmentStatus,
    current_practice_link_id: Option<ProgramPracticeLinkId>,
    revision: u64,
}

impl ProgramEnrollment {
    /// Rehydrate an enrollment from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::CompletedWithPointer` if a completed
    /// enrollment still points at a link.
    pub fn from_persisted(
        id: EnrollmentId,
        program_id: ProgramId,
        user_id: UserId,
        enrolled_by_user_id: UserId,
        status: EnrollmentStatus,
        current_practice_link_id: Option<ProgramPracticeLinkId>,
        revision: u64,
    ) -> Result<Self, EnrollmentError> {
        if status == EnrollmentStatus::Completed && current_practice_link_id.is_some() {
            return Err(EnrollmentError::CompletedWithPointer);
        }
        Ok(Self {
            id,
            program_id,
            user_id,
            enrolled_by_user_id,
            status,
            current_practice_link_id,
            revision,
        })
    }

    #[must_use]
    pub fn id(&self) -> EnrollmentId {
        self.id
    }

    #[must_use]
    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn enrolled_by_user_id(&self) -> UserId {
        self.enrolled_by_user_id
    }

    #[must_use]
    pub fn status(&self) -> EnrollmentStatus {
        self.status
    }

    #[must_use]
    pub fn current_practice_link_id(&self) -> Option<ProgramPracticeLinkId> {
        self.current_practice_link_id
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.user_id == user
    }

    /// Owner or the coach who enrolled them.
    #[must_use]
    pub fn is_managed_by(&self, user: UserId) -> bool {
        self.user_id == user || self.enrolled_by_user_id == user
    }

    /// Validate a status update.
    ///
    /// Returns `Ok(false)` when `to` equals the current status (nothing to do).
    ///
    /// # Errors
    ///
    /// Returns `EnrollmentError::Terminal` for a terminal enrollment and
    /// `EnrollmentError::InvalidTransition` for any other disallowed move.
    pub fn check_transition(&self, to: EnrollmentStatus) -> Result<bool, EnrollmentError> {
        if self.status == to {
            return Ok(false);
        }
        if self.status.is_terminal() {
            return Err(EnrollmentError::Terminal(self.status));
        }
        if !self.status.can_transition_to(to) {
            return Err(EnrollmentError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(true)
    }
}

/// An enrollment about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnrollment {
    pub program_id: ProgramId,
    pub user_id: UserId,
    pub enrolled_by_user_id: UserId,
    pub status: EnrollmentStatus,
    pub current_practice_link_id: Option<ProgramPracticeLinkId>,
}

impl NewEnrollment {
    /// Self-enrollment starts active; a coach enrollment waits for the user.
    #[must_use]
    pub fn new(
        program_id: ProgramId,
        user_id: UserId,
        enrolled_by_user_id: UserId,
        first_link: Option<ProgramPracticeLinkId>,
    ) -> Self {
        let status = if user_id == enrolled_by_user_id {
            EnrollmentStatus::Active
        } else {
            EnrollmentStatus::Pending
        };
        Self {
            program_id,
            user_id,
            enrolled_by_user_id,
            status,
            current_practice_link_id: first_link,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
