//! Shared error types for the services crate.

use std::fmt;

use thiserror::Error;

use coach_core::cascade::CascadeError;
use coach_core::model::{
    CompletionError, DraftError, EnrollmentError, ProgramError, ScheduleError, UserId,
};
use coach_core::progress::ProgressError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Coarse classification of a `ServiceError`, for callers that map errors
/// onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Authorization,
    Validation,
    Conflict,
    StorageFailure,
}

/// Errors emitted by every service operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("user {actor} is not allowed to access {entity} {id}")]
    Authorization {
        actor: UserId,
        entity: &'static str,
        id: String,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    /// A concurrent writer got there first; re-read and retry.
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: &'static str, id: String },

    #[error(transparent)]
    Storage(StorageError),
}

impl ServiceError {
    pub(crate) fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn forbidden(actor: UserId, entity: &'static str, id: impl fmt::Display) -> Self {
        Self::Authorization {
            actor,
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::StorageFailure,
        }
    }

    /// Only a lost compare-and-set race is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::not_found("record", "?"),
            StorageError::Conflict => Self::Conflict {
                entity: "record",
                id: "?".into(),
            },
            other => Self::Storage(other),
        }
    }
}

/// Attach the entity being operated on to storage failures.
pub(crate) trait StorageContext<T> {
    fn context(self, entity: &'static str, id: impl fmt::Display) -> Result<T, ServiceError>;
}

impl<T> StorageContext<T> for Result<T, StorageError> {
    fn context(self, entity: &'static str, id: impl fmt::Display) -> Result<T, ServiceError> {
        self.map_err(|err| match err {
            StorageError::NotFound => ServiceError::not_found(entity, id),
            StorageError::Conflict => ServiceError::Conflict {
                entity,
                id: id.to_string(),
            },
            other => ServiceError::Storage(other),
        })
    }
}

macro_rules! validation_from {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for ServiceError {
                fn from(err: $source) -> Self {
                    Self::Validation(err.to_string())
                }
            }
        )+
    };
}

validation_from!(
    CompletionError,
    DraftError,
    EnrollmentError,
    ProgramError,
    ScheduleError,
    CascadeError,
    serde_json::Error,
);

impl From<ProgressError> for ServiceError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::Program(ProgramError::UnknownLink { link, .. }) => {
                Self::not_found("program link", link)
            }
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<coach_core::Error> for ServiceError {
    fn from(err: coach_core::Error) -> Self {
        match err {
            coach_core::Error::Progress(inner) => inner.into(),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Errors emitted while bootstrapping `CoachServices`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
