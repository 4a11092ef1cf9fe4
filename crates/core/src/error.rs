use thiserror::Error;

use crate::cascade::CascadeError;
use crate::model::{CompletionError, DraftError, EnrollmentError, ProgramError, ScheduleError};
use crate::progress::ProgressError;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Cascade(#[from] CascadeError),
}
