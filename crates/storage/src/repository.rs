use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use coach_core::cascade::{CascadeEdit, InstanceWrite};
use coach_core::model::{
    Completion, DateShift, EnrollmentId, EnrollmentStatus, InstanceNode, MovementInstance,
    MovementInstanceId, MovementTemplate, MovementTemplateId, NewEnrollment, NewMovementInstance,
    NewPracticeInstance, NewPrescriptionInstance, NewProgram, NewScheduledPractice, NewSetInstance,
    PracticeHeader, PracticeInstance, PracticeInstanceId, PracticeOutline, PracticeTemplate,
    PracticeTemplateId, PrescriptionInstance, PrescriptionInstanceId, PrescriptionTemplate,
    PrescriptionTemplateId, Program, ProgramEnrollment, ProgramId, ProgramPracticeLinkId,
    ScheduledPractice, ScheduledPracticeId, SetInstance, SetInstanceId, SetTemplate, SetTemplateId,
    UserId,
};
use thiserror::Error;

use crate::memory::InMemoryRepository;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A compare-and-set commit lost against a concurrent writer.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── COMMITS ───────────────────────────────────────────────────────────────────
//

/// Status change of an enrollment, conditional on `expected_revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub enrollment_id: EnrollmentId,
    pub expected_revision: u64,
    pub status: EnrollmentStatus,
    /// Delete not-yet-started scheduled rows dated on or after this day.
    pub clear_unstarted_from: Option<NaiveDate>,
}

/// Everything one advancement writes, committed as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceCommit {
    pub enrollment_id: EnrollmentId,
    pub expected_revision: u64,
    pub status: EnrollmentStatus,
    pub current_practice_link_id: Option<ProgramPracticeLinkId>,
    /// Completion declared on the session just finished.
    pub practice_completion: Option<(PracticeInstanceId, Completion)>,
    /// Row owed for the link being entered.
    pub schedule: Option<NewScheduledPractice>,
}

/// A node appended to a session tree, with the cascade committed alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cascaded<T> {
    /// The node as stored after the cascade ran.
    pub node: T,
    pub writes: Vec<InstanceWrite>,
}

/// An enrollment as committed, with the scheduled row written alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentCommit {
    pub enrollment: ProgramEnrollment,
    pub scheduled: Option<ScheduledPractice>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Read access to the template library.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Fetch a practice template with its whole tree.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_practice_template(
        &self,
        id: PracticeTemplateId,
    ) -> Result<PracticeTemplate, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_prescription_template(
        &self,
        id: PrescriptionTemplateId,
    ) -> Result<PrescriptionTemplate, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_movement_template(
        &self,
        id: MovementTemplateId,
    ) -> Result<MovementTemplate, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_set_template(&self, id: SetTemplateId) -> Result<SetTemplate, StorageError>;

    /// Store a template tree. Used for fixtures and seeding.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the tree cannot be stored.
    async fn insert_practice_template(
        &self,
        outline: &PracticeOutline,
    ) -> Result<PracticeTemplate, StorageError>;
}

#[async_trait]
pub trait ProgramRepository: Send + Sync {
    /// Fetch a program with its links in session order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_program(&self, id: ProgramId) -> Result<Program, StorageError>;

    /// Store a program and its links.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if a link names a missing template.
    async fn insert_program(&self, program: &NewProgram) -> Result<Program, StorageError>;
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_enrollment(&self, id: EnrollmentId) -> Result<ProgramEnrollment, StorageError>;

    /// Enrollments of `user`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_enrollments_for_user(
        &self,
        user: UserId,
    ) -> Result<Vec<ProgramEnrollment>, StorageError>;

    /// Create an enrollment and its first scheduled row in one commit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the program or template is missing.
    async fn create_enrollment(
        &self,
        enrollment: &NewEnrollment,
        first: NewScheduledPractice,
    ) -> Result<EnrollmentCommit, StorageError>;

    /// Apply a status change and bump the revision.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the revision moved since it was read.
    async fn update_status(
        &self,
        change: &StatusChange,
    ) -> Result<ProgramEnrollment, StorageError>;

    /// Commit an advancement and bump the revision.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the revision moved since it was
    /// read, or `StorageError::NotFound` if the practice instance is missing.
    async fn commit_advance(
        &self,
        commit: &AdvanceCommit,
    ) -> Result<EnrollmentCommit, StorageError>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Rows of the given enrollments dated on or after `from`, by date then id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_scheduled(
        &self,
        enrollment_ids: &[EnrollmentId],
        from: NaiveDate,
    ) -> Result<Vec<ScheduledPractice>, StorageError>;

    /// Every row of one enrollment, by date then id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn list_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<ScheduledPractice>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_scheduled(
        &self,
        id: ScheduledPracticeId,
    ) -> Result<ScheduledPractice, StorageError>;

    /// Move rows to their new dates and bump the enrollment revision.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the revision moved since it was
    /// read, or `StorageError::NotFound` if a row is not the enrollment's.
    async fn apply_deferral(
        &self,
        enrollment_id: EnrollmentId,
        expected_revision: u64,
        shifts: &[DateShift],
    ) -> Result<ProgramEnrollment, StorageError>;

    /// Insert the session tree and link it to the row in one commit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the row was linked meanwhile.
    async fn start_scheduled(
        &self,
        id: ScheduledPracticeId,
        practice: &NewPracticeInstance,
    ) -> Result<PracticeInstance, StorageError>;
}

/// The instance hierarchy.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Insert a whole session tree in one commit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the tree cannot be stored; nothing is kept.
    async fn insert_practice_tree(
        &self,
        practice: &NewPracticeInstance,
    ) -> Result<PracticeInstance, StorageError>;

    /// Append a prescription subtree after the existing ones and cascade.
    ///
    /// The insert and the flag writes it causes commit together.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the practice is missing; nothing is
    /// kept on any error.
    async fn append_prescription(
        &self,
        practice_id: PracticeInstanceId,
        node: &NewPrescriptionInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<PrescriptionInstance>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the prescription is missing; nothing
    /// is kept on any error.
    async fn append_movement(
        &self,
        prescription_id: PrescriptionInstanceId,
        node: &NewMovementInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<MovementInstance>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the movement is missing; nothing is
    /// kept on any error.
    async fn append_set(
        &self,
        movement_id: MovementInstanceId,
        node: &NewSetInstance,
        now: DateTime<Utc>,
    ) -> Result<Cascaded<SetInstance>, StorageError>;

    /// Full tree with children ordered by position.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_practice_tree(
        &self,
        id: PracticeInstanceId,
    ) -> Result<PracticeInstance, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_practice_header(
        &self,
        id: PracticeInstanceId,
    ) -> Result<PracticeHeader, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_set(&self, id: SetInstanceId) -> Result<SetInstance, StorageError>;

    /// User owning the practice the node belongs to.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the node is missing.
    async fn instance_owner(&self, node: InstanceNode) -> Result<UserId, StorageError>;

    /// Apply `edit` and the cascade it triggers as one unit.
    ///
    /// The snapshots are read, planned with `coach_core::cascade::plan_edit`
    /// and written while concurrent edits of the same tree wait, so sibling
    /// updates always converge. Returns the writes, leaf write first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if a node the edit touches is missing;
    /// nothing is applied in that case.
    async fn apply_edit(
        &self,
        edit: CascadeEdit,
        now: DateTime<Utc>,
    ) -> Result<Vec<InstanceWrite>, StorageError>;
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub templates: Arc<dyn TemplateRepository>,
    pub programs: Arc<dyn ProgramRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub schedule: Arc<dyn ScheduleRepository>,
    pub instances: Arc<dyn InstanceRepository>,
}

impl Storage {
    /// Build a `Storage` whose handles all share one backend.
    #[must_use]
    pub fn from_backend<R>(repo: R) -> Self
    where
        R: TemplateRepository
            + ProgramRepository
            + EnrollmentRepository
            + ScheduleRepository
            + InstanceRepository
            + Clone
            + 'static,
    {
        let templates: Arc<dyn TemplateRepository> = Arc::new(repo.clone());
        let programs: Arc<dyn ProgramRepository> = Arc::new(repo.clone());
        let enrollments: Arc<dyn EnrollmentRepository> = Arc::new(repo.clone());
        let schedule: Arc<dyn ScheduleRepository> = Arc::new(repo.clone());
        let instances: Arc<dyn InstanceRepository> = Arc::new(repo);
        Self {
            templates,
            programs,
            enrollments,
            schedule,
            instances,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(InMemoryRepository::new())
    }
}
