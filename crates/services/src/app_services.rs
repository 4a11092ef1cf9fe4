use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::cascade::CascadeService;
use crate::error::AppServicesError;
use crate::materializer::MaterializerService;
use crate::progress::ProgressService;
use crate::scheduler::SchedulerService;

/// Assembles the coaching services over one storage backend.
#[derive(Clone)]
pub struct CoachServices {
    storage: Storage,
    materializer: Arc<MaterializerService>,
    cascade: Arc<CascadeService>,
    progress: Arc<ProgressService>,
    scheduler: Arc<SchedulerService>,
}

impl CoachServices {
    /// Wire every service to `storage`, sharing one clock.
    #[must_use]
    pub fn from_storage(storage: Storage, clock: Clock) -> Self {
        let cascade = Arc::new(CascadeService::new(clock, Arc::clone(&storage.instances)));
        let materializer = Arc::new(MaterializerService::new(
            clock,
            Arc::clone(&storage.templates),
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.schedule),
            Arc::clone(&storage.instances),
            Arc::clone(&cascade),
        ));
        let progress = Arc::new(ProgressService::new(
            clock,
            Arc::clone(&storage.programs),
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.schedule),
            Arc::clone(&storage.instances),
        ));
        let scheduler = Arc::new(SchedulerService::new(
            clock,
            Arc::clone(&storage.enrollments),
            Arc::clone(&storage.schedule),
        ));

        Self {
            storage,
            materializer,
            cascade,
            progress,
            scheduler,
        }
    }

    /// Build services backed by the in-memory store.
    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::from_storage(Storage::in_memory(), clock)
    }

    /// Build services backed by `SQLite` storage, running migrations first.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(storage, clock))
    }

    /// Raw repositories, for fixtures and seeding.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn materializer(&self) -> Arc<MaterializerService> {
        Arc::clone(&self.materializer)
    }

    #[must_use]
    pub fn cascade(&self) -> Arc<CascadeService> {
        Arc::clone(&self.cascade)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn scheduler(&self) -> Arc<SchedulerService> {
        Arc::clone(&self.scheduler)
    }
}
