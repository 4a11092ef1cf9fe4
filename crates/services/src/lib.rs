#![forbid(unsafe_code)]

pub mod app_services;
pub mod cascade;
pub mod error;
pub mod materializer;
pub mod progress;
pub mod scheduler;

pub use coach_core::Clock;

pub use app_services::CoachServices;
pub use cascade::{CascadeReport, CascadeService};
pub use error::{AppServicesError, ErrorKind, ServiceError};
pub use materializer::{Added, MaterializerService};
pub use progress::{AdvanceOutcome, ProgressService};
pub use scheduler::SchedulerService;
