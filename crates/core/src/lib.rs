#![forbid(unsafe_code)]

pub mod cascade;
pub mod deferral;
pub mod error;
pub mod materialize;
pub mod model;
pub mod progress;
pub mod time;

pub use error::Error;
pub use time::Clock;
