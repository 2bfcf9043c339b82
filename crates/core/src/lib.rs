pub mod config;
pub mod error;

pub use config::{Config, SchedulerConfig, WorkerConfig};
pub use error::*;
