//! `kairos-core`: configuration shared by the scheduler and the demo binary.

pub mod config;
pub mod error;

pub use config::{KairosConfig, LoggingConfig, SchedulerConfig};
pub use error::{CoreError, Result};
