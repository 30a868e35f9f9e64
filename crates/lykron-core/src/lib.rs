//! `lykron-core`, shared types for the lykron daemon.
//!
//! Holds the pieces every other crate needs: the [`Timeset`] recurrence
//! masks and their next-occurrence search, the [`CronJob`] record, daemon
//! configuration, and the shared error enum.

pub mod config;
pub mod error;
pub mod schedule;
pub mod types;

pub use config::LykronConfig;
pub use error::{CoreError, Result};
pub use types::{CronJob, Field, JobId, Timeset};
