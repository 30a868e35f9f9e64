//! `lykron-runner`, job execution, reaping, and output logging.
//!
//! The [`JobRunner`] spawns each due job as `shell -c command` with its
//! table environment and optional user switch, capturing output to
//! per-child files. The [`ReaperLoop`] collects exits and the
//! [`JobLogger`] turns captured output into structured log lines.

pub mod error;
pub mod exec;
pub mod log;
pub mod reaper;

pub use error::{Result, RunnerError};
pub use exec::{JobRunner, RunningChild};
pub use log::JobLogger;
pub use reaper::ReaperLoop;
