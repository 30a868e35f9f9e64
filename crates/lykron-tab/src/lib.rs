//! `lykron-tab`, crontab parsing, the table registry, and change
//! detection.
//!
//! Tables come in two shapes: the system-wide file, whose entries carry
//! a user column, and per-user files named after their owner. The
//! [`TabRegistry`] loads them all and flattens them into an indexed
//! [`JobSpec`] list for the scheduler; [`watcher`] reports file changes
//! so the daemon can reload.

pub mod error;
pub mod parser;
pub mod table;
pub mod watcher;

pub use error::{Result, TabError};
pub use parser::{parse_source, ParsedTab, TabKind};
pub use table::{CronTab, JobSpec, TabRegistry};
pub use watcher::{poll_tables, watch_tables, TabEvent};
