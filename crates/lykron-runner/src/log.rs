//! Job output logging.
//!
//! After a child exits, its capture files are drained into the daemon's
//! structured log line by line and then removed. Stderr lines and
//! non-zero exits log at warn.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::ExitStatus;

use lykron_core::JobId;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct JobLogger;

impl JobLogger {
    pub fn log_reaped(
        &self,
        id: JobId,
        pid: u32,
        stdout_path: &Path,
        stderr_path: &Path,
        status: ExitStatus,
    ) {
        for line in read_lines(stdout_path) {
            info!(job = %id, pid, "stdout: {line}");
        }
        for line in read_lines(stderr_path) {
            warn!(job = %id, pid, "stderr: {line}");
        }

        if status.success() {
            debug!(job = %id, pid, "job exited cleanly");
        } else {
            warn!(job = %id, pid, code = status.code(), "job failed");
        }

        remove_quietly(stdout_path);
        remove_quietly(stderr_path);
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    let Ok(file) = File::open(path) else {
        warn!(path = %path.display(), "capture file missing");
        return Vec::new();
    };
    BufReader::new(file)
        .lines()
        .map_while(|l| l.ok())
        .filter(|l| !l.is_empty())
        .collect()
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove capture file");
    }
}
