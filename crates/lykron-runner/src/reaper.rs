//! The reaper loop: waits on spawned children and routes their output
//! and exit status to the [`JobLogger`].
//!
//! Each child gets its own wait task so a long-running job never delays
//! reaping the others. Dropping the sender side shuts the loop down
//! once every outstanding child has been collected.

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::exec::RunningChild;
use crate::log::JobLogger;

pub struct ReaperLoop {
    rx: mpsc::Receiver<RunningChild>,
    logger: JobLogger,
}

impl ReaperLoop {
    pub fn new(rx: mpsc::Receiver<RunningChild>, logger: JobLogger) -> Self {
        Self { rx, logger }
    }

    pub async fn run(mut self) {
        let mut waits = JoinSet::new();
        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(rc) => {
                        waits.spawn(reap_one(rc, self.logger));
                    }
                    None => break,
                },
                Some(res) = waits.join_next(), if !waits.is_empty() => {
                    if let Err(e) = res {
                        warn!(error = %e, "reap task failed");
                    }
                }
            }
        }

        // Collect whatever is still running before going down.
        while let Some(res) = waits.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "reap task failed");
            }
        }
        info!("reaper stopped");
    }
}

async fn reap_one(mut rc: RunningChild, logger: JobLogger) {
    match rc.child.wait().await {
        Ok(status) => {
            logger.log_reaped(rc.id, rc.pid, &rc.stdout_path, &rc.stderr_path, status);
        }
        Err(e) => warn!(job = %rc.id, pid = rc.pid, error = %e, "wait failed"),
    }
}
