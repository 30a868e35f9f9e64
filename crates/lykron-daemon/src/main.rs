//! `lykrond`, the lykron daemon binary.
//!
//! Wires the pieces together: loads config and tables, seeds the
//! scheduler wheel, and runs the dispatch loop that turns firings into
//! spawned jobs, table changes into wheel reloads, and signals into a
//! clean shutdown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

use lykron_core::config::{LykronConfig, WatchMode};
use lykron_core::{schedule, JobId, Timeset};
use lykron_runner::{JobLogger, JobRunner, ReaperLoop};
use lykron_tab::{JobSpec, TabEvent, TabRegistry};
use lykron_wheel::{ControlMsg, Firing, NextOccurrence, SchedulerLoop, SystemClock, Wheel};

mod pidfile;
use pidfile::PidFile;

#[derive(Parser, Debug)]
#[command(name = "lykrond", version, about = "Cron-style job scheduling daemon")]
struct Cli {
    /// Path to lykron.toml
    #[arg(long)]
    config: Option<String>,

    /// Override the pid file location
    #[arg(long)]
    pid_file: Option<String>,

    /// Override the system table file
    #[arg(long)]
    tab_file: Option<String>,

    /// Per-user table directory (repeatable; replaces the configured set)
    #[arg(long)]
    tab_dir: Vec<String>,

    /// Table change detection: notify, poll, or off
    #[arg(long)]
    watch: Option<String>,
}

/// What the wheel carries per event. Self-contained so the recurrence
/// callback never needs the job table. The generation names the table
/// snapshot the id indexes into; it changes with every reload.
#[derive(Debug, Clone)]
struct JobPayload {
    id: JobId,
    generation: u64,
    timeset: Timeset,
    reboot: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lykron=info,lykrond=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = LykronConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        LykronConfig::default()
    });
    apply_overrides(&mut config, &cli)?;

    run(config).await
}

fn apply_overrides(config: &mut LykronConfig, cli: &Cli) -> anyhow::Result<()> {
    if let Some(ref path) = cli.pid_file {
        config.daemon.pid_file = path.clone();
    }
    if let Some(ref path) = cli.tab_file {
        config.tabs.system_file = path.clone();
    }
    if !cli.tab_dir.is_empty() {
        config.tabs.dirs = cli.tab_dir.clone();
    }
    if let Some(ref mode) = cli.watch {
        config.tabs.watch = match mode.as_str() {
            "notify" => WatchMode::Notify,
            "poll" => WatchMode::Poll,
            "off" => WatchMode::Off,
            other => anyhow::bail!("unknown watch mode {other:?}"),
        };
    }
    Ok(())
}

async fn run(config: LykronConfig) -> anyhow::Result<()> {
    let _pid = match PidFile::write(Path::new(&config.daemon.pid_file)) {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!(path = %config.daemon.pid_file, error = %e, "could not write pid file");
            None
        }
    };

    let system_file = PathBuf::from(&config.tabs.system_file);
    let dirs: Vec<PathBuf> = config.tabs.dirs.iter().map(PathBuf::from).collect();
    let mut registry = TabRegistry::new(system_file.clone(), dirs.clone());
    registry.load_all();
    let mut specs = registry.snapshot();

    // Scheduler loop: owns the wheel, reports firings over a channel.
    let now = Utc::now().timestamp();
    let wheel = Wheel::new(
        config.scheduler.interval_width_secs,
        config.scheduler.num_buckets,
        now,
    )
    .with_fanout_limit(config.scheduler.fanout_limit);

    let (fire_tx, mut fire_rx) = mpsc::channel::<Firing<JobPayload>>(256);
    let (control_tx, control_rx) = mpsc::channel(16);
    let next: NextOccurrence<JobPayload> = Box::new(|payload, after| {
        if payload.reboot {
            None
        } else {
            next_fire(&payload.timeset, after)
        }
    });
    let mut generation = 0_u64;
    let mut sched = SchedulerLoop::new(wheel, SystemClock, next, fire_tx, control_rx);
    sched.seed(seed_entries(&specs, now, true, generation));
    let sched_task = tokio::spawn(sched.run());

    // Runner and reaper.
    let output_dir = config
        .runner
        .output_dir
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let runner = JobRunner::new(config.runner.shell.clone(), output_dir)?;
    let (reap_tx, reap_rx) = mpsc::channel(256);
    let reaper_task = tokio::spawn(ReaperLoop::new(reap_rx, JobLogger).run());

    // Table change detection. The notify watcher must stay alive for
    // the daemon's lifetime.
    let (tab_tx, mut tab_rx) = mpsc::channel::<TabEvent>(64);
    let _watcher = match config.tabs.watch {
        WatchMode::Notify => match lykron_tab::watch_tables(&system_file, &dirs, tab_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "failed to start table watcher, reloads disabled");
                None
            }
        },
        WatchMode::Poll => {
            tokio::spawn(lykron_tab::poll_tables(
                system_file.clone(),
                dirs.clone(),
                Duration::from_secs(config.tabs.poll_interval_secs),
                tab_tx,
            ));
            None
        }
        WatchMode::Off => None,
    };

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    info!(jobs = specs.len(), "lykrond running");

    loop {
        tokio::select! {
            Some(firing) = fire_rx.recv() => {
                let Some(spec) = resolve_firing(&specs, generation, &firing.payload) else {
                    warn!(job = %firing.payload.id, "dropping firing, tables changed since it was scheduled");
                    continue;
                };
                match runner.spawn(spec.id, &spec.job, &spec.env) {
                    Ok(rc) => {
                        if reap_tx.send(rc).await.is_err() {
                            warn!("reaper channel closed");
                        }
                    }
                    Err(e) => warn!(job = %spec.id, error = %e, "failed to run job"),
                }
            }
            Some(event) = tab_rx.recv() => {
                let (TabEvent::Changed(path) | TabEvent::Removed(path)) = event;
                registry.reload(&path);
                specs = registry.snapshot();
                generation += 1;
                let now = Utc::now().timestamp();
                let entries = seed_entries(&specs, now, false, generation);
                if control_tx.send(ControlMsg::Replace(entries)).await.is_err() {
                    break;
                }
            }
            _ = sigint.recv() => {
                info!("SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM, shutting down");
                break;
            }
        }
    }

    let _ = control_tx.send(ControlMsg::Shutdown).await;
    let _ = sched_task.await;
    drop(reap_tx);
    let _ = reaper_task.await;
    info!("lykrond stopped");
    Ok(())
}

fn next_fire(ts: &Timeset, after: i64) -> Option<i64> {
    let after = Utc.timestamp_opt(after, 0).single()?;
    schedule::next_occurrence(ts, after).map(|t| t.timestamp())
}

/// Match a firing against the current snapshot. Ids are dense indices,
/// so after a reload an old id may still index the new snapshot and
/// name a different job; a firing scheduled against a superseded
/// generation is therefore dropped, never resolved.
fn resolve_firing<'a>(
    specs: &'a [JobSpec],
    generation: u64,
    payload: &JobPayload,
) -> Option<&'a JobSpec> {
    if payload.generation != generation {
        return None;
    }
    specs.get(payload.id.index())
}

/// First fire time for every schedulable job. `@reboot` entries are
/// included only at daemon start, pinned to `now`; a table reload never
/// refires them.
fn seed_entries(
    specs: &[JobSpec],
    now: i64,
    include_reboot: bool,
    generation: u64,
) -> Vec<(i64, JobPayload)> {
    let mut entries = Vec::new();
    for spec in specs {
        let payload = JobPayload {
            id: spec.id,
            generation,
            timeset: spec.job.timeset,
            reboot: spec.job.reboot,
        };
        if spec.job.reboot {
            if include_reboot {
                entries.push((now, payload));
            }
            continue;
        }
        match next_fire(&spec.job.timeset, now) {
            Some(t) => entries.push((t, payload)),
            None => warn!(
                job = %spec.id,
                command = %spec.job.command,
                "no future occurrence, not scheduling"
            ),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use lykron_core::{CronJob, Field};
    use std::collections::HashMap;

    fn spec(id: u32, job: CronJob) -> JobSpec {
        JobSpec {
            id: JobId(id),
            job,
            env: HashMap::new(),
        }
    }

    fn every_minute() -> Timeset {
        let mut ts = Timeset::new();
        for f in [
            Field::Minute,
            Field::Hour,
            Field::DayOfMonth,
            Field::Month,
            Field::DayOfWeek,
        ] {
            ts.glob(f);
        }
        ts
    }

    #[test]
    fn reboot_jobs_seed_at_now_only_on_startup() {
        let job = CronJob {
            timeset: Timeset::new(),
            command: "mount-scratch".to_string(),
            user: None,
            reboot: true,
        };
        let specs = vec![spec(0, job)];
        let now = 1_700_000_000;

        let at_start = seed_entries(&specs, now, true, 0);
        assert_eq!(at_start.len(), 1);
        assert_eq!(at_start[0].0, now);

        let on_reload = seed_entries(&specs, now, false, 1);
        assert!(on_reload.is_empty());
    }

    #[test]
    fn regular_jobs_seed_at_their_next_occurrence() {
        let job = CronJob {
            timeset: every_minute(),
            command: "beat".to_string(),
            user: None,
            reboot: false,
        };
        let now = 1_700_000_030; // mid-minute
        let entries = seed_entries(&[spec(0, job)], now, true, 3);

        assert_eq!(entries.len(), 1);
        let (t, ref payload) = entries[0];
        assert!(t > now);
        assert_eq!(t % 60, 0);
        assert_eq!(payload.generation, 3);
    }

    #[test]
    fn unschedulable_jobs_are_skipped() {
        let job = CronJob {
            timeset: Timeset::new(), // matches nothing
            command: "never".to_string(),
            user: None,
            reboot: false,
        };
        assert!(seed_entries(&[spec(0, job)], 1_700_000_000, true, 0).is_empty());
    }

    #[test]
    fn firings_from_a_superseded_snapshot_are_dropped() {
        // After a reload the same dense index can name a different job;
        // a firing stamped with the old generation must not run it.
        let job = CronJob {
            timeset: every_minute(),
            command: "new-occupant".to_string(),
            user: None,
            reboot: false,
        };
        let specs = vec![spec(0, job)];
        let stale = JobPayload {
            id: JobId(0),
            generation: 0,
            timeset: every_minute(),
            reboot: false,
        };

        assert!(resolve_firing(&specs, 1, &stale).is_none());

        let fresh = JobPayload {
            generation: 1,
            ..stale
        };
        let resolved = resolve_firing(&specs, 1, &fresh).unwrap();
        assert_eq!(resolved.job.command, "new-occupant");

        // an id past the snapshot still resolves to nothing
        let gone = JobPayload {
            id: JobId(9),
            ..fresh
        };
        assert!(resolve_firing(&specs, 1, &gone).is_none());
    }
}
