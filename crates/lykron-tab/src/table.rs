//! Loaded tables and the registry that owns them.
//!
//! The registry holds one [`CronTab`] per file: the system table plus
//! every regular file found in the configured table directories. A tab
//! that fails to parse is skipped (or, on reload, its previous version
//! is kept) so one broken file never takes down the rest.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lykron_core::{CronJob, JobId};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::parser::{parse_source, TabKind};

/// One loaded table file.
#[derive(Debug, Clone)]
pub struct CronTab {
    pub path: PathBuf,
    /// Owner of a per-user table (the file name). `None` for the
    /// system table, whose entries carry their own user column.
    pub user: Option<String>,
    pub env: HashMap<String, String>,
    pub jobs: Vec<CronJob>,
    mtime: SystemTime,
}

impl CronTab {
    pub fn load(path: &Path, kind: TabKind) -> Result<Self> {
        let src = fs::read_to_string(path)?;
        let parsed = parse_source(&src, kind)?;
        let mtime = fs::metadata(path)?.modified()?;

        let user = match kind {
            TabKind::System => None,
            TabKind::User => path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string),
        };

        let mut jobs = parsed.jobs;
        if let Some(ref owner) = user {
            for job in &mut jobs {
                job.user = Some(owner.clone());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            user,
            env: parsed.env,
            jobs,
            mtime,
        })
    }

    /// Whether the file changed on disk since it was loaded. A file
    /// that can no longer be stat'd counts as modified so the registry
    /// notices deletions when polling.
    pub fn is_modified(&self) -> bool {
        match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime > self.mtime,
            Err(_) => true,
        }
    }
}

/// One schedulable entry: a job plus the environment of its table.
/// The id indexes the snapshot it came from; a reload produces a fresh
/// snapshot with fresh ids.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub job: CronJob,
    pub env: HashMap<String, String>,
}

pub struct TabRegistry {
    system_file: PathBuf,
    dirs: Vec<PathBuf>,
    tabs: Vec<CronTab>,
}

impl TabRegistry {
    pub fn new(system_file: PathBuf, dirs: Vec<PathBuf>) -> Self {
        Self {
            system_file,
            dirs,
            tabs: Vec::new(),
        }
    }

    /// Load the system table and every file in the table directories,
    /// replacing whatever was loaded before.
    pub fn load_all(&mut self) {
        self.tabs.clear();

        if self.system_file.exists() {
            self.load_one(&self.system_file.clone(), TabKind::System);
        } else {
            debug!(path = %self.system_file.display(), "no system table");
        }

        for dir in self.dirs.clone() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "failed to read table directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() || is_hidden(&path) {
                    continue;
                }
                self.load_one(&path, TabKind::User);
            }
        }

        info!(tabs = self.tabs.len(), jobs = self.num_jobs(), "tables loaded");
    }

    fn load_one(&mut self, path: &Path, kind: TabKind) {
        match CronTab::load(path, kind) {
            Ok(tab) => {
                debug!(path = %path.display(), jobs = tab.jobs.len(), "loaded table");
                self.tabs.push(tab);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to load table, skipping"),
        }
    }

    /// Re-read a single table after a change notification. A vanished
    /// file drops its tab; a parse failure keeps the previous version.
    pub fn reload(&mut self, path: &Path) {
        if !path.exists() {
            let before = self.tabs.len();
            self.tabs.retain(|t| t.path != path);
            if self.tabs.len() < before {
                info!(path = %path.display(), "table removed");
            }
            return;
        }

        let kind = if path == self.system_file {
            TabKind::System
        } else {
            TabKind::User
        };

        match CronTab::load(path, kind) {
            Ok(tab) => {
                info!(path = %path.display(), jobs = tab.jobs.len(), "table reloaded");
                match self.tabs.iter_mut().find(|t| t.path == path) {
                    Some(slot) => *slot = tab,
                    None => self.tabs.push(tab),
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "reload failed, keeping previous version");
            }
        }
    }

    /// Paths of tables whose files changed on disk (mtime polling).
    pub fn modified_paths(&self) -> Vec<PathBuf> {
        self.tabs
            .iter()
            .filter(|t| t.is_modified())
            .map(|t| t.path.clone())
            .collect()
    }

    /// Flatten every loaded table into one indexed job list.
    pub fn snapshot(&self) -> Vec<JobSpec> {
        let mut out = Vec::with_capacity(self.num_jobs());
        for tab in &self.tabs {
            for job in &tab.jobs {
                out.push(JobSpec {
                    id: JobId(out.len() as u32),
                    job: job.clone(),
                    env: tab.env.clone(),
                });
            }
        }
        out
    }

    pub fn num_jobs(&self) -> usize {
        self.tabs.iter().map(|t| t.jobs.len()).sum()
    }

    pub fn tabs(&self) -> &[CronTab] {
        &self.tabs
    }
}

pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true)
}
