use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default fan-out limit before a bucket is split or adjusted.
pub const DEFAULT_FANOUT_LIMIT: usize = 32;
/// Default width of one wheel bucket, in seconds (one cron tick).
pub const DEFAULT_INTERVAL_WIDTH_SECS: i64 = 60;
/// Default number of visible wheel buckets.
pub const DEFAULT_NUM_BUCKETS: usize = 64;

/// Top-level config (`lykron.toml` + `LYKRON_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LykronConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub tabs: TabsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabsConfig {
    /// The system-wide table; its entries carry an explicit user column.
    #[serde(default = "default_system_file")]
    pub system_file: String,
    /// Directories of per-user tables, one file per user.
    #[serde(default = "default_tab_dirs")]
    pub dirs: Vec<String>,
    /// How table changes are picked up.
    #[serde(default)]
    pub watch: WatchMode,
    /// Polling cadence for `watch = "poll"`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for TabsConfig {
    fn default() -> Self {
        Self {
            system_file: default_system_file(),
            dirs: default_tab_dirs(),
            watch: WatchMode::default(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Filesystem-event notification on the table directories.
    #[default]
    Notify,
    /// Modification-time polling.
    Poll,
    /// Tables are read once at startup.
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_num_buckets")]
    pub num_buckets: usize,
    #[serde(default = "default_interval_width")]
    pub interval_width_secs: i64,
    #[serde(default = "default_fanout_limit")]
    pub fanout_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_buckets: default_num_buckets(),
            interval_width_secs: default_interval_width(),
            fanout_limit: default_fanout_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Fallback shell when a table does not set `SHELL=`.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Where per-child `<pid>.out` / `<pid>.err` capture files live.
    /// Defaults to the system temp directory.
    pub output_dir: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            output_dir: None,
        }
    }
}

fn default_pid_file() -> String {
    "/run/lykron.pid".to_string()
}
fn default_system_file() -> String {
    "/etc/lykron/lykrontab".to_string()
}
fn default_tab_dirs() -> Vec<String> {
    vec!["/etc/lykron/tabs.d".to_string()]
}
fn default_poll_interval() -> u64 {
    30
}
fn default_num_buckets() -> usize {
    DEFAULT_NUM_BUCKETS
}
fn default_interval_width() -> i64 {
    DEFAULT_INTERVAL_WIDTH_SECS
}
fn default_fanout_limit() -> usize {
    DEFAULT_FANOUT_LIMIT
}
fn default_shell() -> String {
    "/bin/sh".to_string()
}

impl LykronConfig {
    /// Load config from a TOML file with LYKRON_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then `/etc/lykron/lykron.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("/etc/lykron/lykron.toml");

        let config: LykronConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LYKRON_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = LykronConfig::default();
        assert_eq!(cfg.scheduler.num_buckets, DEFAULT_NUM_BUCKETS);
        assert_eq!(cfg.scheduler.interval_width_secs, 60);
        assert_eq!(cfg.scheduler.fanout_limit, 32);
        assert_eq!(cfg.tabs.watch, WatchMode::Notify);
        assert_eq!(cfg.runner.shell, "/bin/sh");
    }
}
