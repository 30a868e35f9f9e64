//! Spawning job commands.
//!
//! A job runs as `shell -c command` with a scrubbed environment. Its
//! stdout and stderr are redirected into per-child capture files named
//! `<pid>.out` / `<pid>.err` in the runner's output directory; the
//! reaper drains and removes them after the child exits.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use lykron_core::{CronJob, JobId};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

const DEFAULT_PATH: &str = "/usr/bin:/bin";

/// A spawned job, handed to the reaper.
#[derive(Debug)]
pub struct RunningChild {
    pub id: JobId,
    pub pid: u32,
    pub command: String,
    pub child: Child,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

/// Spawns job commands with capture files in `output_dir`.
#[derive(Debug)]
pub struct JobRunner {
    shell: String,
    output_dir: PathBuf,
    /// Names capture files before the child pid is known.
    seq: AtomicU64,
}

impl JobRunner {
    pub fn new(shell: impl Into<String>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            shell: shell.into(),
            output_dir,
            seq: AtomicU64::new(0),
        })
    }

    /// Spawn one job. `env` is the job's table environment; a `SHELL`
    /// assignment there overrides the configured interpreter.
    pub fn spawn(&self, id: JobId, job: &CronJob, env: &HashMap<String, String>) -> Result<RunningChild> {
        let shell = env
            .get("SHELL")
            .cloned()
            .unwrap_or_else(|| self.shell.clone());

        let mut cmd = Command::new(&shell);
        cmd.arg("-c").arg(&job.command);
        cmd.stdin(Stdio::null());

        cmd.env_clear();
        cmd.env("SHELL", &shell);
        cmd.env("PATH", DEFAULT_PATH);
        if let Ok(home) = std::env::var("HOME") {
            cmd.env("HOME", home);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }

        if let Some(ref user) = job.user {
            let ident = lookup_user(user)?;
            // uid/gid switching needs root; without it the job still
            // runs, under the daemon's own account.
            if unsafe { libc::geteuid() } == 0 {
                cmd.uid(ident.uid);
                cmd.gid(ident.gid);
            }
            cmd.env("HOME", &ident.home);
            cmd.env("LOGNAME", user);
            cmd.env("USER", user);
        }

        // The pid is only known after the spawn, so the capture files
        // start out under a placeholder name.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stdout_path = self.output_dir.join(format!(".pending-{seq}.out"));
        let stderr_path = self.output_dir.join(format!(".pending-{seq}.err"));
        cmd.stdout(Stdio::from(File::create(&stdout_path)?));
        cmd.stderr(Stdio::from(File::create(&stderr_path)?));

        let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            command: job.command.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);

        let stdout_path = rename_for_pid(&self.output_dir, stdout_path, pid, "out");
        let stderr_path = rename_for_pid(&self.output_dir, stderr_path, pid, "err");

        debug!(job = %id, pid, command = %job.command, "spawned job");
        Ok(RunningChild {
            id,
            pid,
            command: job.command.clone(),
            child,
            stdout_path,
            stderr_path,
        })
    }
}

fn rename_for_pid(dir: &Path, from: PathBuf, pid: u32, ext: &str) -> PathBuf {
    let to = dir.join(format!("{pid}.{ext}"));
    match fs::rename(&from, &to) {
        Ok(()) => to,
        Err(e) => {
            warn!(path = %from.display(), error = %e, "failed to rename capture file");
            from
        }
    }
}

struct UserIdent {
    uid: u32,
    gid: u32,
    home: String,
}

/// Resolve an account name through the passwd database.
fn lookup_user(name: &str) -> Result<UserIdent> {
    use std::ffi::{CStr, CString};

    let cname =
        CString::new(name).map_err(|_| RunnerError::UnknownUser(name.to_string()))?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0_u8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // Safety: all pointers reference live locals; getpwnam_r writes the
    // string fields into `buf`, which outlives every read below.
    let rc = unsafe {
        libc::getpwnam_r(
            cname.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr().cast(),
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return Err(RunnerError::UnknownUser(name.to_string()));
    }

    let home = unsafe { CStr::from_ptr(pwd.pw_dir) }
        .to_string_lossy()
        .into_owned();
    Ok(UserIdent {
        uid: pwd.pw_uid,
        gid: pwd.pw_gid,
        home,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lykron_core::Timeset;

    fn job(command: &str) -> CronJob {
        CronJob {
            timeset: Timeset::new(),
            command: command.to_string(),
            user: None,
            reboot: false,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_separately() {
        let dir = tempfile::tempdir().unwrap();
        let runner = JobRunner::new("/bin/sh", dir.path()).unwrap();

        let mut rc = runner
            .spawn(JobId(0), &job("echo visible; echo trouble >&2"), &HashMap::new())
            .unwrap();
        let status = rc.child.wait().await.unwrap();

        assert!(status.success());
        assert_eq!(fs::read_to_string(&rc.stdout_path).unwrap(), "visible\n");
        assert_eq!(fs::read_to_string(&rc.stderr_path).unwrap(), "trouble\n");
    }

    #[tokio::test]
    async fn capture_files_are_named_after_the_pid() {
        let dir = tempfile::tempdir().unwrap();
        let runner = JobRunner::new("/bin/sh", dir.path()).unwrap();

        let mut rc = runner.spawn(JobId(3), &job("true"), &HashMap::new()).unwrap();
        assert_eq!(
            rc.stdout_path,
            dir.path().join(format!("{}.out", rc.pid))
        );
        rc.child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn table_environment_reaches_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let runner = JobRunner::new("/bin/sh", dir.path()).unwrap();
        let env: HashMap<String, String> =
            [("GREETING".to_string(), "moin".to_string())].into();

        let mut rc = runner
            .spawn(JobId(0), &job("printf %s \"$GREETING\""), &env)
            .unwrap();
        rc.child.wait().await.unwrap();

        assert_eq!(fs::read_to_string(&rc.stdout_path).unwrap(), "moin");
    }

    #[tokio::test]
    async fn shell_assignment_overrides_the_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let runner = JobRunner::new("/bin/sh", dir.path()).unwrap();
        let env: HashMap<String, String> =
            [("SHELL".to_string(), "/bin/sh".to_string())].into();

        let mut rc = runner
            .spawn(JobId(0), &job("printf %s \"$SHELL\""), &env)
            .unwrap();
        rc.child.wait().await.unwrap();

        assert_eq!(fs::read_to_string(&rc.stdout_path).unwrap(), "/bin/sh");
    }

    #[test]
    fn unknown_user_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = JobRunner::new("/bin/sh", dir.path()).unwrap();
        let mut j = job("true");
        j.user = Some("no-such-account-here".to_string());

        let err = runner.spawn(JobId(0), &j, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RunnerError::UnknownUser(_)));
    }
}
