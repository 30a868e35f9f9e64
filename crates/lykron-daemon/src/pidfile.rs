//! Pid file handling. The file is written at startup and removed when
//! the guard drops on shutdown.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn write(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", std::process::id()))?;
        info!(path = %path.display(), pid = std::process::id(), "wrote pid file");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_appears_and_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/lykron.pid");

        let guard = PidFile::write(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        drop(guard);
        assert!(!path.exists());
    }
}
