//! Change detection for table files.
//!
//! Two mechanisms, selected by config: filesystem-event notification on
//! the table directories, and mtime polling. Both report through the
//! same [`TabEvent`] channel so the daemon reacts identically either
//! way.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::Result;
use crate::table::is_hidden;

/// One table file changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

/// The set of paths that count as tables. Watching the system file's
/// parent directory delivers events for every sibling too, so raw
/// notify events are filtered through this before they become
/// [`TabEvent`]s.
struct WatchSet {
    system_file: PathBuf,
    dirs: Vec<PathBuf>,
}

impl WatchSet {
    fn covers(&self, path: &Path) -> bool {
        if is_hidden(path) {
            return false;
        }
        path == self.system_file
            || path.parent().is_some_and(|p| self.dirs.iter().any(|d| d == p))
    }
}

/// Start a notify watcher on the system table and the table
/// directories. The returned watcher must be kept alive for events to
/// keep flowing.
pub fn watch_tables(
    system_file: &Path,
    dirs: &[PathBuf],
    tx: mpsc::Sender<TabEvent>,
) -> Result<RecommendedWatcher> {
    let set = WatchSet {
        system_file: system_file.to_path_buf(),
        dirs: dirs.to_vec(),
    };
    let mut watcher = notify::recommended_watcher(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => handle_fs_event(&event, &set, &tx),
            Err(e) => warn!(error = %e, "table watcher error"),
        },
    )?;

    for dir in dirs {
        if dir.is_dir() {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            info!(path = %dir.display(), "watching table directory");
        } else {
            warn!(path = %dir.display(), "table directory missing, not watched");
        }
    }

    // Editors replace files rather than rewriting them in place, so the
    // system table is watched through its parent directory.
    if let Some(parent) = system_file.parent() {
        if parent.is_dir() && !dirs.iter().any(|d| d == parent) {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
            info!(path = %system_file.display(), "watching system table");
        }
    }

    Ok(watcher)
}

fn handle_fs_event(event: &Event, set: &WatchSet, tx: &mpsc::Sender<TabEvent>) {
    for path in &event.paths {
        if !set.covers(path) {
            continue;
        }
        let tab_event = match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_)) => TabEvent::Changed(path.clone()),
            EventKind::Remove(RemoveKind::File) => TabEvent::Removed(path.clone()),
            _ => continue,
        };
        // Runs on the notify thread; the receiver side going away just
        // means the daemon is shutting down.
        if tx.blocking_send(tab_event).is_err() {
            return;
        }
    }
}

/// Mtime-polling fallback for filesystems without event notification.
/// Runs until the receiver is dropped.
pub async fn poll_tables(
    system_file: PathBuf,
    dirs: Vec<PathBuf>,
    interval: Duration,
    tx: mpsc::Sender<TabEvent>,
) {
    let mut seen = scan(&system_file, &dirs);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // first tick completes immediately

    loop {
        ticker.tick().await;
        let current = scan(&system_file, &dirs);
        for event in diff(&seen, &current) {
            if tx.send(event).await.is_err() {
                return;
            }
        }
        seen = current;
    }
}

fn scan(system_file: &Path, dirs: &[PathBuf]) -> HashMap<PathBuf, SystemTime> {
    let mut out = HashMap::new();

    if let Ok(mtime) = fs::metadata(system_file).and_then(|m| m.modified()) {
        out.insert(system_file.to_path_buf(), mtime);
    }

    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || is_hidden(&path) {
                continue;
            }
            if let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) {
                out.insert(path, mtime);
            }
        }
    }

    out
}

fn diff(
    prev: &HashMap<PathBuf, SystemTime>,
    curr: &HashMap<PathBuf, SystemTime>,
) -> Vec<TabEvent> {
    let mut events = Vec::new();
    for (path, mtime) in curr {
        match prev.get(path) {
            Some(old) if old >= mtime => {}
            _ => events.push(TabEvent::Changed(path.clone())),
        }
    }
    for path in prev.keys() {
        if !curr.contains_key(path) {
            events.push(TabEvent::Removed(path.clone()));
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn diff_reports_new_changed_and_removed_files() {
        let prev: HashMap<PathBuf, SystemTime> = [
            (PathBuf::from("/t/alice"), at(100)),
            (PathBuf::from("/t/bob"), at(100)),
            (PathBuf::from("/t/carol"), at(100)),
        ]
        .into();
        let curr: HashMap<PathBuf, SystemTime> = [
            (PathBuf::from("/t/alice"), at(100)),
            (PathBuf::from("/t/bob"), at(200)),
            (PathBuf::from("/t/dave"), at(150)),
        ]
        .into();

        let mut events = diff(&prev, &curr);
        events.sort_by_key(|e| match e {
            TabEvent::Changed(p) | TabEvent::Removed(p) => p.clone(),
        });
        assert_eq!(
            events,
            vec![
                TabEvent::Changed(PathBuf::from("/t/bob")),
                TabEvent::Removed(PathBuf::from("/t/carol")),
                TabEvent::Changed(PathBuf::from("/t/dave")),
            ]
        );
    }

    #[test]
    fn scan_skips_hidden_files_and_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let tabs_d = dir.path().join("tabs.d");
        fs::create_dir(&tabs_d).unwrap();
        fs::write(tabs_d.join("alice"), "@daily x\n").unwrap();
        fs::write(tabs_d.join(".alice.swp"), "junk").unwrap();
        let sys = dir.path().join("lykrontab");
        fs::write(&sys, "").unwrap();

        let seen = scan(&sys, &[tabs_d.clone(), dir.path().join("gone")]);
        assert_eq!(seen.len(), 2);
        assert!(seen.contains_key(&sys));
        assert!(seen.contains_key(&tabs_d.join("alice")));
    }

    fn modify_event(path: &Path) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Data(
            notify::event::DataChange::Content,
        )))
        .add_path(path.to_path_buf())
    }

    #[test]
    fn fs_events_map_to_tab_events() {
        let (tx, mut rx) = mpsc::channel(8);
        let set = WatchSet {
            system_file: PathBuf::from("/etc/lykrontab"),
            dirs: vec![PathBuf::from("/t")],
        };
        let path = PathBuf::from("/t/alice");

        handle_fs_event(&modify_event(&path), &set, &tx);
        assert_eq!(rx.try_recv().unwrap(), TabEvent::Changed(path.clone()));

        let ev = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        handle_fs_event(&ev, &set, &tx);
        assert_eq!(rx.try_recv().unwrap(), TabEvent::Removed(path));

        let ev = Event::new(EventKind::Access(notify::event::AccessKind::Read))
            .add_path(PathBuf::from("/t/bob"));
        handle_fs_event(&ev, &set, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn siblings_of_the_system_table_are_not_tables() {
        // The system table is watched through its parent directory, so
        // events for other files in there must be dropped, not turned
        // into reloads.
        let (tx, mut rx) = mpsc::channel(8);
        let set = WatchSet {
            system_file: PathBuf::from("/etc/lykron/lykrontab"),
            dirs: vec![PathBuf::from("/etc/lykron/tabs.d")],
        };

        handle_fs_event(&modify_event(Path::new("/etc/lykron/lykron.toml")), &set, &tx);
        assert!(rx.try_recv().is_err());

        handle_fs_event(&modify_event(Path::new("/etc/lykron/lykrontab")), &set, &tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            TabEvent::Changed(PathBuf::from("/etc/lykron/lykrontab"))
        );

        handle_fs_event(&modify_event(Path::new("/etc/lykron/tabs.d/alice")), &set, &tx);
        assert_eq!(
            rx.try_recv().unwrap(),
            TabEvent::Changed(PathBuf::from("/etc/lykron/tabs.d/alice"))
        );

        handle_fs_event(&modify_event(Path::new("/etc/lykron/tabs.d/.alice.swp")), &set, &tx);
        assert!(rx.try_recv().is_err());
    }
}
