// Tailgate - platform/watch.rs
//
// Filesystem change notification for a single tailed file.
//
// Architecture:
//   - `notify` runs its own watcher thread and invokes our callback there.
//   - The callback filters events down to the one watched path and calls
//     `ChangeListener::on_changed`. That is the only cross-thread handoff.
//   - The production listener is `tokio::sync::Notify`: `notify_one` stores
//     a permit when nobody is waiting, so a change signalled between two
//     waits is never lost, and set/clear happen on the same primitive.
//   - `FileWatch` is an RAII guard. Dropping it unregisters the watch and
//     stops the watcher thread, so every exit path of a tail session tears
//     the watch down.
//
// The parent directory is watched (non-recursively) rather than the file
// itself, so the watch survives rotation: a new file created under the same
// name still triggers notifications.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Receives change signals for one watched path. Called from the watcher
/// thread, so implementations must be thread-safe and must not block.
pub trait ChangeListener: Send + Sync {
    fn on_changed(&self);
}

impl ChangeListener for tokio::sync::Notify {
    fn on_changed(&self) {
        self.notify_one();
    }
}

/// An active watch on one file. Unregistered on drop.
pub struct FileWatch {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FileWatch {
    /// Start watching `path` and route its change events to `listener`.
    pub fn start(path: &Path, listener: Arc<dyn ChangeListener>) -> notify::Result<Self> {
        let (dir, file_name) = split_watch_target(path)?;

        let target = file_name.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };
            if !is_relevant_kind(&event.kind) {
                return;
            }
            if event
                .paths
                .iter()
                .any(|p| p.file_name().is_some_and(|n| n == target.as_os_str()))
            {
                listener.on_changed();
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(file = %path.display(), dir = %dir.display(), "File watch registered");

        Ok(Self {
            path: path.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        tracing::debug!(file = %self.path.display(), "File watch torn down");
    }
}

fn is_relevant_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Resolve the directory to watch and the file name to filter on.
///
/// The directory is canonicalised so event paths (which notify reports in
/// canonical form on most platforms) compare by file name reliably.
fn split_watch_target(path: &Path) -> notify::Result<(PathBuf, OsString)> {
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| notify::Error::generic("watched path has no file name"))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let dir = std::fs::canonicalize(&parent).map_err(notify::Error::io)?;
    Ok((dir, file_name))
}
