// Disk watcher for the open document.
//
// Watches the file's parent directory (editors often save by renaming a temp
// file over the original) and emits a tick for every content-relevant event
// on the file. Ticks carry no payload; consumers debounce them and re-read
// the file.

pub mod debounce;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Ticks coalesce while one is queued.
const TICK_CHANNEL_CAPACITY: usize = 1;

pub struct DiskWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl DiskWatcher {
    /// Start watching `path`. The watch stops when the handle is dropped,
    /// which also closes the returned receiver.
    pub fn start(path: &Path) -> Result<(Self, mpsc::Receiver<()>)> {
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path
            .file_name()
            .with_context(|| format!("cannot watch `{}`: no file name", path.display()))?
            .to_os_string();

        let (tx, rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_content_event(&event.kind)
                    && event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    // A full channel already holds a pending tick.
                    let _ = tx.try_send(());
                }
            }
            Err(e) => error!(error = %e, "disk watcher error"),
        })
        .context("failed to create disk watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch directory: {}", dir.display()))?;
        debug!(path = %path.display(), "disk watcher started");

        Ok((Self { _watcher: watcher, path: path.to_path_buf() }, rx))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DiskWatcher {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "disk watcher stopped");
    }
}

fn is_content_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => {
            trace!("skipping metadata-only modify event");
            false
        }
        EventKind::Modify(_) => true,
        _ => false,
    }
}
