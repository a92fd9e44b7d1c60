//! File watcher turning workspace writes into save events.
//!
//! This module watches a workspace recursively and reports when a file has
//! been saved. It stands in for an editor's "document saved" notification.
//!
//! # Architecture
//!
//! The [`notify`] callback is kept lightweight: it drops events under the
//! history root or matching the [`ExcludeSet`] (which always covers
//! version-control metadata) and pushes the rest into a per-path
//! [`Debouncer`]. Once a
//! path has been quiet for the debounce window, a forwarding task looks at
//! what is on disk now:
//!
//! - a regular file becomes [`WatchEvent::Saved`]
//! - a missing path becomes [`WatchEvent::Removed`]
//! - anything else (a directory) is ignored
//!
//! Deciding from the final state keeps editors that save through a temporary
//! file and a rename from producing spurious events.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use local_history::watcher::{WatchEvent, WorkspaceWatcher};
//! use local_history::workspace::ExcludeSet;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = PathBuf::from("/path/to/workspace");
//!     let (tx, mut rx) = mpsc::channel(100);
//!     let exclude = ExcludeSet::new(&root, "{.history,**/node_modules}")?;
//!     let _watcher = WorkspaceWatcher::new(
//!         &root,
//!         root.join(".history"),
//!         exclude,
//!         Duration::from_millis(250),
//!         tx,
//!     )?;
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             WatchEvent::Saved(path) => println!("Saved: {}", path.display()),
//!             WatchEvent::Removed(path) => println!("Removed: {}", path.display()),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{
    event::{ModifyKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::utils::debounce::{DebounceSender, Debouncer};
use crate::workspace::ExcludeSet;

/// Events emitted by the workspace watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A regular file was written and has been quiet for the debounce window.
    Saved(PathBuf),

    /// A file disappeared.
    Removed(PathBuf),
}

/// Errors that can occur during file watching operations.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// The workspace directory does not exist or is inaccessible.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Recursive watcher over one workspace.
///
/// Dropping the watcher stops the subscription and discards any events still
/// waiting in the debounce window.
#[derive(Debug)]
pub struct WorkspaceWatcher {
    /// Kept alive to maintain the watch subscription.
    _watcher: RecommendedWatcher,
    /// Owns the debounce task.
    _debouncer: Debouncer<PathBuf, ()>,
    root: PathBuf,
}

impl WorkspaceWatcher {
    /// Starts watching `root`, ignoring everything under `history_root` and
    /// every path `exclude` matches.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not a directory or the file system
    /// watcher cannot be initialized.
    pub fn new(
        root: impl Into<PathBuf>,
        history_root: impl Into<PathBuf>,
        exclude: ExcludeSet,
        window: Duration,
        event_tx: mpsc::Sender<WatchEvent>,
    ) -> Result<Self> {
        let root = root.into();
        let history_root = history_root.into();
        if !root.is_dir() {
            return Err(WatcherError::DirectoryNotFound(root));
        }

        let (settled_tx, settled_rx) = mpsc::channel(256);
        let debouncer = Debouncer::new(window, settled_tx);
        tokio::spawn(forward_settled(settled_rx, event_tx));

        let sender = debouncer.sender();
        let filter = WatchFilter {
            root: root.clone(),
            history_root: history_root.clone(),
            exclude,
        };
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                handle_notify_event(res, &filter, &sender);
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        info!(
            root = %root.display(),
            history_root = %history_root.display(),
            window_ms = window.as_millis(),
            "Watching workspace"
        );

        Ok(Self {
            _watcher: watcher,
            _debouncer: debouncer,
            root,
        })
    }

    /// Returns the watched workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Paths the callback drops before they reach the debouncer.
struct WatchFilter {
    root: PathBuf,
    history_root: PathBuf,
    exclude: ExcludeSet,
}

impl WatchFilter {
    fn admits(&self, path: &Path) -> bool {
        if path.starts_with(&self.history_root) {
            return false;
        }
        match path.strip_prefix(&self.root) {
            Ok(relative) => !self.exclude.is_excluded(relative),
            Err(_) => true,
        }
    }
}

/// Filters a raw notify event and queues its paths for debouncing.
fn handle_notify_event(
    res: std::result::Result<Event, notify::Error>,
    filter: &WatchFilter,
    sender: &DebounceSender<PathBuf, ()>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    if !is_relevant(&event.kind) {
        trace!(kind = ?event.kind, "Ignoring event kind");
        return;
    }

    for path in event.paths {
        if !filter.admits(&path) {
            continue;
        }
        trace!(path = %path.display(), kind = ?event.kind, "Queued change");
        sender.push(path, ());
    }
}

/// True for event kinds that can change a file's contents or existence.
fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(
                RenameMode::To | RenameMode::From | RenameMode::Both | RenameMode::Any,
            ))
            | EventKind::Remove(_)
    )
}

/// Turns settled paths into [`WatchEvent`]s based on what is on disk now.
async fn forward_settled(
    mut settled_rx: mpsc::Receiver<(PathBuf, ())>,
    event_tx: mpsc::Sender<WatchEvent>,
) {
    while let Some((path, ())) = settled_rx.recv().await {
        let event = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => WatchEvent::Saved(path),
            Ok(_) => {
                trace!(path = %path.display(), "Not a regular file, ignoring");
                continue;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => WatchEvent::Removed(path),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cannot stat changed path");
                continue;
            }
        };

        if event_tx.send(event).await.is_err() {
            break;
        }
    }

    debug!("Watch event forwarder shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::fs;
    use tokio::time::timeout;

    const DEFAULT_EXCLUDE: &str = "{.history,.vscode,**/node_modules,typings,out}";

    fn filter(root: &str) -> WatchFilter {
        WatchFilter {
            root: PathBuf::from(root),
            history_root: Path::new(root).join(".history"),
            exclude: ExcludeSet::new(root, DEFAULT_EXCLUDE).unwrap(),
        }
    }

    #[test]
    fn relevant_kinds() {
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Name(
            RenameMode::To
        ))));
        assert!(is_relevant(&EventKind::Remove(RemoveKind::File)));
    }

    #[test]
    fn metadata_and_access_are_ignored() {
        assert!(!is_relevant(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Any
        ))));
        assert!(!is_relevant(&EventKind::Access(
            notify::event::AccessKind::Any
        )));
    }

    #[test]
    fn filter_drops_history_and_excluded_paths() {
        let filter = filter("/proj");
        assert!(filter.admits(Path::new("/proj/src/a.ts")));
        assert!(!filter.admits(Path::new("/proj/.history/a_20230601101530.ts")));
        assert!(!filter.admits(Path::new("/proj/node_modules/x.js")));
        assert!(!filter.admits(Path::new("/proj/.git/index")));
        assert!(!filter.admits(Path::new("/proj/.git/objects/ab/cdef")));
        assert!(!filter.admits(Path::new("/proj/.git")));
    }

    #[tokio::test]
    async fn history_and_git_paths_are_never_queued() {
        let (tx, mut rx) = mpsc::channel(8);
        let debouncer = Debouncer::new(Duration::from_millis(10), tx);
        let sender = debouncer.sender();

        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/proj/.history/a_20230601101530.ts"))
            .add_path(PathBuf::from("/proj/.git/index"))
            .add_path(PathBuf::from("/proj/a.ts"));
        handle_notify_event(Ok(event), &filter("/proj"), &sender);

        let (path, ()) = timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, PathBuf::from("/proj/a.ts"));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn forwarder_reports_by_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        fs::write(&file, b"a").unwrap();
        let gone = dir.path().join("gone.ts");

        let (settled_tx, settled_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        tokio::spawn(forward_settled(settled_rx, event_tx));

        settled_tx.send((dir.path().to_path_buf(), ())).await.unwrap();
        settled_tx.send((file.clone(), ())).await.unwrap();
        settled_tx.send((gone.clone(), ())).await.unwrap();

        assert_eq!(event_rx.recv().await, Some(WatchEvent::Saved(file)));
        assert_eq!(event_rx.recv().await, Some(WatchEvent::Removed(gone)));
    }

    #[tokio::test]
    async fn missing_root_is_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let result = WorkspaceWatcher::new(
            "/definitely/not/here",
            "/definitely/not/here/.history",
            ExcludeSet::new("/definitely/not/here", "").unwrap(),
            Duration::from_millis(10),
            tx,
        );
        assert!(matches!(result, Err(WatcherError::DirectoryNotFound(_))));
    }

    #[tokio::test]
    async fn detects_save_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let exclude = ExcludeSet::new(&root, DEFAULT_EXCLUDE).unwrap();
        let _watcher = WorkspaceWatcher::new(
            &root,
            root.join(".history"),
            exclude,
            Duration::from_millis(50),
            tx,
        )
        .unwrap();

        // Give the backend a moment to register the watch.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let file = root.join("a.ts");
        fs::write(&file, b"hello").unwrap();

        let event = timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(WatchEvent::Saved(path)) if path == file => return Some(path),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .expect("save should be detected");
        assert_eq!(event, Some(file));
    }
}
