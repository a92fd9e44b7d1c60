//! The save-hook facade over the revision engine.
//!
//! [`HistoryService`] owns the per-file tracker and the [`RevisionStore`]
//! for one workspace and exposes the operations a host needs:
//!
//! - [`will_save`](HistoryService::will_save) / [`did_save`](HistoryService::did_save):
//!   the two save hooks
//! - [`find_all_history`](HistoryService::find_all_history) and
//!   [`find_current`](HistoryService::find_current): navigation between a
//!   file and its revisions
//! - [`restore`](HistoryService::restore), [`compare`](HistoryService::compare)
//!   and [`purge_all`](HistoryService::purge_all): maintenance
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use local_history::{Config, HistoryService};
//!
//! let config = Config::load("/path/to/workspace")?;
//! let mut service = HistoryService::new(config)?;
//!
//! let file = Path::new("/path/to/workspace/src/main.rs");
//! service.will_save(file);
//! // ... the file is written ...
//! let bytes = std::fs::read(file)?;
//! service.did_save(file, &bytes)?;
//!
//! for revision in service.find_all_history(file, false)? {
//!     println!("{}", revision.path.display());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use similar::TextDiff;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::codec::{HistoryLayout, PathSpace};
use crate::config::Config;
use crate::error::{HistoryError, Result};
use crate::index::{FsEnumerator, HistoryIndex, Limit, Revision};
use crate::retention::RetentionPolicy;
use crate::store::{read_original, Clock, RecordOutcome, RevisionStore, SystemClock};
use crate::tracker::{DocumentTracker, PendingOriginal};
use crate::workspace::{ExcludeSet, FsWorkspaceSearch};

/// Lines of context around each change in a unified diff.
const DIFF_CONTEXT: usize = 3;

/// Local history for one workspace.
#[derive(Debug)]
pub struct HistoryService {
    config: Config,
    exclude: ExcludeSet,
    store: RevisionStore,
    tracker: DocumentTracker,
}

impl HistoryService {
    /// Creates a service backed by the file system and the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is inconsistent or the exclude
    /// pattern does not compile.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// Creates a service with an injected clock.
    ///
    /// # Errors
    ///
    /// Same as [`HistoryService::new`].
    pub fn with_clock(config: Config, clock: Box<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let root = config.workspace_root.clone();
        let layout = HistoryLayout::new(&root, config.history_root());
        let exclude = ExcludeSet::new(&root, &config.exclude)?;
        let store = RevisionStore::new(
            HistoryIndex::new(layout, Box::new(FsEnumerator)),
            Box::new(FsWorkspaceSearch::new(&root, exclude.clone())),
            RetentionPolicy::new(config.days_limit),
            clock,
        );

        debug!(
            root = %root.display(),
            history_root = %store.layout().history_root().display(),
            days_limit = config.days_limit,
            enabled = config.enabled,
            "History service ready"
        );

        Ok(Self::from_parts(config, exclude, store))
    }

    /// Assembles a service from an already-built store.
    #[must_use]
    pub fn from_parts(config: Config, exclude: ExcludeSet, store: RevisionStore) -> Self {
        Self {
            config,
            exclude,
            store,
            tracker: DocumentTracker::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the path layout.
    #[must_use]
    pub fn layout(&self) -> &HistoryLayout {
        self.store.layout()
    }

    /// Returns the compiled exclude patterns.
    #[must_use]
    pub fn exclude(&self) -> &ExcludeSet {
        &self.exclude
    }

    /// Returns the number of files seen by the save hooks.
    #[must_use]
    pub fn tracked_files(&self) -> usize {
        self.tracker.len()
    }

    /// Pre-save hook: captures the bytes on disk as the file's original.
    pub fn will_save(&mut self, file: &Path) {
        if !self.config.enabled {
            return;
        }
        let state = self.tracker.entry(file);
        self.store.capture_original(state, file);
    }

    /// Pre-save hook for callers that already hold the pre-save bytes.
    ///
    /// Returns true if `original` is now the file's pending original.
    pub fn will_save_snapshot(&mut self, file: &Path, original: PendingOriginal) -> bool {
        if !self.config.enabled {
            return false;
        }
        let state = self.tracker.entry(file);
        self.store.capture_snapshot(state, original)
    }

    /// Post-save hook: records `bytes` as the newest revision of `file`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::CreateDir`] if the history directory cannot be
    /// created.
    pub fn did_save(&mut self, file: &Path, bytes: &[u8]) -> Result<RecordOutcome> {
        if !self.config.enabled {
            return Ok(RecordOutcome::Disabled);
        }
        let state = self.tracker.entry(file);
        self.store.record_revision(state, file, bytes)
    }

    /// Lists the revisions of the file `path` belongs to, oldest first.
    ///
    /// `path` may be the workspace file or any of its revisions. Unless
    /// `no_limit` is set, only the newest `maxDisplay` revisions are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the history directory cannot be read. A path that
    /// does not decode has no history and yields an empty list.
    pub fn find_all_history(&self, path: &Path, no_limit: bool) -> Result<Vec<Revision>> {
        let pattern = match self.layout().pattern_of(path) {
            Ok(pattern) => pattern,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No history for path");
                return Ok(Vec::new());
            }
        };

        let limit = if no_limit {
            Limit::Unlimited
        } else {
            Limit::from_max(self.config.max_display)
        };

        Ok(self.store.index().list_matching(&pattern, limit)?)
    }

    /// Returns the workspace file a history path belongs to.
    ///
    /// A workspace path, or a path that does not decode, is returned as is.
    #[must_use]
    pub fn find_current(&self, path: &Path) -> PathBuf {
        if !self.layout().is_history_path(path) {
            return path.to_path_buf();
        }
        match self.layout().decode(path, Some(PathSpace::Workspace)) {
            Ok(decoded) => decoded.resolved,
            Err(e) => {
                trace!(path = %path.display(), error = %e, "History path does not decode");
                path.to_path_buf()
            }
        }
    }

    /// Returns the revision captured just before `revision`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if `revision` is not a history path or its directory
    /// cannot be read.
    pub fn previous_revision(&self, revision: &Path) -> Result<Option<Revision>> {
        let decoded = self.layout().decode(revision, None)?;
        let Some(stamp) = decoded.stamp else {
            return Err(HistoryError::NoHistory(revision.to_path_buf()));
        };

        let pattern = self.layout().pattern_of(revision)?;
        let revisions = self.store.index().list_matching(&pattern, Limit::Unlimited)?;
        Ok(revisions
            .into_iter()
            .filter(|r| r.stamp < stamp)
            .last())
    }

    /// Writes a revision's bytes back over its workspace file.
    ///
    /// The restore runs through both save hooks, so the state it replaces
    /// and the restored state are both kept as revisions.
    ///
    /// # Errors
    ///
    /// Returns an error if `revision` is not a history path, cannot be read,
    /// or the workspace file cannot be written.
    pub fn restore(&mut self, revision: &Path) -> Result<RecordOutcome> {
        if !self.layout().is_history_path(revision) {
            return Err(HistoryError::NoHistory(revision.to_path_buf()));
        }
        let target = self.layout().decode(revision, Some(PathSpace::Workspace))?.resolved;
        let bytes = fs::read(revision)?;

        self.will_save(&target);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &bytes)?;
        info!(revision = %revision.display(), target = %target.display(), "Restored revision");

        self.did_save(&target, &bytes)
    }

    /// Renders a unified line diff from `old` to `new`.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read.
    pub fn compare(&self, old: &Path, new: &Path) -> Result<String> {
        let old_text = read_text(old)?;
        let new_text = read_text(new)?;

        let old_label = self.label(old);
        let new_label = self.label(new);
        let diff = TextDiff::from_lines(&old_text, &new_text);
        Ok(diff
            .unified_diff()
            .context_radius(DIFF_CONTEXT)
            .header(&old_label, &new_label)
            .to_string())
    }

    /// Applies retention to every revision under the history root.
    ///
    /// Returns the deleted paths. Purging is a no-op with `daysLimit` 0.
    ///
    /// # Errors
    ///
    /// Returns an error only if the history root exists but cannot be walked
    /// at all; unreadable entries below it are skipped.
    pub fn purge_all(&self) -> Result<Vec<PathBuf>> {
        let retention = self.store.retention();
        if !retention.is_enabled() {
            return Ok(Vec::new());
        }

        let history_root = self.layout().history_root();
        if !history_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut revisions = Vec::new();
        for entry in WalkDir::new(history_root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable history entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let decoded = self.layout().decode(entry.path(), None);
            if matches!(decoded, Ok(ref d) if d.stamp.is_some()) {
                revisions.push(entry.into_path());
            } else {
                trace!(path = %entry.path().display(), "Not a revision, leaving in place");
            }
        }

        let now = SystemTime::from(self.store.now());
        let deleted = retention.purge(&revisions, now);
        info!(
            scanned = revisions.len(),
            deleted = deleted.len(),
            days_limit = retention.days_limit(),
            "Purged history"
        );
        Ok(deleted)
    }

    /// Captures the current bytes of every included file that has no history
    /// yet and is at most `snapshotMaxBytes` long.
    ///
    /// Used when saves are detected after the fact, so the first detected save
    /// of a file still finds its pre-edit original. Capturing stops once the
    /// held bytes would exceed `snapshotMaxTotalBytes`. Returns the number of
    /// files whose snapshot became their pending original.
    pub fn snapshot_unrecorded(&mut self) -> usize {
        if !self.config.enabled {
            return 0;
        }

        let root = self.config.workspace_root.clone();
        let history_root = self.layout().history_root().to_path_buf();
        let max_bytes = self.config.snapshot_max_bytes;
        let budget = self.config.snapshot_max_total_bytes;
        let mut captured = 0;
        let mut held: u64 = 0;

        let walker = WalkDir::new(&root).follow_links(false).into_iter();
        let exclude = &self.exclude;
        let entries = walker.filter_entry(|entry| {
            let path = entry.path();
            if path.starts_with(&history_root) {
                return false;
            }
            if !entry.file_type().is_dir() {
                return true;
            }
            match path.strip_prefix(&root) {
                Ok(relative) => !exclude.is_dir_excluded(relative),
                Err(_) => true,
            }
        });

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    trace!(error = %e, "Skipping unreadable workspace entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            if self.exclude.is_excluded(relative) {
                continue;
            }
            let too_large = entry.metadata().map(|m| m.len() > max_bytes).unwrap_or(true);
            if too_large {
                trace!(path = %entry.path().display(), "Skipping snapshot of large file");
                continue;
            }
            let relative = relative.to_path_buf();
            candidates.push((entry.into_path(), relative));
        }

        for (file, relative) in candidates {
            match self.store.index().list_revisions(&relative, Limit::Latest(1)) {
                Ok(existing) if existing.is_empty() => {}
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %relative.display(), error = %e, "Cannot list history");
                    continue;
                }
            }
            let original = match read_original(&file) {
                Ok(original) => original,
                Err(e) => {
                    debug!(path = %file.display(), error = %e, "Cannot snapshot file");
                    continue;
                }
            };

            let len = original.bytes.len() as u64;
            if held.saturating_add(len) > budget {
                info!(
                    captured,
                    held,
                    budget,
                    "Snapshot budget reached, remaining files get no original"
                );
                break;
            }
            if self.will_save_snapshot(&file, original) {
                held += len;
                captured += 1;
            } else {
                trace!(path = %file.display(), "Original already pending");
            }
        }

        info!(captured, held, "Captured originals of files without history");
        captured
    }

    /// Describes a path relative to the workspace or history root.
    #[must_use]
    pub fn label(&self, path: &Path) -> String {
        let layout = self.layout();
        path.strip_prefix(layout.history_root())
            .or_else(|_| path.strip_prefix(layout.workspace_root()))
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Reads a file as text for diffing, replacing invalid UTF-8.
fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
