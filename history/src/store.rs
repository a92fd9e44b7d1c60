//! Revision persistence: original baseline, new revision, retention.
//!
//! [`RevisionStore`] runs the two halves of a save cycle against one file's
//! [`DocumentState`]:
//!
//! 1. [`capture_original`](RevisionStore::capture_original) before the save
//!    keeps the bytes on disk as a pending original (first capture wins).
//! 2. [`record_revision`](RevisionStore::record_revision) after the save:
//!    - resolves the workspace-relative path (unresolvable: no-op)
//!    - confirms the file is visible to the workspace search (else the file is
//!      excluded for good)
//!    - creates the mirrored directory (failure aborts everything)
//!    - queries the index, then writes the pending original stamped with its
//!      own mtime only if no revision exists yet
//!    - writes the saved bytes stamped with the current time
//!    - purges revisions older than the retention window
//!
//! The query-then-write baseline step is an explicit transaction over the
//! injected [`RevisionEnumerator`](crate::index::RevisionEnumerator) and
//! [`Clock`], so it is deterministic under test.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::codec::{HistoryLayout, RevisionStamp};
use crate::error::{HistoryError, Result};
use crate::index::{HistoryIndex, Limit, Revision};
use crate::retention::RetentionPolicy;
use crate::tracker::{DocumentState, PendingOriginal};
use crate::workspace::WorkspaceSearch;

/// Source of the current local time.
pub trait Clock: Send + Sync {
    /// Returns the current local time.
    fn now(&self) -> DateTime<Local>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// What a post-save call did.
#[derive(Debug)]
pub enum RecordOutcome {
    /// Recording is turned off.
    Disabled,
    /// The file has no workspace-relative path; nothing was written.
    Untrackable,
    /// The file is excluded; nothing was written, now or ever.
    Excluded,
    /// The revision flow ran.
    Recorded(RevisionReport),
}

/// Files touched by one recorded save.
#[derive(Debug, Default)]
pub struct RevisionReport {
    /// The original baseline written before the revision, if any.
    pub original: Option<PathBuf>,
    /// The new revision, unless its write failed.
    pub revision: Option<PathBuf>,
    /// Revisions deleted by retention.
    pub purged: Vec<PathBuf>,
    /// Copy steps that failed; the rest of the flow still ran.
    pub failures: Vec<HistoryError>,
}

/// Writes revisions for saved files.
pub struct RevisionStore {
    index: HistoryIndex,
    search: Box<dyn WorkspaceSearch>,
    retention: RetentionPolicy,
    clock: Box<dyn Clock>,
}

impl fmt::Debug for RevisionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionStore")
            .field("index", &self.index)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl RevisionStore {
    /// Creates a store from its collaborators.
    pub fn new(
        index: HistoryIndex,
        search: Box<dyn WorkspaceSearch>,
        retention: RetentionPolicy,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            index,
            search,
            retention,
            clock,
        }
    }

    /// Returns the path layout.
    #[must_use]
    pub fn layout(&self) -> &HistoryLayout {
        self.index.layout()
    }

    /// Returns the revision index.
    #[must_use]
    pub fn index(&self) -> &HistoryIndex {
        &self.index
    }

    /// Returns the retention policy.
    #[must_use]
    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Returns the current time from the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    /// Captures the bytes currently on disk as the pending original of `file`.
    ///
    /// Does nothing if an original is already pending or the file is
    /// excluded. A read failure is logged and leaves nothing pending, so a
    /// later save can try again.
    pub fn capture_original(&self, state: &mut DocumentState, file: &Path) {
        if state.is_excluded() || state.has_pending_original() {
            return;
        }

        match read_original(file) {
            Ok(original) => {
                debug!(path = %file.display(), len = original.bytes.len(), "Captured original");
                state.offer_original(original);
            }
            Err(e) => {
                info!(path = %file.display(), error = %e, "Original file cannot be saved");
            }
        }
    }

    /// Stores an already-read snapshot as the pending original.
    ///
    /// Same first-capture-wins rule as [`capture_original`](Self::capture_original).
    /// Returns false if the snapshot was not kept.
    pub fn capture_snapshot(&self, state: &mut DocumentState, original: PendingOriginal) -> bool {
        state.offer_original(original)
    }

    /// Records `bytes` as a new revision of `file`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::CreateDir`] if the mirrored directory cannot be
    /// created; nothing is written in that case and a pending original stays
    /// pending. Copy failures do not abort the flow and are returned in
    /// [`RevisionReport::failures`].
    pub fn record_revision(
        &self,
        state: &mut DocumentState,
        file: &Path,
        bytes: &[u8],
    ) -> Result<RecordOutcome> {
        if state.is_excluded() {
            return Ok(RecordOutcome::Excluded);
        }

        let Some(relative) = self.resolve_relative(state, file) else {
            debug!(path = %file.display(), "File is outside the workspace, not tracked");
            return Ok(RecordOutcome::Untrackable);
        };

        if self.search.locate(&relative).is_none() {
            debug!(path = %relative.display(), "File is excluded from history");
            state.mark_excluded();
            return Ok(RecordOutcome::Excluded);
        }

        let pattern = match self.layout().pattern(&relative) {
            Ok(pattern) => pattern,
            Err(e) => {
                debug!(path = %relative.display(), error = %e, "File name cannot be encoded");
                return Ok(RecordOutcome::Untrackable);
            }
        };

        fs::create_dir_all(&pattern.dir).map_err(|source| HistoryError::CreateDir {
            path: pattern.dir.clone(),
            source,
        })?;

        let mut report = RevisionReport::default();
        let mut existing: Option<Vec<Revision>> = None;

        if let Some(original) = state.take_pending_original() {
            match self.index.list_matching(&pattern, Limit::Unlimited) {
                Ok(revisions) => {
                    if revisions.is_empty() {
                        let target =
                            pattern.revision_path(RevisionStamp::from_system_time(original.mtime));
                        match write_revision(file, &target, &original.bytes) {
                            Ok(()) => report.original = Some(target),
                            Err(e) => report.failures.push(e),
                        }
                    } else {
                        debug!(
                            path = %relative.display(),
                            existing = revisions.len(),
                            "History exists, discarding pending original"
                        );
                    }
                    existing = Some(revisions);
                }
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "Cannot list history, original not saved");
                }
            }
        }

        let now = self.clock.now();
        let target = pattern.revision_path(RevisionStamp::from_local(now));
        match write_revision(file, &target, bytes) {
            Ok(()) => report.revision = Some(target),
            Err(e) => report.failures.push(e),
        }

        if self.retention.is_enabled() {
            let revisions = match existing {
                Some(revisions) => Ok(revisions),
                None => self.index.list_matching(&pattern, Limit::Unlimited),
            };
            match revisions {
                Ok(revisions) => {
                    let paths: Vec<&Path> = revisions.iter().map(|r| r.path.as_path()).collect();
                    report.purged = self.retention.purge(&paths, SystemTime::from(now));
                }
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "Cannot list history for purge");
                }
            }
        }

        Ok(RecordOutcome::Recorded(report))
    }

    /// Returns the cached relative path, resolving and caching it on first use.
    fn resolve_relative(&self, state: &mut DocumentState, file: &Path) -> Option<PathBuf> {
        if let Some(relative) = state.relative() {
            return Some(relative.to_path_buf());
        }
        let relative = self.layout().relative_path(file)?;
        state.set_relative(relative.clone());
        Some(relative)
    }
}

/// Reads a file's bytes and modification time.
pub(crate) fn read_original(file: &Path) -> std::io::Result<PendingOriginal> {
    let mtime = fs::metadata(file)?.modified()?;
    let bytes = fs::read(file)?;
    Ok(PendingOriginal { bytes, mtime })
}

/// Writes revision bytes, reporting the source and target on failure.
fn write_revision(source: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(target, bytes).map_err(|e| {
        let err = HistoryError::Copy {
            from: source.to_path_buf(),
            to: target.to_path_buf(),
            source: e,
        };
        error!(error = %err, "Failed to write revision");
        err
    })?;
    debug!(path = %target.display(), len = bytes.len(), "Wrote revision");
    Ok(())
}
