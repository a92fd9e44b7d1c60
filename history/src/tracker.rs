//! Per-file transient state for documents seen by the save hooks.
//!
//! Entries are created lazily on the first pre-save or post-save event of a
//! file and are never evicted: the table grows with the number of distinct
//! files saved during the process lifetime. An excluded entry must stay
//! excluded permanently, which any eviction would break.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// The on-disk state of a file captured just before a save overwrote it.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingOriginal {
    /// File bytes before the save.
    pub bytes: Vec<u8>,
    /// Modification time of those bytes; becomes the baseline's stamp.
    pub mtime: SystemTime,
}

impl fmt::Debug for PendingOriginal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOriginal")
            .field("len", &self.bytes.len())
            .field("mtime", &self.mtime)
            .finish()
    }
}

/// Transient state of one tracked file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DocumentState {
    relative: Option<PathBuf>,
    pending_original: Option<PendingOriginal>,
    excluded: bool,
}

impl DocumentState {
    /// Returns the cached workspace-relative path, if resolved.
    #[must_use]
    pub fn relative(&self) -> Option<&Path> {
        self.relative.as_deref()
    }

    /// Caches the workspace-relative path.
    pub fn set_relative(&mut self, relative: PathBuf) {
        self.relative = Some(relative);
    }

    /// Returns true if an original snapshot is waiting for the next save.
    #[must_use]
    pub fn has_pending_original(&self) -> bool {
        self.pending_original.is_some()
    }

    /// Returns the pending original snapshot, if any.
    #[must_use]
    pub fn pending_original(&self) -> Option<&PendingOriginal> {
        self.pending_original.as_ref()
    }

    /// Stores an original snapshot unless one is already pending.
    ///
    /// Returns true if the snapshot was stored.
    pub fn offer_original(&mut self, original: PendingOriginal) -> bool {
        if self.excluded || self.pending_original.is_some() {
            return false;
        }
        self.pending_original = Some(original);
        true
    }

    /// Removes and returns the pending original snapshot.
    pub fn take_pending_original(&mut self) -> Option<PendingOriginal> {
        self.pending_original.take()
    }

    /// Returns true once the file has been found excluded.
    #[must_use]
    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    /// Marks the file permanently excluded and drops any pending original.
    pub fn mark_excluded(&mut self) {
        self.excluded = true;
        self.pending_original = None;
    }
}

/// Process-wide table of [`DocumentState`] keyed by absolute file path.
#[derive(Debug, Default)]
pub struct DocumentTracker {
    documents: HashMap<PathBuf, DocumentState>,
}

impl DocumentTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state of `path`, creating an empty entry on first use.
    pub fn entry(&mut self, path: &Path) -> &mut DocumentState {
        self.documents.entry(path.to_path_buf()).or_default()
    }

    /// Returns the state of `path` without creating it.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&DocumentState> {
        self.documents.get(path)
    }

    /// Returns the number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if no file has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
