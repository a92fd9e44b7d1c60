//! Age-based purge of revision files.
//!
//! Each revision is judged on its own filesystem birth time, not on the latest
//! save of its workspace file. A revision older than the retention window is
//! deleted; everything else is left alone.
//!
//! Deletions are independent of each other. A file whose metadata cannot be
//! read is treated as already gone, and a failed delete is logged and skipped.
//! Directories are never removed, so emptied directories stay behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, trace, warn};

/// Seconds in one retention day.
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Retention window applied to revision files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    days_limit: u32,
}

impl RetentionPolicy {
    /// Creates a policy keeping revisions for `days_limit` days.
    ///
    /// A limit of 0 disables purging.
    #[must_use]
    pub fn new(days_limit: u32) -> Self {
        Self { days_limit }
    }

    /// Returns the configured limit in days.
    #[must_use]
    pub fn days_limit(&self) -> u32 {
        self.days_limit
    }

    /// Returns true if purging is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.days_limit > 0
    }

    /// Returns true if a file born at `birth` has outlived the window at `now`.
    #[must_use]
    pub fn is_expired(&self, birth: SystemTime, now: SystemTime) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let window = Duration::from_secs(u64::from(self.days_limit) * SECS_PER_DAY);
        match now.duration_since(birth) {
            Ok(age) => age > window,
            // Born in the future (clock skew): never expired.
            Err(_) => false,
        }
    }

    /// Deletes every regular file in `files` that has outlived the window.
    ///
    /// Returns the paths that were actually deleted.
    pub fn purge<P: AsRef<Path>>(&self, files: &[P], now: SystemTime) -> Vec<PathBuf> {
        let mut deleted = Vec::new();

        if !self.is_enabled() {
            return deleted;
        }

        for file in files {
            let file = file.as_ref();

            let birth = match birth_time(file) {
                Ok(Some(birth)) => birth,
                Ok(None) => {
                    trace!(path = %file.display(), "Not a regular file, skipping");
                    continue;
                }
                Err(e) => {
                    debug!(path = %file.display(), error = %e, "Cannot stat revision, skipping");
                    continue;
                }
            };

            if !self.is_expired(birth, now) {
                continue;
            }

            match fs::remove_file(file) {
                Ok(()) => {
                    debug!(path = %file.display(), days_limit = self.days_limit, "Purged revision");
                    deleted.push(file.to_path_buf());
                }
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Failed to purge revision");
                }
            }
        }

        deleted
    }
}

/// Reads the birth time of a regular file.
///
/// Returns `Ok(None)` for anything that is not a regular file. Platforms or
/// filesystems that do not report creation time fall back to the
/// modification time.
fn birth_time(path: &Path) -> io::Result<Option<SystemTime>> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Ok(None);
    }

    match metadata.created() {
        Ok(created) => Ok(Some(created)),
        Err(e) => {
            trace!(path = %path.display(), error = %e, "No creation time, using mtime");
            metadata.modified().map(Some)
        }
    }
}
