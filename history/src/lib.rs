//! Local History - timestamped revisions of workspace files.
//!
//! This crate keeps a shadow copy of every saved file in a history tree next
//! to (or outside of) the workspace, so earlier states can be listed,
//! compared and restored.
//!
//! # Overview
//!
//! Saving `src/a.ts` at 10:15:30 on 2023-06-01 writes
//! `.history/src/a_20230601101530.ts`. The first time a file is saved, the
//! state it had before the save is kept as well, stamped with its own
//! modification time. Revisions older than the retention window are deleted
//! as new ones are written.
//!
//! # Modules
//!
//! - [`codec`]: Mapping between workspace paths and revision paths
//! - [`index`]: Listing the revisions of a file in capture order
//! - [`retention`]: Age-based deletion of revisions
//! - [`tracker`]: Per-file state between the pre-save and post-save hooks
//! - [`store`]: The original-then-revision write flow
//! - [`workspace`]: Exclude patterns and workspace file lookup
//! - [`service`]: Save hooks and maintenance operations for one workspace
//! - [`config`]: Configuration from a settings file and environment variables
//! - [`error`]: Error types for history operations
//! - [`watcher`]: File system watcher turning writes into save events
//! - [`utils`]: Shared utilities (debouncing)

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod retention;
pub mod service;
pub mod store;
pub mod tracker;
pub mod utils;
pub mod watcher;
pub mod workspace;

pub use codec::{CodecError, HistoryLayout, PathSpace, RevisionPattern, RevisionStamp, Suffix};
pub use config::{Config, ConfigError};
pub use error::{HistoryError, Result};
pub use index::{FsEnumerator, HistoryIndex, Limit, Revision, RevisionEnumerator};
pub use retention::RetentionPolicy;
pub use service::HistoryService;
pub use store::{Clock, RecordOutcome, RevisionReport, RevisionStore, SystemClock};
pub use tracker::{DocumentState, DocumentTracker, PendingOriginal};
pub use utils::{Debouncer, DebouncerError};
pub use watcher::{WatchEvent, WatcherError, WorkspaceWatcher};
pub use workspace::{ExcludeSet, FsWorkspaceSearch, WorkspaceSearch, HOST_EXCLUDE};
