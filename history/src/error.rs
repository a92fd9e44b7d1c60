//! Error types for Local History.
//!
//! This module defines the crate-level error type. Concern-specific errors
//! ([`ConfigError`], [`CodecError`], [`WatcherError`]) convert into it.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::watcher::WatcherError;

/// Errors that can occur during history operations.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The mirrored history directory could not be created.
    ///
    /// Aborts the whole revision: neither the original nor the new revision
    /// is written.
    #[error("error with mkdir: '{source}' path '{path}'")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bytes could not be copied into a revision file.
    #[error("error with copy: '{source}' {from} => {to}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A history path does not decode.
    #[error("malformed history path: {0}")]
    Decode(#[from] CodecError),

    /// The exclude setting is not a valid glob.
    #[error("invalid exclude pattern: {0}")]
    Exclude(#[from] ignore::Error),

    /// File watching error.
    #[error("file watch error: {0}")]
    Watch(#[from] WatcherError),

    /// No revision exists for the file.
    #[error("no history for {0}")]
    NoHistory(PathBuf),
}

/// A specialized `Result` type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
