//! Utility modules for Local History.
//!
//! # Modules
//!
//! - [`debounce`]: Event debouncing for coalescing rapid file system events

pub mod debounce;

pub use debounce::{DebounceSender, Debouncer, DebouncerError};
