//! Platform abstraction layer for cross-platform compatibility.
//!
//! This module centralizes all platform-specific code to make it easy to find,
//! maintain, and extend. All `#[cfg]` blocks for OS-specific behavior should
//! live in this module rather than scattered throughout the codebase.
//!
//! - `files` - Hidden-file marking and lexical path normalization
//! - `process` - Process enumeration by name and forced termination

pub mod files;
pub mod process;

pub use files::{hide_file, normalize_path};
pub use process::{
    find_processes_by_name, force_kill, kill_processes_by_name, suppress_console_window,
};
