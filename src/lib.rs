//! # Context Copilot (library root)
//!
//! A local retrieval-augmented coding copilot:
//! - Persistent embedding storage with atomic batches (`vector_store`, `models`, `schema`, `db`).
//! - Brute-force cosine top-k search (`search`) and context assembly (`context`).
//! - A persistent per-session conversation memory (`memory`).
//! - Prompt composition over templates (`prompt`, `template`).
//! - Pluggable embedding and completion boundaries (`embedding`, `completion`).
//! - Directory ingestion (`ingest`) and the `copilot` CLI (`commands`).
//!
//! [`copilot::Copilot`] ties these together behind `search` and `chat`.
//!
//! ## Configuration directory
//! Config and templates live in the per-platform config directory, e.g.:
//!
//! - macOS: `~/Library/Application Support/com.context-copilot.copilot`
//! - Linux (XDG): `~/.config/copilot`
//! - Windows: `C:\Users\<you>\AppData\Roaming\context-copilot\copilot`

use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;

pub mod commands;
pub mod completion;
pub mod config;
pub mod context;
pub mod copilot;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod schema;
pub mod search;
pub mod template;
pub mod vector_store;

pub use error::{CopilotError, Result};

/// Return the per-platform configuration directory.
///
/// The directory is **not** created by this function.
///
/// # Errors
/// [`CopilotError::Io`] with [`io::ErrorKind::NotFound`] when no home directory
/// can be determined.
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "context-copilot", "copilot").ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "Unable to determine config directory",
        )
    })?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
