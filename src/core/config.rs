//! core::config
//!
//! Flat-file "config set" helpers.
//!
//! A config set is the simplest persistent collection git tooling needs:
//! an ascii text file with one entry per line. Read order is preserved;
//! writes deduplicate while keeping first-occurrence order so the files
//! diff cleanly.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from config-set file access.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("config set {path}: {source}")]
    Io {
        /// The file being accessed
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// An entry contains non-ascii or control characters.
    #[error("config set {path}: entry is not plain ascii: {entry:?}")]
    InvalidEntry {
        /// The file being accessed
        path: PathBuf,
        /// The offending entry
        entry: String,
    },
}

fn check_entry(path: &Path, entry: &str) -> Result<(), ConfigError> {
    let ok = !entry.is_empty()
        && entry
            .bytes()
            .all(|b| b.is_ascii() && !b.is_ascii_control());
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidEntry {
            path: path.to_path_buf(),
            entry: entry.to_string(),
        })
    }
}

/// Read a config set: one ascii entry per line, blank lines skipped.
///
/// A missing file reads as the empty set.
///
/// # Errors
///
/// Returns `ConfigError::Io` on read failure and
/// `ConfigError::InvalidEntry` if a line is not plain ascii.
pub fn read_config_set(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: err,
            })
        }
    };

    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        check_entry(path, line)?;
        entries.push(line.to_string());
    }
    Ok(entries)
}

/// Write a config set: one ascii entry per line, trailing newline,
/// duplicates dropped while keeping first-occurrence order.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEntry` before touching the file if any
/// entry is not plain ascii, and `ConfigError::Io` on write failure.
pub fn write_config_set<S: AsRef<str>>(path: &Path, entries: &[S]) -> Result<(), ConfigError> {
    let mut seen = std::collections::BTreeSet::new();
    let mut text = String::new();
    for entry in entries {
        let entry = entry.as_ref().trim();
        check_entry(path, entry)?;
        if seen.insert(entry.to_string()) {
            text.push_str(entry);
            text.push('\n');
        }
    }

    std::fs::write(path, text).map_err(|err| ConfigError::Io {
        path: path.to_path_buf(),
        source: err,
    })
}
