//! exec
//!
//! Subprocess invocation of the git binary.
//!
//! # Architecture
//!
//! This module owns everything between a structured call and the
//! operating system:
//!
//! - [`options`] - Option maps and their argv encoding
//! - [`runner`] - argv/env composition and the three execution modes
//!   (capture, spawn, shell)
//! - [`process`] - The live process handle for spawn mode, with
//!   line-streaming and memoized output capture
//!
//! Higher layers never touch `std::process` directly; the
//! [`crate::client::GitClient`] facade resolves each call into an
//! invocation and hands it here.
//!
//! # Execution modes
//!
//! - **Capture** runs the binary to completion and returns stdout with
//!   trailing whitespace trimmed. A non-zero exit is
//!   [`ExecError::Subprocess`] unless the caller opted into
//!   `null_on_error`.
//! - **Spawn** returns a [`process::GitProcess`] with a stdin writer and
//!   memoized capture helpers; stdout/stderr are drained by reader
//!   threads that assemble `\n`-delimited lines for per-call callbacks.
//! - **Shell** joins the composed argv into one quoted string and runs
//!   it through `sh -c`, with capture semantics.
//!
//! # Invariants
//!
//! - Line callbacks fire exactly once per newline-terminated line;
//!   partial lines are buffered across reads and a trailing unterminated
//!   line is delivered if non-empty
//! - Captured output is bounded (5 MiB unless overridden); exceeding the
//!   bound kills the child and fails the invocation
//! - Every spawned child is reaped: by capture, by [`process::GitProcess::wait`],
//!   or by the handle's `Drop`

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod options;
pub(crate) mod process;
pub(crate) mod runner;

pub use options::{GitArg, GitArgs, GitOptions, OptValue};
pub use process::GitProcess;

/// Default bound on captured output per invocation.
pub const DEFAULT_MAX_OUTPUT: usize = 5 * 1024 * 1024;

/// A per-line streaming callback.
///
/// Lines are delivered without their terminating newline. A trailing
/// partial line at process exit is delivered if non-empty.
pub type LineCallback = Box<dyn FnMut(&str) + Send + 'static>;

/// Errors from subprocess execution.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The binary could not be started at all (typically: not installed
    /// or not on `PATH`). Distinct from a started process failing.
    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        /// The command that failed to start
        command: String,
        /// The underlying OS error
        #[source]
        source: io::Error,
    },

    /// The process ran and exited non-zero.
    #[error("git exited with code {code}: {stderr}")]
    Subprocess {
        /// Exit code (-1 if terminated by signal)
        code: i32,
        /// Captured standard output, possibly empty
        stdout: String,
        /// Captured standard error, possibly empty
        stderr: String,
    },

    /// Captured output exceeded the per-invocation bound.
    #[error("captured output exceeded {limit} bytes")]
    OutputLimit {
        /// The configured bound
        limit: usize,
    },

    /// An I/O failure while exchanging data with the child.
    #[error("subprocess i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Per-invocation executor controls.
///
/// These never become git argv; they steer how the executor runs the
/// process. Repository location fields override the client's
/// configuration for this one call.
pub struct ExecControls {
    /// Override the repository git directory for this call.
    pub git_dir: Option<PathBuf>,
    /// Override the working tree for this call.
    pub work_tree: Option<PathBuf>,
    /// Override the index file (`GIT_INDEX_FILE`) for this call.
    pub index_file: Option<PathBuf>,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
    /// Extra environment entries, merged over the base environment.
    pub env: Vec<(String, String)>,
    /// When `true` (the default) the parent environment is the fallback
    /// base; when `false` the child starts from an empty environment.
    pub preserve_env: bool,
    /// Resolve with `None` instead of failing when git exits non-zero.
    pub null_on_error: bool,
    /// Run through the platform shell instead of direct execution.
    pub shell: bool,
    /// Forward each stdout/stderr line to the logger.
    pub passthrough: bool,
    /// Bound on captured output; `None` uses [`DEFAULT_MAX_OUTPUT`].
    pub max_output: Option<usize>,
    /// Per-line stdout callback.
    pub on_stdout: Option<LineCallback>,
    /// Per-line stderr callback.
    pub on_stderr: Option<LineCallback>,
}

impl Default for ExecControls {
    fn default() -> Self {
        Self {
            git_dir: None,
            work_tree: None,
            index_file: None,
            cwd: None,
            env: Vec::new(),
            preserve_env: true,
            null_on_error: false,
            shell: false,
            passthrough: false,
            max_output: None,
            on_stdout: None,
            on_stderr: None,
        }
    }
}

impl std::fmt::Debug for ExecControls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecControls")
            .field("git_dir", &self.git_dir)
            .field("work_tree", &self.work_tree)
            .field("index_file", &self.index_file)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("preserve_env", &self.preserve_env)
            .field("null_on_error", &self.null_on_error)
            .field("shell", &self.shell)
            .field("passthrough", &self.passthrough)
            .field("max_output", &self.max_output)
            .field("on_stdout", &self.on_stdout.as_ref().map(|_| "FnMut"))
            .field("on_stderr", &self.on_stderr.as_ref().map(|_| "FnMut"))
            .finish()
    }
}
