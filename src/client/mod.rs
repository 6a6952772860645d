//! client
//!
//! Single interface for driving the git binary.
//!
//! # Architecture
//!
//! This module is the **only doorway** to the git executable. All
//! invocations flow through [`GitClient`], which composes argv and
//! environment from its configuration plus per-call
//! [`ExecControls`], and hands the resolved invocation to the
//! [`crate::exec`] runner. No other module spawns processes directly.
//!
//! # Responsibilities
//!
//! - Generic execution (`exec`, `exec_with`, `spawn`)
//! - A thin wrapper per known git subcommand
//! - Version interrogation and semver range gating
//! - Tree-ish resolution (`tree_hash`) and tree-node construction
//! - Ownership of the batched `mktree` worker, including shutdown
//!
//! # Invariants
//!
//! - The client is internally synchronized: all methods take `&self`
//! - The batched worker is created lazily and terminated by
//!   [`GitClient::cleanup`] (also called on drop)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use espalier::client::GitClient;
//! use espalier::exec::{GitArgs, GitOptions};
//!
//! # fn main() -> Result<(), espalier::client::GitError> {
//! let client = Arc::new(GitClient::new());
//!
//! let status = client.status(GitOptions::new().flag("porcelain"))?;
//! let head = client.rev_parse(GitArgs::new()
//!     .options(GitOptions::new().flag("verify"))
//!     .positional("HEAD"))?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::types::{Oid, TypeError};
use crate::exec::runner::{self, Invocation};
use crate::exec::{ExecControls, ExecError, GitArgs, GitOptions, GitProcess};
use crate::tree::batch::BatchedTreeBuilder;
use crate::tree::TreeNode;

pub use crate::core::config::{read_config_set, write_config_set};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Subprocess execution failed (spawn failure, non-zero exit,
    /// output overflow, or an I/O error on the child's pipes).
    #[error("subprocess failure: {0}")]
    Exec(#[from] ExecError),

    /// A caller-supplied argument is malformed.
    #[error("bad argument: {message}")]
    BadArgument {
        /// Description of the problem
        message: String,
    },

    /// Git produced output this model cannot parse.
    #[error("unparseable git output: {line:?}")]
    Parse {
        /// The offending line
        line: String,
    },

    /// The installed git does not satisfy a required version range.
    #[error("git version {actual} does not satisfy {required}")]
    UnsupportedVersion {
        /// The required range
        required: String,
        /// The installed version
        actual: String,
    },

    /// Type validation failed.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Config-set file access failed.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Internal invariant violation.
    #[error("internal error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

/// Configuration for a [`GitClient`].
///
/// All fields are optional except the command name; an unconfigured
/// client runs plain `git` and lets it discover the repository from the
/// process working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitClientConfig {
    /// Repository git directory, passed as `--git-dir`.
    pub git_dir: Option<PathBuf>,
    /// Working tree, passed as `--work-tree`.
    pub work_tree: Option<PathBuf>,
    /// Index file, exported as `GIT_INDEX_FILE`.
    pub index_file: Option<PathBuf>,
    /// The git binary to run.
    pub command: String,
}

impl Default for GitClientConfig {
    fn default() -> Self {
        Self {
            git_dir: None,
            work_tree: None,
            index_file: None,
            command: "git".to_string(),
        }
    }
}

/// The git client.
///
/// A stateful facade bound to an optional git-dir / work-tree / index
/// file. Owns the batched tree builder used by
/// [`crate::tree::TreeNode::write`]; terminate it with
/// [`GitClient::cleanup`] (dropping the client does this too).
pub struct GitClient {
    config: GitClientConfig,
    version: Mutex<Option<Version>>,
    builder: OnceLock<BatchedTreeBuilder>,
}

impl std::fmt::Debug for GitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitClient")
            .field("config", &self.config)
            .finish()
    }
}

impl GitClient {
    // =========================================================================
    // Construction and configuration
    // =========================================================================

    /// Create a client with default configuration (plain `git`, no
    /// repository overrides).
    pub fn new() -> Self {
        Self::with_config(GitClientConfig::default())
    }

    /// Create a client with explicit configuration.
    pub fn with_config(config: GitClientConfig) -> Self {
        Self {
            config,
            version: Mutex::new(None),
            builder: OnceLock::new(),
        }
    }

    /// The client's configuration.
    pub fn config(&self) -> &GitClientConfig {
        &self.config
    }

    // =========================================================================
    // Generic execution
    // =========================================================================

    /// Run a subcommand in capture mode and return its stdout with
    /// trailing whitespace trimmed.
    ///
    /// # Errors
    ///
    /// - [`GitError::Exec`] wrapping [`ExecError::Subprocess`] on a
    ///   non-zero exit
    /// - [`GitError::Exec`] wrapping [`ExecError::SpawnFailed`] if the
    ///   binary cannot be started
    pub fn exec(&self, subcommand: &str, args: impl Into<GitArgs>) -> Result<String, GitError> {
        match self.exec_with(subcommand, args, ExecControls::default())? {
            Some(out) => Ok(out),
            None => Err(GitError::Internal {
                message: "capture resolved empty without null_on_error".to_string(),
            }),
        }
    }

    /// Run a subcommand in capture mode with explicit executor
    /// controls.
    ///
    /// Returns `Ok(None)` instead of failing when the process exits
    /// non-zero and `controls.null_on_error` is set.
    pub fn exec_with(
        &self,
        subcommand: &str,
        args: impl Into<GitArgs>,
        controls: ExecControls,
    ) -> Result<Option<String>, GitError> {
        let invocation = self.invocation(subcommand, args.into(), controls);
        Ok(runner::run_capture(invocation)?)
    }

    /// Spawn a subcommand and return the live process handle.
    ///
    /// Per-line callbacks installed in `controls` stream stdout/stderr
    /// as the child produces them; [`GitProcess::capture_output`]
    /// collects the rest.
    pub fn spawn(
        &self,
        subcommand: &str,
        args: impl Into<GitArgs>,
        controls: ExecControls,
    ) -> Result<GitProcess, GitError> {
        let invocation = self.invocation(subcommand, args.into(), controls);
        Ok(runner::spawn(invocation)?)
    }

    fn invocation(&self, subcommand: &str, args: GitArgs, controls: ExecControls) -> Invocation {
        Invocation {
            command: self.config.command.clone(),
            subcommand: subcommand.to_string(),
            args,
            git_dir: controls.git_dir.clone().or_else(|| self.config.git_dir.clone()),
            work_tree: controls
                .work_tree
                .clone()
                .or_else(|| self.config.work_tree.clone()),
            index_file: controls
                .index_file
                .clone()
                .or_else(|| self.config.index_file.clone()),
            controls,
        }
    }

    // =========================================================================
    // Version gating
    // =========================================================================

    /// The installed git version, memoized after the first query.
    ///
    /// Tolerates vendor suffixes (`2.39.3 (Apple Git-146)`,
    /// `2.34.1.windows.1`).
    pub fn version(&self) -> Result<Version, GitError> {
        let mut cached = self
            .version
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(version) = cached.as_ref() {
            return Ok(version.clone());
        }
        let raw = self.exec("version", ())?;
        let version = parse_git_version(&raw)?;
        *cached = Some(version.clone());
        Ok(version)
    }

    /// Check the installed git against a semver range such as
    /// `">=2.7.4"`.
    ///
    /// # Errors
    ///
    /// `GitError::BadArgument` if the range itself does not parse.
    pub fn satisfies_version(&self, required: &str) -> Result<bool, GitError> {
        let req = VersionReq::parse(required).map_err(|err| GitError::BadArgument {
            message: format!("invalid version requirement {required:?}: {err}"),
        })?;
        Ok(req.matches(&self.version()?))
    }

    /// Fail with [`GitError::UnsupportedVersion`] unless the installed
    /// git satisfies the range.
    pub fn require_version(&self, required: &str) -> Result<(), GitError> {
        if self.satisfies_version(required)? {
            Ok(())
        } else {
            Err(GitError::UnsupportedVersion {
                required: required.to_string(),
                actual: self.version()?.to_string(),
            })
        }
    }

    // =========================================================================
    // Trees
    // =========================================================================

    /// Resolve any tree-ish to the hash of its tree via
    /// `rev-parse --verify <treeish>^{tree}`.
    pub fn tree_hash(&self, treeish: &str) -> Result<Oid, GitError> {
        let out = self.rev_parse(
            GitArgs::new()
                .options(GitOptions::new().flag("verify"))
                .positional(format!("{treeish}^{{tree}}")),
        )?;
        Ok(Oid::new(out.trim())?)
    }

    /// A tree node seeded with an existing tree hash, hydrated lazily.
    pub fn tree(self: &Arc<Self>, oid: Oid) -> TreeNode {
        TreeNode::with_oid(Arc::clone(self), oid)
    }

    /// A fresh, dirty, empty tree node.
    pub fn empty_tree(self: &Arc<Self>) -> TreeNode {
        TreeNode::empty(Arc::clone(self))
    }

    /// The batched `mktree` worker, created on first use.
    pub fn tree_builder(&self) -> &BatchedTreeBuilder {
        self.builder.get_or_init(|| {
            BatchedTreeBuilder::new(
                self.config.command.clone(),
                self.config.git_dir.clone(),
                BatchedTreeBuilder::DEFAULT_IDLE,
            )
        })
    }

    /// Terminate the batched worker, if one was started.
    ///
    /// Idempotent; the next tree write respawns the worker. Called
    /// automatically when the client is dropped, and should be wired
    /// into any host shutdown hook.
    pub fn cleanup(&self) {
        if let Some(builder) = self.builder.get() {
            builder.shutdown();
        }
    }
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GitClient {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn parse_git_version(raw: &str) -> Result<Version, GitError> {
    let raw = raw.trim();
    let rest = raw.strip_prefix("git version ").unwrap_or(raw);
    let token = rest.split_whitespace().next().unwrap_or("");
    let numeric: String = token
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut parts = numeric.split('.').filter(|p| !p.is_empty());
    let major = parts
        .next()
        .and_then(|p| p.parse::<u64>().ok())
        .ok_or_else(|| GitError::Parse {
            line: raw.to_string(),
        })?;
    let minor = parts.next().and_then(|p| p.parse::<u64>().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.parse::<u64>().ok()).unwrap_or(0);
    Ok(Version::new(major, minor, patch))
}

// =============================================================================
// Subcommand wrappers
// =============================================================================

macro_rules! passthrough_subcommands {
    ($( $(#[$meta:meta])* $name:ident => $subcommand:literal ),+ $(,)?) => {
        impl GitClient {
            $(
                $(#[$meta])*
                pub fn $name(&self, args: impl Into<GitArgs>) -> Result<String, GitError> {
                    self.exec($subcommand, args)
                }
            )+
        }
    };
}

passthrough_subcommands! {
    /// Run `git add`.
    add => "add",
    /// Run `git branch`.
    branch => "branch",
    /// Run `git cat-file`.
    cat_file => "cat-file",
    /// Run `git checkout`.
    checkout => "checkout",
    /// Run `git clean`.
    clean => "clean",
    /// Run `git commit`.
    commit => "commit",
    /// Run `git commit-tree`.
    commit_tree => "commit-tree",
    /// Run `git config`.
    config_cmd => "config",
    /// Run `git diff`.
    diff => "diff",
    /// Run `git fetch`.
    fetch => "fetch",
    /// Run `git hash-object`.
    hash_object => "hash-object",
    /// Run `git init`.
    init => "init",
    /// Run `git log`.
    log => "log",
    /// Run `git ls-files`.
    ls_files => "ls-files",
    /// Run `git ls-remote`.
    ls_remote => "ls-remote",
    /// Run `git ls-tree`.
    ls_tree => "ls-tree",
    /// Run `git merge`.
    merge_cmd => "merge",
    /// Run `git mktree`.
    mktree => "mktree",
    /// Run `git push`.
    push => "push",
    /// Run `git read-tree`.
    read_tree => "read-tree",
    /// Run `git reset`.
    reset => "reset",
    /// Run `git rev-list`.
    rev_list => "rev-list",
    /// Run `git rev-parse`.
    rev_parse => "rev-parse",
    /// Run `git show`.
    show => "show",
    /// Run `git status`.
    status => "status",
    /// Run `git symbolic-ref`.
    symbolic_ref => "symbolic-ref",
    /// Run `git tag`.
    tag => "tag",
    /// Run `git update-index`.
    update_index => "update-index",
    /// Run `git update-ref`.
    update_ref => "update-ref",
    /// Run `git write-tree`.
    write_tree => "write-tree",
}
