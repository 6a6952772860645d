//! Espalier - programmatic git object-store access over the git CLI
//!
//! Espalier drives the installed `git` binary as a subprocess and layers an
//! in-memory, lazily hydrated, copy-on-write model of git tree objects on
//! top of it. It exposes two intertwined capabilities:
//!
//! - a generic command executor that translates structured option maps into
//!   git's argv/environment conventions, with capture, spawn, and shell
//!   execution modes, per-call repository overrides, and line-streaming
//!   callbacks;
//! - a tree model supporting partial hydration from the object store,
//!   overlay-with-tombstone mutation, path navigation, filtered recursive
//!   merges under glob matchers, and batched content-addressed write-back
//!   through a single long-lived `git mktree --batch` child.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`core`] - Strong domain types (object ids, file modes) and the
//!   flat-file config-set helpers
//! - [`exec`] - Subprocess invocation: option encoding, argv/env
//!   composition, capture/spawn/shell modes, line streaming
//! - [`client`] - The [`client::GitClient`] facade: the single doorway to
//!   the git binary, subcommand wrappers, version gating, and the owned
//!   batch worker
//! - [`tree`] - The tree model: [`tree::TreeNode`], the object cache, the
//!   batched tree builder, merges, and snapshots
//!
//! # Correctness Invariants
//!
//! Espalier maintains the following invariants:
//!
//! 1. A clean tree node's hash is the true object-store hash of its content
//! 2. Lookups see pending mutations overlaid on the hydrated base, with
//!    tombstones suppressing deleted entries
//! 3. A tree whose live entries serialize to the empty set resolves to the
//!    canonical empty-tree hash
//! 4. Mutating any descendant marks every ancestor on the path dirty
//! 5. Batched tree writes resolve in submission order
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use espalier::client::GitClient;
//! use espalier::tree::BlobRef;
//!
//! # fn main() -> Result<(), espalier::client::GitError> {
//! let client = Arc::new(GitClient::new());
//! client.require_version(">=2.7.4")?;
//!
//! let base = client.tree_hash("HEAD")?;
//! let mut tree = client.tree(base);
//!
//! let blob = BlobRef::write(&client, b"hello\n")?;
//! tree.subtree_or_create("docs")?
//!     .set_child("hello.txt", blob);
//!
//! let new_hash = tree.write()?;
//! println!("new tree: {new_hash}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod core;
pub mod exec;
pub mod tree;
