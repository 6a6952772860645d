//! tree
//!
//! The in-memory model of git tree objects.
//!
//! # Architecture
//!
//! - [`node`] - [`TreeNode`]: lazy hydration, overlay/tombstone
//!   mutation, path navigation, batched write-back; [`BlobRef`]
//! - [`merge`] - Filtered recursive merge (overlay / replace) under
//!   glob matchers
//! - [`batch`] - The persistent `mktree --batch` worker every tree
//!   write funnels through
//! - [`cache`] - Process-wide hash -> manifest cache backing hydration
//! - [`snapshot`] - Flat `path -> entry` reads and builds of whole
//!   trees
//!
//! # Invariants
//!
//! - A clean node's hash is the true object-store hash of its visible
//!   children; a clean node's overlay holds no tombstones and no net
//!   changes
//! - Lookups see the overlay layered on the base, tombstones honored
//! - A tree whose live entries serialize to the empty set resolves to
//!   [`crate::core::types::Oid::empty_tree`] without touching the
//!   builder
//! - Mutation marks the node and every ancestor on the mutation path
//!   dirty
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use espalier::client::GitClient;
//! use espalier::tree::{MergeMode, MergeOptions};
//!
//! # fn main() -> Result<(), espalier::client::GitError> {
//! let client = Arc::new(GitClient::new());
//! let mut target = client.tree(client.tree_hash("main")?);
//! let mut input = client.tree(client.tree_hash("feature")?);
//!
//! let opts = MergeOptions::new(&["src/**", "!src/generated/**"], MergeMode::Overlay)?;
//! target.merge(&mut input, &opts)?;
//! let merged = target.write()?;
//! # let _ = merged;
//! # Ok(())
//! # }
//! ```

use crate::client::GitError;
use crate::core::types::{FileMode, Oid};

pub mod batch;
pub mod cache;
pub mod merge;
pub mod node;
pub mod snapshot;

pub use batch::{BatchedTreeBuilder, TreeSpecEntry};
pub use cache::{ManifestEntry, TreeManifest};
pub use merge::{MergeMode, MergeOptions};
pub use node::{BlobRef, TreeEntry, TreeNode};
pub use snapshot::TreeSnapshot;

/// Parse one `ls-tree` line: `MODE SP TYPE SP HASH TAB PATH`.
///
/// Any malformation (including an object kind outside blob/tree) is a
/// [`GitError::Parse`] and fails the hydration in progress.
pub(crate) fn parse_ls_tree_line(line: &str) -> Result<(String, ManifestEntry), GitError> {
    let parse_err = || GitError::Parse {
        line: line.to_string(),
    };

    let (meta, path) = line.split_once('\t').ok_or_else(parse_err)?;
    let mut fields = meta.split(' ');
    let mode = fields.next().ok_or_else(parse_err)?;
    let kind = fields.next().ok_or_else(parse_err)?;
    let oid = fields.next().ok_or_else(parse_err)?;
    if fields.next().is_some() || path.is_empty() {
        return Err(parse_err());
    }

    let entry = ManifestEntry {
        mode: FileMode::new(mode).map_err(|_| parse_err())?,
        kind: kind.parse().map_err(|_| parse_err())?,
        oid: Oid::new(oid).map_err(|_| parse_err())?,
    };
    Ok((path.to_string(), entry))
}
