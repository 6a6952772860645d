//! tree::snapshot
//!
//! Flat snapshots of whole trees.
//!
//! [`TreeSnapshot::read`] flattens a tree-ish into a `path -> entry`
//! map via one recursive `ls-tree`; [`TreeSnapshot::build`] turns such
//! a map back into a hierarchical [`TreeNode`], interning intermediate
//! directories as it goes. Reading back a built-and-written snapshot
//! reproduces the original map.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::{GitClient, GitError};
use crate::core::types::ObjectKind;
use crate::exec::{GitArgs, GitOptions};

use super::cache::ManifestEntry;
use super::node::{BlobRef, TreeEntry, TreeNode};
use super::parse_ls_tree_line;

/// Flat read/build of whole trees.
pub struct TreeSnapshot;

impl TreeSnapshot {
    /// Flatten a tree-ish via `ls-tree --full-tree -r`.
    pub fn read(
        client: &GitClient,
        treeish: &str,
    ) -> Result<BTreeMap<String, ManifestEntry>, GitError> {
        let out = client.ls_tree(
            GitArgs::new()
                .options(GitOptions::new().flag("full-tree").flag("r"))
                .positional(treeish),
        )?;

        let mut flat = BTreeMap::new();
        for line in out.lines() {
            if line.is_empty() {
                continue;
            }
            let (path, entry) = parse_ls_tree_line(line)?;
            flat.insert(path, entry);
        }
        Ok(flat)
    }

    /// Build a hierarchical tree from a flat `path -> entry` map.
    ///
    /// Intermediate directories are created (dirty and empty) on
    /// demand; the result is an unwritten tree ready for
    /// [`TreeNode::write`].
    pub fn build(
        client: &Arc<GitClient>,
        flat: &BTreeMap<String, ManifestEntry>,
    ) -> Result<TreeNode, GitError> {
        let mut root = TreeNode::empty(Arc::clone(client));
        for (path, entry) in flat {
            let (dir, name) = match path.rsplit_once('/') {
                Some((dir, name)) => (dir, name),
                None => ("", path.as_str()),
            };
            let node = if dir.is_empty() {
                &mut root
            } else {
                root.subtree_or_create(dir)?
            };
            let child: TreeEntry = match entry.kind {
                ObjectKind::Blob => {
                    BlobRef::with_mode(entry.oid.clone(), entry.mode.clone()).into()
                }
                ObjectKind::Tree => {
                    TreeNode::with_oid(Arc::clone(client), entry.oid.clone()).into()
                }
            };
            node.set_child(name, child);
        }
        Ok(root)
    }
}
