//! tree::node
//!
//! The in-memory tree object model.
//!
//! A [`TreeNode`] layers pending mutations (`overlay`, with `None` as
//! the deletion tombstone) over lazily hydrated on-disk children
//! (`base`). Lookups see the overlay first; a tombstone suppresses the
//! base entry. Mutation marks the node dirty, and every operation that
//! reaches into a descendant marks the ancestors on the path dirty too.
//!
//! Write-back serializes the visible children through the client's
//! batched `mktree` worker, then folds the overlay into the base and
//! clears the dirty bit, restoring the invariant that a clean node's
//! hash is the true object-store hash of its content.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::{GitClient, GitError};
use crate::core::types::{FileMode, ObjectKind, Oid};
use crate::exec::{ExecControls, GitArgs, GitOptions};

use super::batch::TreeSpecEntry;
use super::cache::{self, TreeManifest};
use super::parse_ls_tree_line;

/// An immutable handle on a blob object: hash plus entry mode.
///
/// Blob refs are freely shared across trees; copying the handle copies
/// the reference, never the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    oid: Oid,
    mode: FileMode,
}

impl BlobRef {
    /// A blob handle with the default `100644` mode.
    pub fn new(oid: Oid) -> Self {
        Self {
            oid,
            mode: FileMode::regular(),
        }
    }

    /// A blob handle with an explicit mode.
    pub fn with_mode(oid: Oid, mode: FileMode) -> Self {
        Self { oid, mode }
    }

    /// Write content into the object store via `hash-object -w --stdin`
    /// and return a handle on the new blob.
    pub fn write(client: &GitClient, content: &[u8]) -> Result<Self, GitError> {
        Self::write_with_mode(client, content, FileMode::regular())
    }

    /// [`write`](Self::write) with an explicit entry mode.
    pub fn write_with_mode(
        client: &GitClient,
        content: &[u8],
        mode: FileMode,
    ) -> Result<Self, GitError> {
        let mut process = client.spawn(
            "hash-object",
            GitOptions::new().flag("w").flag("stdin"),
            ExecControls::default(),
        )?;
        let out = process.capture_output_trimmed(Some(content))?;
        Ok(Self {
            oid: Oid::new(out)?,
            mode,
        })
    }

    /// The blob's hash.
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// The entry mode.
    pub fn mode(&self) -> &FileMode {
        &self.mode
    }
}

/// A tree child: either a subtree or a blob, discriminated by tag.
#[derive(Debug, Clone)]
pub enum TreeEntry {
    /// A subtree.
    Tree(TreeNode),
    /// A blob reference.
    Blob(BlobRef),
}

impl TreeEntry {
    /// Check if this entry is a subtree.
    pub fn is_tree(&self) -> bool {
        matches!(self, TreeEntry::Tree(_))
    }

    /// Check if this entry is a blob.
    pub fn is_blob(&self) -> bool {
        matches!(self, TreeEntry::Blob(_))
    }

    /// The entry's stable hash, when it has one: a blob's hash, or a
    /// clean subtree's written hash.
    pub fn clean_oid(&self) -> Option<&Oid> {
        match self {
            TreeEntry::Blob(blob) => Some(blob.oid()),
            TreeEntry::Tree(tree) => tree.written_oid(),
        }
    }
}

impl From<BlobRef> for TreeEntry {
    fn from(blob: BlobRef) -> Self {
        TreeEntry::Blob(blob)
    }
}

impl From<TreeNode> for TreeEntry {
    fn from(tree: TreeNode) -> Self {
        TreeEntry::Tree(tree)
    }
}

/// An in-memory git tree object.
///
/// Constructed through [`GitClient::tree`] (seeded with an existing
/// hash) or [`GitClient::empty_tree`] (a fresh dirty empty tree).
/// Hydration from the object store is lazy and cached process-wide;
/// mutation is copy-on-write through the overlay.
#[derive(Clone)]
pub struct TreeNode {
    client: Arc<GitClient>,
    oid: Option<Oid>,
    dirty: bool,
    base: Option<BTreeMap<String, TreeEntry>>,
    overlay: BTreeMap<String, Option<TreeEntry>>,
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("oid", &self.oid)
            .field("dirty", &self.dirty)
            .field("hydrated", &self.base.is_some())
            .field("overlay_len", &self.overlay.len())
            .finish()
    }
}

impl TreeNode {
    /// A node seeded with an existing tree hash, unhydrated and clean.
    pub(crate) fn with_oid(client: Arc<GitClient>, oid: Oid) -> Self {
        Self {
            client,
            oid: Some(oid),
            dirty: false,
            base: None,
            overlay: BTreeMap::new(),
        }
    }

    /// A fresh dirty empty tree.
    pub(crate) fn empty(client: Arc<GitClient>) -> Self {
        Self {
            client,
            oid: None,
            dirty: true,
            base: Some(BTreeMap::new()),
            overlay: BTreeMap::new(),
        }
    }

    pub(crate) fn client(&self) -> &Arc<GitClient> {
        &self.client
    }

    /// Check if in-memory state diverges from the node's hash.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The node's hash, if it reflects the current content.
    ///
    /// Returns `None` while the node is dirty; call
    /// [`write`](Self::write) to produce a hash. A clean node never
    /// auto-writes on query.
    pub fn written_oid(&self) -> Option<&Oid> {
        if self.dirty {
            None
        } else {
            self.oid.as_ref()
        }
    }

    // =========================================================================
    // Hydration
    // =========================================================================

    /// Load base children from the object store. Idempotent.
    pub fn hydrate(&mut self) -> Result<(), GitError> {
        self.hydrate_with(false)
    }

    /// Hydrate with recursive preload: one `ls-tree -r -t` populates
    /// the cache for this tree and every interior subtree, so later
    /// descendant hydrations never touch git.
    pub fn hydrate_recursive(&mut self) -> Result<(), GitError> {
        self.hydrate_with(true)
    }

    /// Hydrate, optionally preloading every interior subtree with a
    /// single recursive `ls-tree -r -t` that populates the cache for
    /// the whole subtree graph.
    pub(crate) fn hydrate_with(&mut self, preload: bool) -> Result<(), GitError> {
        if self.base.is_some() {
            return Ok(());
        }
        let oid = match &self.oid {
            Some(oid) if !oid.is_empty_tree() => oid.clone(),
            _ => {
                self.base = Some(BTreeMap::new());
                return Ok(());
            }
        };

        let manifest = match cache::lookup(&oid) {
            Some(manifest) => manifest,
            None => self.load_manifest(&oid, preload)?,
        };

        let mut base = BTreeMap::new();
        for (name, entry) in manifest.iter() {
            let child = match entry.kind {
                ObjectKind::Tree => {
                    TreeEntry::Tree(TreeNode::with_oid(Arc::clone(&self.client), entry.oid.clone()))
                }
                ObjectKind::Blob => {
                    TreeEntry::Blob(BlobRef::with_mode(entry.oid.clone(), entry.mode.clone()))
                }
            };
            base.insert(name.clone(), child);
        }
        self.base = Some(base);
        Ok(())
    }

    /// Cache miss: run `ls-tree` and populate the cache. With preload,
    /// one recursive listing covers the root and every interior tree,
    /// grouped under their parent paths; this is sound because subtree
    /// hashes are content-addressed.
    fn load_manifest(&self, oid: &Oid, preload: bool) -> Result<Arc<TreeManifest>, GitError> {
        let mut options = GitOptions::new();
        if preload {
            options = options.flag("r").flag("t");
        }
        let out = self
            .client
            .ls_tree(GitArgs::new().options(options).positional(oid.as_str()))?;

        if !preload {
            let mut manifest = TreeManifest::new();
            for line in out.lines() {
                if line.is_empty() {
                    continue;
                }
                let (name, entry) = parse_ls_tree_line(line)?;
                manifest.insert(name, entry);
            }
            return Ok(cache::insert(oid.clone(), manifest));
        }

        let mut manifests: BTreeMap<String, TreeManifest> = BTreeMap::new();
        manifests.insert(String::new(), TreeManifest::new());
        let mut dir_oids: Vec<(String, Oid)> = vec![(String::new(), oid.clone())];

        for line in out.lines() {
            if line.is_empty() {
                continue;
            }
            let (path, entry) = parse_ls_tree_line(line)?;
            let (parent, name) = match path.rsplit_once('/') {
                Some((parent, name)) => (parent.to_string(), name.to_string()),
                None => (String::new(), path.clone()),
            };
            if entry.kind.is_tree() {
                dir_oids.push((path.clone(), entry.oid.clone()));
                manifests.entry(path).or_default();
            }
            manifests.entry(parent).or_default().insert(name, entry);
        }

        let mut root = None;
        for (dir, dir_oid) in dir_oids {
            let manifest = manifests.remove(&dir).unwrap_or_default();
            let interned = cache::insert(dir_oid, manifest);
            if dir.is_empty() {
                root = Some(interned);
            }
        }
        root.ok_or_else(|| GitError::Internal {
            message: "recursive preload lost the root manifest".to_string(),
        })
    }

    // =========================================================================
    // Children
    // =========================================================================

    /// The visible children: overlay layered on base, tombstones
    /// honored. Hydrates if needed.
    pub fn children(&mut self) -> Result<BTreeMap<&String, &TreeEntry>, GitError> {
        self.hydrate()?;
        Ok(self.view())
    }

    /// Look up one visible child. Hydrates if needed.
    pub fn child(&mut self, name: &str) -> Result<Option<&TreeEntry>, GitError> {
        self.hydrate()?;
        Ok(self.peek_child(name))
    }

    /// Insert or replace a child and mark the node dirty.
    pub fn set_child(&mut self, name: impl Into<String>, entry: impl Into<TreeEntry>) {
        self.overlay.insert(name.into(), Some(entry.into()));
        self.dirty = true;
    }

    /// Tombstone a visible child. Returns whether anything was deleted;
    /// the node is marked dirty only when it was.
    pub fn delete_child(&mut self, name: &str) -> Result<bool, GitError> {
        self.hydrate()?;
        if self.peek_child(name).is_none() {
            return Ok(false);
        }
        self.overlay.insert(name.to_string(), None);
        self.dirty = true;
        Ok(true)
    }

    /// Overlay-view lookup without hydrating.
    pub(crate) fn peek_child(&self, name: &str) -> Option<&TreeEntry> {
        if let Some(slot) = self.overlay.get(name) {
            return slot.as_ref();
        }
        self.base.as_ref().and_then(|base| base.get(name))
    }

    /// Mutable overlay-view lookup without hydrating.
    pub(crate) fn child_mut(&mut self, name: &str) -> Option<&mut TreeEntry> {
        if self.overlay.contains_key(name) {
            return self.overlay.get_mut(name).and_then(|slot| slot.as_mut());
        }
        self.base.as_mut().and_then(|base| base.get_mut(name))
    }

    /// Mutable lookup narrowed to tree children.
    pub(crate) fn tree_child_mut(&mut self, name: &str) -> Option<&mut TreeNode> {
        match self.child_mut(name) {
            Some(TreeEntry::Tree(tree)) => Some(tree),
            _ => None,
        }
    }

    /// Tombstone without the visibility check (merge internals).
    pub(crate) fn tombstone(&mut self, name: impl Into<String>) {
        self.overlay.insert(name.into(), None);
        self.dirty = true;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Visible child names, in map order. Assumes hydrated.
    pub(crate) fn visible_names(&self) -> Vec<String> {
        self.view().keys().map(|name| (*name).clone()).collect()
    }

    fn view(&self) -> BTreeMap<&String, &TreeEntry> {
        let mut view = BTreeMap::new();
        if let Some(base) = &self.base {
            for (name, entry) in base {
                view.insert(name, entry);
            }
        }
        for (name, slot) in &self.overlay {
            match slot {
                Some(entry) => {
                    view.insert(name, entry);
                }
                None => {
                    view.remove(name);
                }
            }
        }
        view
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Walk to the subtree at a `/`-separated path, hydrating each
    /// intermediate on demand. `"."` refers to the receiver. Returns
    /// `None` on a missing segment or one that resolves to a blob.
    pub fn subtree(&mut self, path: &str) -> Result<Option<&mut TreeNode>, GitError> {
        let segments: Vec<&str> = path_segments(path).collect();
        self.subtree_segments(&segments)
    }

    fn subtree_segments(&mut self, segments: &[&str]) -> Result<Option<&mut TreeNode>, GitError> {
        let Some((head, rest)) = segments.split_first() else {
            return Ok(Some(self));
        };
        self.hydrate()?;
        match self.tree_child_mut(head) {
            Some(child) => child.subtree_segments(rest),
            None => Ok(None),
        }
    }

    /// Like [`subtree`](Self::subtree), creating fresh empty subtrees
    /// for missing segments. Creation marks every ancestor on the walk
    /// dirty. A blob occupying a segment is replaced by a fresh tree.
    pub fn subtree_or_create(&mut self, path: &str) -> Result<&mut TreeNode, GitError> {
        let segments: Vec<&str> = path_segments(path).collect();
        self.ensure_path(&segments)?;
        match self.subtree(path)? {
            Some(node) => Ok(node),
            None => Err(GitError::Internal {
                message: format!("subtree {path:?} missing after creation"),
            }),
        }
    }

    /// Create missing tree nodes along the segment path; returns whether
    /// anything was created so callers up the walk can dirty themselves.
    fn ensure_path(&mut self, segments: &[&str]) -> Result<bool, GitError> {
        let Some((head, rest)) = segments.split_first() else {
            return Ok(false);
        };
        self.hydrate()?;

        let mut created = false;
        if self.tree_child_mut(head).is_none() {
            let fresh = TreeNode::empty(Arc::clone(&self.client));
            self.overlay
                .insert((*head).to_string(), Some(TreeEntry::Tree(fresh)));
            created = true;
        }
        if let Some(child) = self.tree_child_mut(head) {
            created |= child.ensure_path(rest)?;
        }
        if created {
            self.dirty = true;
        }
        Ok(created)
    }

    // =========================================================================
    // Write-back
    // =========================================================================

    /// Serialize the tree into the object store and return its hash.
    ///
    /// A clean node returns its hash without spawning anything. A dirty
    /// node recursively writes dirty subtrees, skips entries that
    /// resolve to the empty tree, and submits the rest to the batched
    /// `mktree` worker. On success the overlay is folded into the base
    /// and the node is clean; on error the node stays dirty with its
    /// hash unchanged.
    pub fn write(&mut self) -> Result<Oid, GitError> {
        if !self.dirty {
            if let Some(oid) = &self.oid {
                return Ok(oid.clone());
            }
        }
        self.hydrate()?;

        // Folding the overlay early is view-neutral, so a failure below
        // still leaves the node's content and dirtiness intact.
        let overlay = std::mem::take(&mut self.overlay);
        let base = self.base.as_mut().ok_or_else(|| GitError::Internal {
            message: "tree not hydrated at write".to_string(),
        })?;
        for (name, slot) in overlay {
            match slot {
                Some(entry) => {
                    base.insert(name, entry);
                }
                None => {
                    base.remove(&name);
                }
            }
        }

        let mut entries = Vec::new();
        for (name, entry) in base.iter_mut() {
            match entry {
                TreeEntry::Blob(blob) => entries.push(TreeSpecEntry {
                    mode: blob.mode().clone(),
                    kind: ObjectKind::Blob,
                    oid: blob.oid().clone(),
                    name: name.clone(),
                }),
                TreeEntry::Tree(tree) => {
                    let oid = tree.write()?;
                    if !oid.is_empty_tree() {
                        entries.push(TreeSpecEntry {
                            mode: FileMode::tree(),
                            kind: ObjectKind::Tree,
                            oid,
                            name: name.clone(),
                        });
                    }
                }
            }
        }

        let oid = if entries.is_empty() {
            Oid::empty_tree()
        } else {
            self.client.tree_builder().build(&entries)?
        };
        self.oid = Some(oid.clone());
        self.dirty = false;
        Ok(oid)
    }
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
}
