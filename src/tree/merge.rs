//! tree::merge
//!
//! Filtered recursive merge of one tree onto another.
//!
//! Two semantics:
//!
//! - **overlay** - input children land on top of the target; everything
//!   else in the target survives;
//! - **replace** - after the walk, every visible target child without a
//!   visible input counterpart is tombstoned, so the target converges
//!   on the input.
//!
//! Filters are glob patterns compiled once per merge. A leading `!`
//! negates: a negation matcher "matches" a path that does *not* match
//! the negated pattern, and a path it fails excludes the child
//! entirely. Trees whose own path is unmatched are still descended
//! speculatively (a descendant may match); the subtree is attached only
//! if the descent produced changes.

use std::sync::Arc;

use globset::{Glob, GlobMatcher};

use crate::client::GitError;

use super::node::{BlobRef, TreeEntry, TreeNode};

/// Merge semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Layer input children over the target.
    Overlay,
    /// Make the target converge on the input.
    Replace,
}

struct Matcher {
    pattern: String,
    glob: GlobMatcher,
    negated: bool,
}

impl Matcher {
    fn matches(&self, path: &str) -> bool {
        let hit = self.glob.is_match(path);
        if self.negated {
            !hit
        } else {
            hit
        }
    }
}

/// Compiled merge options: glob matchers plus the mode.
///
/// # Example
///
/// ```
/// use espalier::tree::{MergeMode, MergeOptions};
///
/// let opts = MergeOptions::new(&["src/**", "!src/generated/**"], MergeMode::Overlay).unwrap();
/// let everything = MergeOptions::unfiltered(MergeMode::Replace);
/// # let _ = (opts, everything);
/// ```
pub struct MergeOptions {
    matchers: Vec<Matcher>,
    negations: bool,
    mode: MergeMode,
}

impl std::fmt::Debug for MergeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<&str> = self.matchers.iter().map(|m| m.pattern.as_str()).collect();
        f.debug_struct("MergeOptions")
            .field("patterns", &patterns)
            .field("mode", &self.mode)
            .finish()
    }
}

impl MergeOptions {
    /// Compile glob patterns. `["**"]` or an empty list disables
    /// filtering entirely.
    ///
    /// # Errors
    ///
    /// `GitError::BadArgument` if a pattern does not compile; nothing
    /// is merged in that case.
    pub fn new<S: AsRef<str>>(files: &[S], mode: MergeMode) -> Result<Self, GitError> {
        if files.is_empty() || (files.len() == 1 && files[0].as_ref() == "**") {
            return Ok(Self::unfiltered(mode));
        }

        let mut matchers = Vec::new();
        for pattern in files {
            let pattern = pattern.as_ref();
            let (raw, negated) = match pattern.strip_prefix('!') {
                Some(rest) => (rest, true),
                None => (pattern, false),
            };
            let glob = Glob::new(raw).map_err(|err| GitError::BadArgument {
                message: format!("invalid glob {pattern:?}: {err}"),
            })?;
            matchers.push(Matcher {
                pattern: pattern.to_string(),
                glob: glob.compile_matcher(),
                negated,
            });
        }
        let negations = matchers.iter().any(|m| m.negated);
        Ok(Self {
            matchers,
            negations,
            mode,
        })
    }

    /// Options that merge everything.
    pub fn unfiltered(mode: MergeMode) -> Self {
        Self {
            matchers: Vec::new(),
            negations: false,
            mode,
        }
    }

    /// The merge mode.
    pub fn mode(&self) -> MergeMode {
        self.mode
    }
}

/// The input child's shape, captured up front so the borrow on the
/// input tree can be released before the target is mutated.
enum InputChild {
    Blob(BlobRef),
    Tree { clean: Option<crate::core::types::Oid> },
}

impl TreeNode {
    /// Merge `input` onto this tree under the given options.
    ///
    /// Both sides hydrate lazily (with recursive preload at this top
    /// level). Errors abort the whole merge; there are no
    /// partial-commit semantics, but children already merged stay in
    /// the overlay and the target simply remains dirty.
    pub fn merge(&mut self, input: &mut TreeNode, options: &MergeOptions) -> Result<(), GitError> {
        self.merge_level(input, options, ".", true)?;
        Ok(())
    }

    fn merge_level(
        &mut self,
        input: &mut TreeNode,
        options: &MergeOptions,
        base_path: &str,
        preload: bool,
    ) -> Result<bool, GitError> {
        self.hydrate_with(preload)?;
        input.hydrate_with(preload)?;

        let mut changed = false;
        for name in input.visible_names() {
            let info = match input.peek_child(&name) {
                Some(TreeEntry::Blob(blob)) => InputChild::Blob(blob.clone()),
                Some(TreeEntry::Tree(tree)) => InputChild::Tree {
                    clean: tree.written_oid().cloned(),
                },
                None => continue,
            };

            // Fast path: both sides clean with the same hash.
            let input_clean = match &info {
                InputChild::Blob(blob) => Some(blob.oid().clone()),
                InputChild::Tree { clean } => clean.clone(),
            };
            if let (Some(input_oid), Some(target_entry)) = (&input_clean, self.peek_child(&name)) {
                if target_entry.clean_oid() == Some(input_oid) {
                    continue;
                }
            }

            let is_tree = matches!(info, InputChild::Tree { .. });
            let child_path = join_path(base_path, &name);
            let match_path = if is_tree {
                format!("{child_path}/")
            } else {
                child_path.clone()
            };

            let mut matched = options.matchers.is_empty();
            let mut excluded = false;
            for matcher in &options.matchers {
                let hit = matcher.matches(&match_path);
                if hit && !matcher.negated {
                    matched = true;
                }
                if !hit && matcher.negated {
                    excluded = true;
                    break;
                }
            }
            if excluded {
                continue;
            }
            if !is_tree && !matched {
                continue;
            }
            // Descend speculatively when the tree itself is unmatched or
            // a negation could still exclude descendants.
            let pending = is_tree && (!matched || options.negations);

            match info {
                InputChild::Blob(blob) => {
                    self.set_child(name.clone(), blob);
                    changed = true;
                }
                InputChild::Tree { clean } => {
                    let target_is_tree =
                        matches!(self.peek_child(&name), Some(TreeEntry::Tree(_)));
                    if !target_is_tree || options.mode == MergeMode::Replace {
                        if pending {
                            let mut fresh = TreeNode::empty(Arc::clone(self.client()));
                            let Some(input_child) = input.tree_child_mut(&name) else {
                                continue;
                            };
                            fresh.merge_level(input_child, options, &child_path, false)?;
                            if fresh.is_dirty() {
                                self.set_child(name.clone(), fresh);
                                changed = true;
                            }
                        } else if let Some(oid) = clean {
                            // Clean input subtree: share it by hash, no
                            // descent needed.
                            let node = TreeNode::with_oid(Arc::clone(self.client()), oid);
                            self.set_child(name.clone(), node);
                            changed = true;
                        } else {
                            let mut fresh = TreeNode::empty(Arc::clone(self.client()));
                            let Some(input_child) = input.tree_child_mut(&name) else {
                                continue;
                            };
                            fresh.merge_level(input_child, options, &child_path, false)?;
                            self.set_child(name.clone(), fresh);
                            changed = true;
                        }
                    } else {
                        let Some(input_child) = input.tree_child_mut(&name) else {
                            continue;
                        };
                        let Some(target_child) = self.tree_child_mut(&name) else {
                            continue;
                        };
                        if target_child.merge_level(input_child, options, &child_path, false)? {
                            changed = true;
                        }
                    }
                }
            }
        }

        if options.mode == MergeMode::Replace {
            let input_names: std::collections::BTreeSet<String> =
                input.visible_names().into_iter().collect();
            for name in self.visible_names() {
                if !input_names.contains(&name) {
                    self.tombstone(name);
                    changed = true;
                }
            }
        }

        if changed {
            self.mark_dirty();
        }
        Ok(changed)
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base == "." || base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}
