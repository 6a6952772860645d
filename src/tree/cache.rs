//! tree::cache
//!
//! Process-wide tree manifest cache.
//!
//! Maps a tree hash to its child manifest. Entries are content-addressed
//! and therefore immutable once written: a racing duplicate insert for
//! the same hash writes the same value, so no coordination beyond the
//! map lock is needed. There is no eviction; the working set is bounded
//! by the repositories a process touches.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::core::types::{FileMode, ObjectKind, Oid};

/// One child entry of a tree manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Entry mode.
    pub mode: FileMode,
    /// Blob or tree.
    pub kind: ObjectKind,
    /// Hash of the referenced object.
    pub oid: Oid,
}

/// A tree's direct children, keyed by entry name.
pub type TreeManifest = BTreeMap<String, ManifestEntry>;

static CACHE: OnceLock<Mutex<HashMap<Oid, Arc<TreeManifest>>>> = OnceLock::new();
static EMPTY: OnceLock<Arc<TreeManifest>> = OnceLock::new();

fn map() -> &'static Mutex<HashMap<Oid, Arc<TreeManifest>>> {
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn empty_manifest() -> Arc<TreeManifest> {
    Arc::clone(EMPTY.get_or_init(|| Arc::new(TreeManifest::new())))
}

/// Look up a tree's manifest.
///
/// The empty-tree hash resolves to the empty manifest without touching
/// the map.
pub fn lookup(oid: &Oid) -> Option<Arc<TreeManifest>> {
    if oid.is_empty_tree() {
        return Some(empty_manifest());
    }
    map()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(oid)
        .cloned()
}

/// Insert a manifest, returning the interned handle.
///
/// Duplicate inserts for the same hash are harmless; the first value
/// wins and any are equal by content-addressing.
pub fn insert(oid: Oid, manifest: TreeManifest) -> Arc<TreeManifest> {
    if oid.is_empty_tree() {
        return empty_manifest();
    }
    let mut map = map().lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(
        map.entry(oid)
            .or_insert_with(|| Arc::new(manifest)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(hex: &str) -> Oid {
        Oid::new(hex).unwrap()
    }

    #[test]
    fn empty_tree_resolves_without_insertion() {
        let manifest = lookup(&Oid::empty_tree()).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let key = oid("1111111111111111111111111111111111111111");
        let mut manifest = TreeManifest::new();
        manifest.insert(
            "file.txt".to_string(),
            ManifestEntry {
                mode: FileMode::regular(),
                kind: ObjectKind::Blob,
                oid: oid("2222222222222222222222222222222222222222"),
            },
        );
        let interned = insert(key.clone(), manifest.clone());
        assert_eq!(*interned, manifest);
        assert_eq!(*lookup(&key).unwrap(), manifest);
    }

    #[test]
    fn duplicate_insert_keeps_the_first_value() {
        let key = oid("3333333333333333333333333333333333333333");
        let mut first = TreeManifest::new();
        first.insert(
            "a".to_string(),
            ManifestEntry {
                mode: FileMode::regular(),
                kind: ObjectKind::Blob,
                oid: oid("4444444444444444444444444444444444444444"),
            },
        );
        insert(key.clone(), first.clone());
        // A same-key racer would by construction carry equal content;
        // even a different value must not clobber the interned one.
        insert(key.clone(), TreeManifest::new());
        assert_eq!(*lookup(&key).unwrap(), first);
    }
}
