//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Oid`] - Git object identifier (40-hex SHA-1)
//! - [`FileMode`] - Octal tree-entry mode
//! - [`ObjectKind`] - Object kind as reported by `ls-tree`
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented.
//!
//! # Examples
//!
//! ```
//! use espalier::core::types::{FileMode, ObjectKind, Oid};
//!
//! // Valid constructions
//! let oid = Oid::new("bc0c330151d9a2ca8d87d1ff914b87f152036b19").unwrap();
//! let mode = FileMode::new("100644").unwrap();
//! let kind: ObjectKind = "blob".parse().unwrap();
//!
//! // Invalid constructions fail at creation time
//! assert!(Oid::new("not-a-sha").is_err());
//! assert!(FileMode::new("banana").is_err());
//! assert!("tag".parse::<ObjectKind>().is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid file mode: {0}")]
    InvalidMode(String),

    #[error("invalid object kind: {0}")]
    InvalidKind(String),
}

/// A validated git object id.
///
/// Exactly 40 hexadecimal characters (SHA-1), normalized to lowercase.
/// The canonical empty-tree hash is available as [`Oid::empty_tree`];
/// callers may rely on it being produced when a tree with no live
/// entries is written.
///
/// # Example
///
/// ```
/// use espalier::core::types::Oid;
///
/// let oid = Oid::new("BC0C330151D9A2CA8D87D1FF914B87F152036B19").unwrap();
/// assert_eq!(oid.as_str(), "bc0c330151d9a2ca8d87d1ff914b87f152036b19");
/// assert_eq!(oid.short(7), "bc0c330");
///
/// assert!(Oid::new("abc").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// The hash of the canonical empty git tree object.
    pub const EMPTY_TREE_HEX: &'static str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

    /// Create a new validated object id.
    ///
    /// The id is normalized to lowercase.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not 40 hex
    /// characters.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        if !Self::is_hash(&oid) {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 hex characters, got {:?}",
                oid
            )));
        }
        Ok(Self(oid))
    }

    /// The canonical empty-tree object id.
    pub fn empty_tree() -> Self {
        Self(Self::EMPTY_TREE_HEX.to_string())
    }

    /// Check if this is the empty-tree id.
    pub fn is_empty_tree(&self) -> bool {
        self.0 == Self::EMPTY_TREE_HEX
    }

    /// Test whether a string is a full 40-hex object id.
    ///
    /// # Example
    ///
    /// ```
    /// use espalier::core::types::Oid;
    ///
    /// assert!(Oid::is_hash("4b825dc642cb6eb9a060e54bf8d69288fbee4904"));
    /// assert!(!Oid::is_hash("HEAD"));
    /// assert!(!Oid::is_hash("4b825d"));
    /// ```
    pub fn is_hash(s: &str) -> bool {
        s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Get an abbreviated form of the id (the first `len` characters,
    /// clamped to the full length).
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl FromStr for Oid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An octal tree-entry file mode.
///
/// Git uses a small set of modes in tree entries; the common ones have
/// named constructors. Validation accepts any short octal string so
/// unusual-but-valid historical modes (for example `100664`) survive a
/// round-trip through this type.
///
/// # Example
///
/// ```
/// use espalier::core::types::FileMode;
///
/// assert_eq!(FileMode::default(), FileMode::regular());
/// assert_eq!(FileMode::tree().as_str(), "040000");
/// assert!(FileMode::new("banana").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileMode(String);

impl FileMode {
    const REGULAR: &'static str = "100644";
    const EXECUTABLE: &'static str = "100755";
    const SYMLINK: &'static str = "120000";
    const TREE: &'static str = "040000";

    /// Create a validated mode from an octal string.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidMode` unless the string is 1-6 octal
    /// digits.
    pub fn new(mode: impl Into<String>) -> Result<Self, TypeError> {
        let mode = mode.into();
        if mode.is_empty() || mode.len() > 6 || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(TypeError::InvalidMode(mode));
        }
        Ok(Self(mode))
    }

    /// Regular file, `100644`. The default mode for blobs.
    pub fn regular() -> Self {
        Self(Self::REGULAR.to_string())
    }

    /// Executable file, `100755`.
    pub fn executable() -> Self {
        Self(Self::EXECUTABLE.to_string())
    }

    /// Symbolic link, `120000`.
    pub fn symlink() -> Self {
        Self(Self::SYMLINK.to_string())
    }

    /// Subdirectory (tree), `040000`.
    pub fn tree() -> Self {
        Self(Self::TREE.to_string())
    }

    /// Get the mode as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self::regular()
    }
}

impl TryFrom<String> for FileMode {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileMode> for String {
    fn from(mode: FileMode) -> Self {
        mode.0
    }
}

impl FromStr for FileMode {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object kind of a tree entry, as reported in the `type` column of
/// `ls-tree` output.
///
/// The tree model only represents blobs and trees; any other kind in
/// `ls-tree` output (a submodule gitlink, for instance) is rejected at
/// the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
}

impl ObjectKind {
    /// The kind as it appears in `ls-tree` output and `mktree` input.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
        }
    }

    /// Check if this is the tree kind.
    pub fn is_tree(&self) -> bool {
        matches!(self, ObjectKind::Tree)
    }
}

impl FromStr for ObjectKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blob" => Ok(ObjectKind::Blob),
            "tree" => Ok(ObjectKind::Tree),
            other => Err(TypeError::InvalidKind(other.to_string())),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
