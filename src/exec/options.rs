//! exec::options
//!
//! Structured git options and their argv encoding.
//!
//! Git has two spellings for every option: short (`-n 3`) and long
//! (`--max-count=3`). [`GitOptions`] is an insertion-ordered mapping from
//! option key to [`OptValue`]; [`GitOptions::encode`] applies the argv
//! rules:
//!
//! - a list value emits the scalar encoding once per element;
//! - a single-character key encodes `true` as `-k` and a scalar `v` as
//!   the two tokens `-k v`;
//! - a multi-character key encodes `true` as `--key` and a scalar `v` as
//!   the single token `--key=v`;
//! - a `false` flag emits nothing;
//! - keys beginning with `$` never reach git (executor controls are
//!   expressed through [`crate::exec::ExecControls`]; the sigil form is
//!   stripped defensively).
//!
//! [`GitArgs`] is the ordered token stream handed to an invocation:
//! positional arguments interleaved with option groups, in caller order,
//! so callers control argv order where git cares (`-- pathspec`).

/// A single option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptValue {
    /// Boolean flag; `false` encodes to nothing.
    Flag(bool),
    /// String value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Repeated values; the option is emitted once per element.
    List(Vec<String>),
}

impl From<bool> for OptValue {
    fn from(v: bool) -> Self {
        OptValue::Flag(v)
    }
}

impl From<&str> for OptValue {
    fn from(v: &str) -> Self {
        OptValue::Str(v.to_string())
    }
}

impl From<String> for OptValue {
    fn from(v: String) -> Self {
        OptValue::Str(v)
    }
}

impl From<i64> for OptValue {
    fn from(v: i64) -> Self {
        OptValue::Int(v)
    }
}

impl From<Vec<String>> for OptValue {
    fn from(v: Vec<String>) -> Self {
        OptValue::List(v)
    }
}

impl From<&[&str]> for OptValue {
    fn from(v: &[&str]) -> Self {
        OptValue::List(v.iter().map(|s| s.to_string()).collect())
    }
}

/// An insertion-ordered option mapping.
///
/// # Example
///
/// ```
/// use espalier::exec::GitOptions;
///
/// let opts = GitOptions::new()
///     .flag("r")
///     .flag("t")
///     .set("format", "%(objectname)");
/// assert_eq!(
///     opts.encode(),
///     ["-r", "-t", "--format=%(objectname)"]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOptions {
    entries: Vec<(String, OptValue)>,
}

impl GitOptions {
    /// Create an empty option mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key with an arbitrary value. Setting a key again appends
    /// a second occurrence; git receives both, in order.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<OptValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Append a boolean flag set to `true`.
    pub fn flag(self, key: impl Into<String>) -> Self {
        self.set(key, true)
    }

    /// Check if the mapping has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Encode the mapping into argv tokens.
    pub fn encode(&self) -> Vec<String> {
        let mut argv = Vec::new();
        for (key, value) in &self.entries {
            if key.starts_with('$') {
                continue;
            }
            match value {
                OptValue::Flag(false) => {}
                OptValue::Flag(true) => {
                    if key.chars().count() == 1 {
                        argv.push(format!("-{key}"));
                    } else {
                        argv.push(format!("--{key}"));
                    }
                }
                OptValue::Str(v) => encode_scalar(key, v, &mut argv),
                OptValue::Int(v) => encode_scalar(key, &v.to_string(), &mut argv),
                OptValue::List(vs) => {
                    for v in vs {
                        encode_scalar(key, v, &mut argv);
                    }
                }
            }
        }
        argv
    }
}

fn encode_scalar(key: &str, value: &str, argv: &mut Vec<String>) {
    if key.chars().count() == 1 {
        argv.push(format!("-{key}"));
        argv.push(value.to_string());
    } else {
        argv.push(format!("--{key}={value}"));
    }
}

/// One token of an invocation's argument stream.
#[derive(Debug, Clone)]
pub enum GitArg {
    /// A positional argument, passed through verbatim.
    Positional(String),
    /// An option group, encoded in place.
    Options(GitOptions),
}

/// The ordered argument stream of one invocation.
///
/// Positionals and option groups keep their relative order when the
/// argv is assembled, so a caller can emit `-- <pathspec>` after options
/// or re-inject an option group between positionals.
///
/// # Example
///
/// ```
/// use espalier::exec::{GitArgs, GitOptions};
///
/// let args = GitArgs::new()
///     .options(GitOptions::new().flag("verify"))
///     .positional("HEAD^{tree}");
/// ```
#[derive(Debug, Clone, Default)]
pub struct GitArgs {
    tokens: Vec<GitArg>,
}

impl GitArgs {
    /// Create an empty argument stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn positional(mut self, value: impl Into<String>) -> Self {
        self.tokens.push(GitArg::Positional(value.into()));
        self
    }

    /// Append an option group.
    pub fn options(mut self, options: GitOptions) -> Self {
        self.tokens.push(GitArg::Options(options));
        self
    }

    /// Encode the stream into argv tokens, in caller order.
    pub fn encode(&self) -> Vec<String> {
        let mut argv = Vec::new();
        for token in &self.tokens {
            match token {
                GitArg::Positional(value) => argv.push(value.clone()),
                GitArg::Options(options) => argv.extend(options.encode()),
            }
        }
        argv
    }
}

impl From<()> for GitArgs {
    fn from(_: ()) -> Self {
        GitArgs::new()
    }
}

impl From<&str> for GitArgs {
    fn from(value: &str) -> Self {
        GitArgs::new().positional(value)
    }
}

impl From<String> for GitArgs {
    fn from(value: String) -> Self {
        GitArgs::new().positional(value)
    }
}

impl From<GitOptions> for GitArgs {
    fn from(options: GitOptions) -> Self {
        GitArgs::new().options(options)
    }
}

impl From<Vec<GitArg>> for GitArgs {
    fn from(tokens: Vec<GitArg>) -> Self {
        GitArgs { tokens }
    }
}
