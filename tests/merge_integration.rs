//! Integration tests for filtered tree merges.
//!
//! Overlay and replace semantics, glob filters with negation, and the
//! clean-subtree sharing fast paths, against real repositories.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use espalier::client::{GitClient, GitClientConfig};
use espalier::core::types::Oid;
use espalier::tree::{BlobRef, ManifestEntry, MergeMode, MergeOptions, TreeNode, TreeSnapshot};

struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// A repository whose HEAD tree is `{README.md, src/main.c}`.
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");

        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);

        std::fs::write(dir.path().join("README.md"), "# Readme\n").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.c"), "int main(void) { return 0; }\n").unwrap();
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-m", "Initial commit"]);

        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn client(&self) -> Arc<GitClient> {
        Arc::new(GitClient::with_config(GitClientConfig {
            git_dir: Some(self.path().join(".git")),
            work_tree: Some(self.path().to_path_buf()),
            ..Default::default()
        }))
    }

    fn head_tree(&self, client: &Arc<GitClient>) -> Oid {
        client.tree_hash("HEAD").unwrap()
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git failed to run");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// An input tree overlapping the fixture on one path:
/// `{src/main.c: <new blob>, docs/intro.md: <new blob>}`.
fn build_input(client: &Arc<GitClient>) -> TreeNode {
    let main_prime = BlobRef::write(client, b"int main(void) { return 1; }\n").unwrap();
    let intro = BlobRef::write(client, b"# Intro\n").unwrap();

    let mut input = client.empty_tree();
    input
        .subtree_or_create("src")
        .unwrap()
        .set_child("main.c", main_prime);
    input
        .subtree_or_create("docs")
        .unwrap()
        .set_child("intro.md", intro);
    input
}

fn flatten(client: &Arc<GitClient>, oid: &Oid) -> BTreeMap<String, ManifestEntry> {
    TreeSnapshot::read(client, oid.as_str()).unwrap()
}

#[test]
fn overlay_merge_with_filter_takes_only_matching_paths() {
    // Only paths under src/ cross over in overlay mode.
    let repo = TestRepo::new();
    let client = repo.client();
    let base = repo.head_tree(&client);
    let before = flatten(&client, &base);

    let mut target = client.tree(base);
    let mut input = build_input(&client);
    let opts = MergeOptions::new(&["src/**"], MergeMode::Overlay).unwrap();
    target.merge(&mut input, &opts).unwrap();
    assert!(target.is_dirty());

    let merged = flatten(&client, &target.write().unwrap());
    let names: Vec<&str> = merged.keys().map(|name| name.as_str()).collect();
    assert_eq!(names, ["README.md", "src/main.c"]);

    // README.md untouched, src/main.c replaced.
    assert_eq!(merged["README.md"], before["README.md"]);
    assert_ne!(merged["src/main.c"], before["src/main.c"]);
}

#[test]
fn replace_merge_converges_on_the_input() {
    // An unfiltered replace makes the target hash equal the input hash.
    let repo = TestRepo::new();
    let client = repo.client();

    let mut target = client.tree(repo.head_tree(&client));
    let mut input = build_input(&client);
    let opts = MergeOptions::new(&["**"], MergeMode::Replace).unwrap();
    target.merge(&mut input, &opts).unwrap();

    let target_hash = target.write().unwrap();
    let input_hash = input.write().unwrap();
    assert_eq!(target_hash, input_hash);

    let merged = flatten(&client, &target_hash);
    let names: Vec<&str> = merged.keys().map(|name| name.as_str()).collect();
    assert_eq!(names, ["docs/intro.md", "src/main.c"]);
}

#[test]
fn merging_the_same_clean_tree_is_a_no_op() {
    // Merging a tree with an identical clean tree leaves it non-dirty.
    let repo = TestRepo::new();
    let client = repo.client();
    let base = repo.head_tree(&client);

    let mut target = client.tree(base.clone());
    let mut same = client.tree(base.clone());
    target
        .merge(&mut same, &MergeOptions::unfiltered(MergeMode::Overlay))
        .unwrap();
    assert!(!target.is_dirty());
    assert_eq!(target.written_oid(), Some(&base));
}

#[test]
fn negation_globs_exclude_their_subtree() {
    // Nothing under secrets/ survives "!secrets/**".
    let repo = TestRepo::new();
    let client = repo.client();

    let ok = BlobRef::write(&client, b"fine\n").unwrap();
    let key = BlobRef::write(&client, b"hunter2\n").unwrap();
    let mut input = client.empty_tree();
    input.set_child("ok.txt", ok);
    input
        .subtree_or_create("secrets")
        .unwrap()
        .set_child("key.pem", key);

    let mut target = client.empty_tree();
    let opts = MergeOptions::new(&["**", "!secrets/**"], MergeMode::Overlay).unwrap();
    target.merge(&mut input, &opts).unwrap();

    let merged = flatten(&client, &target.write().unwrap());
    assert!(merged.contains_key("ok.txt"));
    assert!(!merged.keys().any(|path| path.starts_with("secrets/")));

    // The literal single-negation form also admits no secrets paths.
    let mut target = client.tree(repo.head_tree(&client));
    let opts = MergeOptions::new(&["!secrets/**"], MergeMode::Overlay).unwrap();
    target.merge(&mut input, &opts).unwrap();
    if let Some(oid) = target.written_oid().cloned() {
        let merged = flatten(&client, &oid);
        assert!(!merged.keys().any(|path| path.starts_with("secrets/")));
    }
}

#[test]
fn unmatched_trees_descend_speculatively() {
    // A filter that names only a descendant still reaches it, and a
    // subtree with no surviving descendants is not attached.
    let repo = TestRepo::new();
    let client = repo.client();

    let a = BlobRef::write(&client, b"a\n").unwrap();
    let secret = BlobRef::write(&client, b"s\n").unwrap();
    let mut input = client.empty_tree();
    {
        let docs = input.subtree_or_create("docs").unwrap();
        docs.set_child("a.md", a);
        docs.set_child("secret.md", secret);
    }
    let noise = BlobRef::write(&client, b"noise\n").unwrap();
    input.subtree_or_create("misc").unwrap().set_child("noise.txt", noise);

    let mut target = client.empty_tree();
    let opts =
        MergeOptions::new(&["docs/**", "!docs/secret.md"], MergeMode::Overlay).unwrap();
    target.merge(&mut input, &opts).unwrap();

    let merged = flatten(&client, &target.write().unwrap());
    let names: Vec<&str> = merged.keys().map(|name| name.as_str()).collect();
    assert_eq!(names, ["docs/a.md"]);
}

#[test]
fn clean_input_subtrees_are_shared_by_hash() {
    let repo = TestRepo::new();
    let client = repo.client();
    let base = repo.head_tree(&client);

    // A clean input whose src subtree has a stable hash.
    let mut input = client.tree(base.clone());
    input.hydrate().unwrap();
    let src_oid = input
        .child("src")
        .unwrap()
        .and_then(|entry| entry.clean_oid().cloned())
        .unwrap();

    let mut target = client.empty_tree();
    target
        .merge(&mut input, &MergeOptions::unfiltered(MergeMode::Overlay))
        .unwrap();

    // The attached subtree is the same object, not a rewrite.
    let attached = target
        .subtree("src")
        .unwrap()
        .and_then(|sub| sub.written_oid().cloned())
        .unwrap();
    assert_eq!(attached, src_oid);

    let written = target.write().unwrap();
    assert_eq!(written, base);
}

#[test]
fn replace_merge_respects_filters_during_the_walk() {
    // Replace descends through fresh trees even where the target
    // already has content, rebuilding filtered subtrees from the input.
    let repo = TestRepo::new();
    let client = repo.client();

    let mut target = client.tree(repo.head_tree(&client));
    let mut input = build_input(&client);
    let opts = MergeOptions::new(&["src/**"], MergeMode::Replace).unwrap();
    target.merge(&mut input, &opts).unwrap();

    let merged = flatten(&client, &target.write().unwrap());
    // docs/ was filtered out; README.md was tombstoned by replace.
    let names: Vec<&str> = merged.keys().map(|name| name.as_str()).collect();
    assert_eq!(names, ["src/main.c"]);
}
