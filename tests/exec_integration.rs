//! Integration tests for the execution layer.
//!
//! These tests use real git repositories created via tempfile to verify
//! capture, spawn, and shell modes against the installed git binary.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use espalier::client::{GitClient, GitClientConfig, GitError};
use espalier::exec::{ExecControls, ExecError, GitArgs, GitOptions};

/// Test fixture that creates a real git repository.
struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Create a new test repository with an initial commit.
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");

        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);

        std::fs::write(dir.path().join("README.md"), "# Test Repo\n").unwrap();
        run_git(dir.path(), &["add", "README.md"]);
        run_git(dir.path(), &["commit", "-m", "Initial commit"]);

        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A client bound to this repository.
    fn client(&self) -> GitClient {
        GitClient::with_config(GitClientConfig {
            git_dir: Some(self.path().join(".git")),
            work_tree: Some(self.path().to_path_buf()),
            ..Default::default()
        })
    }

    /// Create (or overwrite) a file, stage it, and commit.
    fn commit_file(&self, name: &str, content: &str, message: &str) {
        std::fs::write(self.path().join(name), content).unwrap();
        run_git(self.path(), &["add", name]);
        run_git(self.path(), &["commit", "-m", message]);
    }
}

/// Run a git command in the given directory, asserting success.
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

#[test]
fn capture_returns_trimmed_stdout() {
    let repo = TestRepo::new();
    let client = repo.client();

    let head = client
        .rev_parse(GitArgs::new().positional("HEAD"))
        .unwrap();
    assert_eq!(head.len(), 40);
    assert!(!head.ends_with('\n'));
}

#[test]
fn version_gate_accepts_installed_git() {
    // Any host git this decade satisfies >=2.7.4.
    let client = GitClient::new();
    assert!(client.satisfies_version(">=2.7.4").unwrap());
    client.require_version(">=2.7.4").unwrap();

    let err = client.require_version(">=99.0.0").unwrap_err();
    assert!(matches!(err, GitError::UnsupportedVersion { .. }));

    // The range itself is validated.
    assert!(matches!(
        client.satisfies_version("not-a-range").unwrap_err(),
        GitError::BadArgument { .. }
    ));
}

#[test]
fn porcelain_status_preserves_leading_space() {
    // The exact substring " M test.txt" must survive capture.
    let repo = TestRepo::new();
    repo.commit_file("test.txt", "original\n", "add test.txt");
    std::fs::write(repo.path().join("test.txt"), "modified\n").unwrap();

    let client = repo.client();
    let status = client
        .status(GitOptions::new().flag("porcelain"))
        .unwrap();
    assert!(
        status.contains(" M test.txt"),
        "porcelain output was {status:?}"
    );

    // Same invariant in spawn mode, where output is not trimmed.
    let mut process = client
        .spawn(
            "status",
            GitOptions::new().flag("porcelain"),
            ExecControls::default(),
        )
        .unwrap();
    let raw = process.capture_output(None).unwrap();
    assert!(raw.contains(" M test.txt"), "spawn output was {raw:?}");
}

#[test]
fn null_on_error_resolves_instead_of_failing() {
    let repo = TestRepo::new();
    let client = repo.client();

    let controls = ExecControls {
        null_on_error: true,
        ..Default::default()
    };
    let out = client
        .exec_with(
            "rev-parse",
            GitArgs::new()
                .options(GitOptions::new().flag("verify"))
                .positional("no-such-ref"),
            controls,
        )
        .unwrap();
    assert!(out.is_none());
}

#[test]
fn subprocess_errors_carry_code_and_stderr() {
    let repo = TestRepo::new();
    let client = repo.client();

    let err = client
        .rev_parse(
            GitArgs::new()
                .options(GitOptions::new().flag("verify"))
                .positional("no-such-ref"),
        )
        .unwrap_err();
    match err {
        GitError::Exec(ExecError::Subprocess { code, stderr, .. }) => {
            assert_ne!(code, 0);
            assert!(stderr.contains("fatal"), "stderr was {stderr:?}");
        }
        other => panic!("expected subprocess error, got {other:?}"),
    }
}

#[test]
fn missing_binary_is_a_spawn_failure() {
    let client = GitClient::with_config(GitClientConfig {
        command: "definitely-not-a-real-git".to_string(),
        ..Default::default()
    });
    let err = client.exec("version", ()).unwrap_err();
    assert!(matches!(
        err,
        GitError::Exec(ExecError::SpawnFailed { .. })
    ));
}

#[test]
fn stderr_callback_streams_lines_in_spawn_mode() {
    // The callback sees git's fatal line before the non-zero exit
    // surfaces.
    let repo = TestRepo::new();
    let client = repo.client();

    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let controls = ExecControls {
        on_stderr: Some(Box::new(move |line| {
            sink.lock().unwrap().push(line.to_string());
        })),
        ..Default::default()
    };

    let mut process = client
        .spawn(
            "rev-parse",
            GitArgs::new()
                .options(GitOptions::new().flag("verify"))
                .positional("invalid-ref"),
            controls,
        )
        .unwrap();
    assert!(process.wait().is_err());

    let lines = lines.lock().unwrap();
    assert!(
        lines.iter().any(|line| line.contains("fatal")),
        "stderr lines were {lines:?}"
    );
}

#[test]
fn stdout_callback_fires_once_per_line() {
    let repo = TestRepo::new();
    repo.commit_file("a.txt", "a\n", "add a");
    repo.commit_file("b.txt", "b\n", "add b");
    let client = repo.client();

    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let controls = ExecControls {
        on_stdout: Some(Box::new(move |line| {
            sink.lock().unwrap().push(line.to_string());
        })),
        ..Default::default()
    };
    client.exec_with("ls-files", (), controls).unwrap();

    let lines = lines.lock().unwrap();
    assert_eq!(*lines, ["README.md", "a.txt", "b.txt"]);
}

#[test]
fn shell_mode_matches_direct_execution() {
    let repo = TestRepo::new();
    let client = repo.client();

    let direct = client
        .rev_parse(GitArgs::new().positional("HEAD"))
        .unwrap();
    let shelled = client
        .exec_with(
            "rev-parse",
            GitArgs::new().positional("HEAD"),
            ExecControls {
                shell: true,
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(direct, shelled);
}

#[test]
fn per_call_env_reaches_the_child() {
    let repo = TestRepo::new();
    let client = repo.client();

    let controls = ExecControls {
        env: vec![
            ("GIT_AUTHOR_NAME".to_string(), "Env Probe".to_string()),
            ("GIT_AUTHOR_EMAIL".to_string(), "probe@example.com".to_string()),
        ],
        ..Default::default()
    };
    let ident = client
        .exec_with("var", GitArgs::from("GIT_AUTHOR_IDENT"), controls)
        .unwrap()
        .unwrap();
    assert!(ident.contains("Env Probe"), "ident was {ident:?}");
}

#[test]
fn index_file_override_redirects_the_index() {
    let repo = TestRepo::new();
    std::fs::write(repo.path().join("staged.txt"), "staged\n").unwrap();

    let alt_index: PathBuf = repo.path().join("alt-index");
    let client = GitClient::with_config(GitClientConfig {
        git_dir: Some(repo.path().join(".git")),
        work_tree: Some(repo.path().to_path_buf()),
        index_file: Some(alt_index.clone()),
        ..Default::default()
    });

    client.add(GitArgs::from("staged.txt")).unwrap();
    assert!(alt_index.exists(), "alternate index was not written");

    let staged = client
        .ls_files(GitOptions::new().flag("stage"))
        .unwrap();
    assert!(staged.contains("staged.txt"));

    // The repository's real index never saw the file.
    let default_client = repo.client();
    let staged = default_client
        .ls_files(GitOptions::new().flag("stage"))
        .unwrap();
    assert!(!staged.contains("staged.txt"));
}

#[test]
fn caller_controls_argv_order_for_pathspecs() {
    let repo = TestRepo::new();
    repo.commit_file("one.txt", "1\n", "add one");
    repo.commit_file("two.txt", "2\n", "add two");
    std::fs::write(repo.path().join("one.txt"), "1!\n").unwrap();
    std::fs::write(repo.path().join("two.txt"), "2!\n").unwrap();

    let client = repo.client();
    let out = client
        .diff(
            GitArgs::new()
                .options(GitOptions::new().flag("name-only"))
                .positional("--")
                .positional("one.txt"),
        )
        .unwrap();
    assert_eq!(out, "one.txt");
}

#[test]
fn tree_hash_resolves_any_treeish() {
    let repo = TestRepo::new();
    let client = repo.client();

    let from_head = client.tree_hash("HEAD").unwrap();
    let direct = client
        .rev_parse(GitArgs::new().positional("HEAD^{tree}"))
        .unwrap();
    assert_eq!(from_head.as_str(), direct);
}

#[test]
fn config_set_helpers_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("known-remotes");
    espalier::client::write_config_set(&path, &["origin", "upstream", "origin"]).unwrap();
    assert_eq!(
        espalier::client::read_config_set(&path).unwrap(),
        ["origin", "upstream"]
    );
}
