//! exec::runner
//!
//! argv/env composition and the execution modes.
//!
//! An [`Invocation`] is the fully resolved form of one call: binary,
//! subcommand, ordered argument stream, effective repository location
//! (client configuration already merged with per-call overrides), and
//! executor controls. The runner turns it into a `std::process::Command`
//! and runs it in capture or spawn mode, optionally through the shell.

use std::process::{Command, Stdio};

use super::process::GitProcess;
use super::{ExecControls, ExecError, GitArgs, DEFAULT_MAX_OUTPUT};

/// A fully resolved git invocation.
pub(crate) struct Invocation {
    pub command: String,
    pub subcommand: String,
    pub args: GitArgs,
    pub git_dir: Option<std::path::PathBuf>,
    pub work_tree: Option<std::path::PathBuf>,
    pub index_file: Option<std::path::PathBuf>,
    pub controls: ExecControls,
}

impl Invocation {
    /// The argv after the binary name: global options first, then the
    /// subcommand, then the caller's token stream in caller order.
    pub(crate) fn argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(git_dir) = &self.git_dir {
            argv.push(format!("--git-dir={}", git_dir.display()));
        }
        if let Some(work_tree) = &self.work_tree {
            argv.push(format!("--work-tree={}", work_tree.display()));
        }
        argv.push(self.subcommand.clone());
        argv.extend(self.args.encode());
        argv
    }

    /// Compose the OS command: direct or shell execution, environment,
    /// working directory.
    fn build_command(&self) -> Command {
        let argv = self.argv();
        let mut cmd = if self.controls.shell {
            let tokens: Vec<String> = std::iter::once(self.command.clone())
                .chain(argv)
                .collect();
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(shell_join(&tokens));
            cmd
        } else {
            let mut cmd = Command::new(&self.command);
            cmd.args(&argv);
            cmd
        };

        if !self.controls.preserve_env {
            cmd.env_clear();
        }
        if let Some(index_file) = &self.index_file {
            cmd.env("GIT_INDEX_FILE", index_file);
        }
        for (key, value) in &self.controls.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.controls.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// Spawn mode: start the child and hand back the live handle.
pub(crate) fn spawn(mut invocation: Invocation) -> Result<GitProcess, ExecError> {
    spawn_with_stdin(&mut invocation, Stdio::piped())
}

/// Capture mode: run to completion, return trimmed stdout.
///
/// Returns `Ok(None)` instead of the subprocess error when the caller
/// set `null_on_error`.
pub(crate) fn run_capture(mut invocation: Invocation) -> Result<Option<String>, ExecError> {
    let null_on_error = invocation.controls.null_on_error;
    let mut process = spawn_with_stdin(&mut invocation, Stdio::null())?;
    match process.capture_output(None) {
        Ok(out) => Ok(Some(out.trim_end().to_string())),
        Err(ExecError::Subprocess { .. }) if null_on_error => Ok(None),
        Err(err) => Err(err),
    }
}

fn spawn_with_stdin(
    invocation: &mut Invocation,
    stdin: Stdio,
) -> Result<GitProcess, ExecError> {
    let mut cmd = invocation.build_command();
    cmd.stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!(
        target: "espalier::exec",
        command = %invocation.command,
        argv = ?invocation.argv(),
        shell = invocation.controls.shell,
        "running git"
    );

    let child = cmd.spawn().map_err(|source| ExecError::SpawnFailed {
        command: invocation.command.clone(),
        source,
    })?;

    let limit = invocation.controls.max_output.unwrap_or(DEFAULT_MAX_OUTPUT);
    Ok(GitProcess::attach(
        child,
        limit,
        invocation.controls.on_stdout.take(),
        invocation.controls.on_stderr.take(),
        invocation.controls.passthrough,
    ))
}

/// Join argv tokens into one `sh -c` string with POSIX single-quote
/// escaping.
fn shell_join(tokens: &[String]) -> String {
    let mut line = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&shell_quote(token));
    }
    line
}

fn shell_quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"@%+=:,./-_".contains(&b));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', "'\\''"))
    }
}
