//! exec::process
//!
//! The live handle for a spawned git process.
//!
//! Each spawned child gets two reader threads, one per output stream.
//! A reader assembles `\n`-delimited lines across read boundaries for
//! the per-call callbacks and the passthrough logger, and accumulates
//! raw bytes (bounded) for later capture. [`GitProcess::capture_output`]
//! is memoized: the first call reaps the child and joins the readers;
//! repeated calls replay the same outcome.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{ExecError, LineCallback};

/// Assembles newline-delimited lines from arbitrary read chunks.
///
/// A partial line is buffered until its newline arrives; `finish`
/// delivers a trailing unterminated line if non-empty.
pub(crate) struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self {
            partial: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8], emit: &mut dyn FnMut(&str)) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            emit(&String::from_utf8_lossy(&self.partial));
            self.partial.clear();
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
    }

    pub(crate) fn finish(self, emit: &mut dyn FnMut(&str)) {
        if !self.partial.is_empty() {
            emit(&String::from_utf8_lossy(&self.partial));
        }
    }
}

/// Which stream a reader drains; selects the passthrough log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Stdout,
    Stderr,
}

/// What a reader thread hands back when its stream closes.
#[derive(Debug, Default)]
pub(crate) struct StreamOutput {
    pub data: Vec<u8>,
    pub overflowed: bool,
}

fn drain_stream<R: Read>(
    mut reader: R,
    kind: StreamKind,
    limit: usize,
    overflow: Arc<AtomicBool>,
    mut callback: Option<LineCallback>,
    passthrough: bool,
) -> StreamOutput {
    let mut out = StreamOutput::default();
    let mut lines = LineBuffer::new();
    let mut emit = move |line: &str| {
        if passthrough {
            match kind {
                StreamKind::Stdout => tracing::info!(target: "espalier::git", "{line}"),
                StreamKind::Stderr => tracing::warn!(target: "espalier::git", "{line}"),
            }
        }
        if let Some(cb) = callback.as_mut() {
            cb(line);
        }
    };

    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            // The pipe went away under us (child killed); treat as EOF.
            Err(_) => break,
        };
        let chunk = &buf[..n];
        lines.push(chunk, &mut emit);
        if !out.overflowed {
            if out.data.len() + chunk.len() > limit {
                out.overflowed = true;
                overflow.store(true, Ordering::Relaxed);
            } else {
                out.data.extend_from_slice(chunk);
            }
        }
    }
    lines.finish(&mut emit);
    out
}

/// Memoized outcome of `capture_output`.
enum CaptureMemo {
    Done(String),
    Failed {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Overflowed,
}

/// A live spawned git process.
///
/// Obtained from [`crate::client::GitClient::spawn`]. The handle owns
/// the child: dropping it without capturing kills and reaps the
/// process.
pub struct GitProcess {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout_thread: Option<JoinHandle<StreamOutput>>,
    stderr_thread: Option<JoinHandle<StreamOutput>>,
    overflow: Arc<AtomicBool>,
    limit: usize,
    memo: Option<CaptureMemo>,
}

impl std::fmt::Debug for GitProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitProcess")
            .field("pid", &self.child.as_ref().map(|c| c.id()))
            .field("captured", &self.memo.is_some())
            .finish()
    }
}

impl GitProcess {
    /// Attach reader threads to a freshly spawned child.
    pub(crate) fn attach(
        mut child: Child,
        limit: usize,
        on_stdout: Option<LineCallback>,
        on_stderr: Option<LineCallback>,
        passthrough: bool,
    ) -> Self {
        let stdin = child.stdin.take();
        let overflow = Arc::new(AtomicBool::new(false));

        let stdout_thread = child.stdout.take().map(|stream| {
            let overflow = Arc::clone(&overflow);
            std::thread::spawn(move || {
                drain_stream(
                    stream,
                    StreamKind::Stdout,
                    limit,
                    overflow,
                    on_stdout,
                    passthrough,
                )
            })
        });
        let stderr_thread = child.stderr.take().map(|stream| {
            let overflow = Arc::clone(&overflow);
            std::thread::spawn(move || {
                drain_stream(
                    stream,
                    StreamKind::Stderr,
                    limit,
                    overflow,
                    on_stderr,
                    passthrough,
                )
            })
        });

        Self {
            child: Some(child),
            stdin,
            stdout_thread,
            stderr_thread,
            overflow,
            limit,
            memo: None,
        }
    }

    /// OS process id, while the child is live.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Write bytes to the child's stdin.
    ///
    /// # Errors
    ///
    /// Fails if stdin was already closed or the pipe broke.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<(), ExecError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            ExecError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "stdin already closed",
            ))
        })?;
        stdin.write_all(data)?;
        stdin.flush()?;
        Ok(())
    }

    /// Close the child's stdin, signalling end of input.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Wait for the child and return its full stdout.
    ///
    /// If `input` is provided it is written to stdin first; stdin is
    /// closed either way. The outcome is memoized: repeated calls replay
    /// it without touching the process again.
    ///
    /// # Errors
    ///
    /// - [`ExecError::Subprocess`] (with captured stdout/stderr) on a
    ///   non-zero exit
    /// - [`ExecError::OutputLimit`] if either stream exceeded the bound;
    ///   the child is killed rather than drained indefinitely
    pub fn capture_output(&mut self, input: Option<&[u8]>) -> Result<String, ExecError> {
        if self.memo.is_none() {
            if let Some(input) = input {
                // A child that exits early breaks the pipe; its exit
                // status is the error worth reporting, not the EPIPE.
                if let Err(err) = self.write_stdin(input) {
                    tracing::debug!(target: "espalier::exec", "stdin write failed: {err}");
                }
            }
            self.stdin = None;

            let status = self.wait_reaping()?;
            let stdout = join_reader(self.stdout_thread.take());
            let stderr = join_reader(self.stderr_thread.take());

            let memo = if stdout.overflowed || stderr.overflowed {
                CaptureMemo::Overflowed
            } else if status.success() {
                CaptureMemo::Done(String::from_utf8_lossy(&stdout.data).into_owned())
            } else {
                CaptureMemo::Failed {
                    code: status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&stdout.data).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr.data).into_owned(),
                }
            };
            self.memo = Some(memo);
        }

        match self.memo.as_ref() {
            Some(CaptureMemo::Done(out)) => Ok(out.clone()),
            Some(CaptureMemo::Failed {
                code,
                stdout,
                stderr,
            }) => Err(ExecError::Subprocess {
                code: *code,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            }),
            Some(CaptureMemo::Overflowed) => Err(ExecError::OutputLimit { limit: self.limit }),
            None => Err(ExecError::Io(io::Error::new(
                io::ErrorKind::Other,
                "capture did not record an outcome",
            ))),
        }
    }

    /// [`capture_output`](Self::capture_output) with trailing whitespace
    /// trimmed.
    pub fn capture_output_trimmed(&mut self, input: Option<&[u8]>) -> Result<String, ExecError> {
        self.capture_output(input)
            .map(|out| out.trim_end().to_string())
    }

    /// Close stdin and wait for a clean exit.
    ///
    /// # Errors
    ///
    /// Fails with the exit code (and captured output) when the child
    /// exits non-zero.
    pub fn wait(&mut self) -> Result<(), ExecError> {
        self.capture_output(None).map(|_| ())
    }

    /// Kill the child if it is still running, and reap it.
    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.kill() {
                tracing::warn!(target: "espalier::exec", "failed to kill child: {err}");
            }
            let _ = child.wait();
        }
        self.child = None;
        join_reader(self.stdout_thread.take());
        join_reader(self.stderr_thread.take());
    }

    /// Wait for exit, killing the child if a stream overflows its bound
    /// while we wait.
    fn wait_reaping(&mut self) -> Result<std::process::ExitStatus, ExecError> {
        let child = self.child.as_mut().ok_or_else(|| {
            ExecError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "process already reaped",
            ))
        })?;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if self.overflow.load(Ordering::Relaxed) {
                if let Err(err) = child.kill() {
                    tracing::warn!(
                        target: "espalier::exec",
                        "failed to kill child after output overflow: {err}"
                    );
                }
                break child.wait()?;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        self.child = None;
        Ok(status)
    }
}

impl Drop for GitProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn join_reader(handle: Option<JoinHandle<StreamOutput>>) -> StreamOutput {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => StreamOutput::default(),
    }
}
