//! tree::batch
//!
//! The persistent batched `mktree` worker.
//!
//! Tree write-back funnels every serialization through one long-lived
//! `git mktree --batch` child. Requests queue FIFO; each request's entry
//! lines are written to the child followed by a blank line, and the
//! child answers with exactly one hash line per batch, in order.
//!
//! # State machine
//!
//! - **Unstarted** - no child. The first request spawns one.
//! - **Running** - requests append to the queue and write their batch;
//!   a stdout reader thread resolves the head request per hash line; a
//!   stderr reader accumulates onto the head request; each submission
//!   resets a 1 second idle deadline.
//! - **Idle expiry** - the deadline passes with no new submissions: the
//!   idle thread closes the child's stdin and the child ends cleanly.
//! - **Exit** - the reader reaps the child. A non-zero exit fails the
//!   queued requests with subprocess-shaped info. Either way the worker
//!   is marked dead; the next request respawns.
//!
//! Producers are serialized at [`BatchedTreeBuilder::build`], so
//! requests resolve in strict submission order.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::client::GitError;
use crate::core::types::{FileMode, ObjectKind, Oid};
use crate::exec::ExecError;

/// One entry of a tree under construction, in `mktree` input form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSpecEntry {
    /// Entry mode (`100644`, `040000`, ...).
    pub mode: FileMode,
    /// Blob or tree.
    pub kind: ObjectKind,
    /// Hash of the referenced object.
    pub oid: Oid,
    /// Entry name (a single path component).
    pub name: String,
}

impl TreeSpecEntry {
    /// Render in the `ls-tree`/`mktree` line format:
    /// `MODE SP TYPE SP HASH TAB NAME`.
    pub fn render(&self) -> String {
        format!("{} {} {}\t{}", self.mode, self.kind, self.oid, self.name)
    }
}

/// Subprocess-shaped failure of the batch child.
#[derive(Debug, Clone)]
struct BatchFailure {
    code: i32,
    stdout: String,
    stderr: String,
}

/// One outstanding build request.
struct BatchRequest {
    reply: SyncSender<Result<String, BatchFailure>>,
    stderr: String,
}

struct IdleState {
    deadline: Instant,
    stop: bool,
}

struct WorkerShared {
    queue: Mutex<VecDeque<BatchRequest>>,
    dead: AtomicBool,
    idle: Mutex<IdleState>,
    idle_cv: Condvar,
}

struct Worker {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    shared: Arc<WorkerShared>,
}

impl Worker {
    fn touch(&self, idle_timeout: Duration) {
        let mut idle = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        idle.deadline = Instant::now() + idle_timeout;
        self.shared.idle_cv.notify_all();
    }
}

/// The batched tree builder.
///
/// Owned by [`crate::client::GitClient`] and created lazily on the
/// first tree write. [`shutdown`](Self::shutdown) stops the idle timer
/// and closes the child's stdin so it terminates cleanly; the next
/// build after a shutdown (or after any child exit) respawns.
pub struct BatchedTreeBuilder {
    command: String,
    git_dir: Option<PathBuf>,
    idle_timeout: Duration,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for BatchedTreeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedTreeBuilder")
            .field("command", &self.command)
            .field("git_dir", &self.git_dir)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl BatchedTreeBuilder {
    /// Default idle deadline before the child's stdin is closed.
    pub const DEFAULT_IDLE: Duration = Duration::from_secs(1);

    /// Create a builder; no child is spawned until the first build.
    pub fn new(command: String, git_dir: Option<PathBuf>, idle_timeout: Duration) -> Self {
        Self {
            command,
            git_dir,
            idle_timeout,
            worker: Mutex::new(None),
        }
    }

    /// Build a tree from entries and return its hash.
    ///
    /// Requests resolve in submission order; each hash equals what a
    /// standalone `git mktree` would produce for the same entries.
    ///
    /// # Errors
    ///
    /// A dead or dying child fails the request with
    /// [`ExecError::Subprocess`]-shaped info and leaves the builder
    /// ready to respawn on the next call.
    pub fn build(&self, entries: &[TreeSpecEntry]) -> Result<Oid, GitError> {
        let mut payload = String::new();
        for entry in entries {
            payload.push_str(&entry.render());
            payload.push('\n');
        }
        payload.push('\n');

        // One respawn attempt covers the race where the idle timer
        // closed stdin between our aliveness check and the write.
        let mut attempt = 0;
        let rx = loop {
            attempt += 1;
            match self.submit(&payload) {
                Ok(rx) => break rx,
                Err(err) if attempt < 2 => {
                    tracing::debug!(
                        target: "espalier::batch",
                        "resubmitting after worker loss: {err}"
                    );
                }
                Err(err) => return Err(err),
            }
        };

        let line = match rx.recv() {
            Ok(Ok(line)) => line,
            Ok(Err(failure)) => {
                return Err(GitError::Exec(ExecError::Subprocess {
                    code: failure.code,
                    stdout: failure.stdout,
                    stderr: failure.stderr,
                }))
            }
            Err(_) => {
                return Err(GitError::Internal {
                    message: "mktree batch worker terminated without replying".to_string(),
                })
            }
        };
        Ok(Oid::new(line.trim())?)
    }

    /// Stop the idle timer and close the child's stdin so it ends
    /// cleanly. Idempotent.
    pub fn shutdown(&self) {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = slot.take() {
            {
                let mut idle = worker
                    .shared
                    .idle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                idle.stop = true;
                worker.shared.idle_cv.notify_all();
            }
            *worker.stdin.lock().unwrap_or_else(PoisonError::into_inner) = None;
            tracing::debug!(target: "espalier::batch", "batch worker shut down");
        }
    }

    /// Enqueue one request and write its batch, spawning the child if
    /// needed. Returns the reply channel.
    fn submit(&self, payload: &str) -> Result<Receiver<Result<String, BatchFailure>>, GitError> {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        let needs_spawn = slot
            .as_ref()
            .map_or(true, |w| w.shared.dead.load(Ordering::Relaxed));
        if needs_spawn {
            *slot = Some(self.spawn_worker()?);
        }
        let worker = slot.as_mut().ok_or_else(|| GitError::Internal {
            message: "batch worker slot empty after spawn".to_string(),
        })?;

        let mut stdin_guard = worker
            .stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stdin = match stdin_guard.as_mut() {
            Some(stdin) => stdin,
            None => {
                // Idle close won the race; force a respawn on retry.
                worker.shared.dead.store(true, Ordering::Relaxed);
                return Err(GitError::Internal {
                    message: "batch worker stdin already closed".to_string(),
                });
            }
        };

        let (tx, rx) = mpsc::sync_channel(1);
        worker
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(BatchRequest {
                reply: tx,
                stderr: String::new(),
            });

        if let Err(err) = stdin
            .write_all(payload.as_bytes())
            .and_then(|_| stdin.flush())
        {
            // Child died under us; the reader will fail the queued
            // request (our receiver is dropped, so that reply is moot).
            worker.shared.dead.store(true, Ordering::Relaxed);
            return Err(GitError::Exec(ExecError::Io(err)));
        }

        worker.touch(self.idle_timeout);
        Ok(rx)
    }

    fn spawn_worker(&self) -> Result<Worker, GitError> {
        let mut cmd = Command::new(&self.command);
        if let Some(git_dir) = &self.git_dir {
            cmd.arg(format!("--git-dir={}", git_dir.display()));
        }
        cmd.args(["mktree", "--batch"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| {
            GitError::Exec(ExecError::SpawnFailed {
                command: self.command.clone(),
                source,
            })
        })?;

        let stdout = child.stdout.take().ok_or_else(|| GitError::Internal {
            message: "batch child has no stdout pipe".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| GitError::Internal {
            message: "batch child has no stderr pipe".to_string(),
        })?;
        let stdin = Arc::new(Mutex::new(child.stdin.take()));

        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(VecDeque::new()),
            dead: AtomicBool::new(false),
            idle: Mutex::new(IdleState {
                deadline: Instant::now() + self.idle_timeout,
                stop: false,
            }),
            idle_cv: Condvar::new(),
        });

        tracing::debug!(
            target: "espalier::batch",
            pid = child.id(),
            "spawned mktree batch worker"
        );

        {
            let shared = Arc::clone(&shared);
            let stdin = Arc::clone(&stdin);
            std::thread::spawn(move || stdout_loop(child, stdout, shared, stdin));
        }
        {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || stderr_loop(stderr, shared));
        }
        {
            let shared = Arc::clone(&shared);
            let stdin = Arc::clone(&stdin);
            std::thread::spawn(move || idle_loop(shared, stdin));
        }

        Ok(Worker { stdin, shared })
    }
}

impl Drop for BatchedTreeBuilder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolve head-of-queue requests as hash lines arrive; reap the child
/// on EOF and fail whatever is still queued if it exited non-zero.
fn stdout_loop(
    mut child: Child,
    stdout: std::process::ChildStdout,
    shared: Arc<WorkerShared>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let mut partial = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) if line.ends_with('\n') => {
                let hash = line.trim().to_string();
                let request = shared
                    .queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                match request {
                    Some(request) => {
                        let _ = request.reply.send(Ok(hash));
                    }
                    None => tracing::warn!(
                        target: "espalier::batch",
                        "mktree output with no pending request: {hash}"
                    ),
                }
            }
            Ok(_) => {
                // Unterminated data just before EOF; hand it to the
                // exit path below as the head request's output.
                partial = line.trim().to_string();
            }
            Err(_) => break,
        }
    }

    let status = child.wait();
    shared.dead.store(true, Ordering::Relaxed);
    {
        let mut idle = shared.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.stop = true;
        shared.idle_cv.notify_all();
    }
    *stdin.lock().unwrap_or_else(PoisonError::into_inner) = None;

    let exit_code = match &status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(status.code().unwrap_or(-1)),
        Err(_) => Some(-1),
    };
    tracing::debug!(target: "espalier::batch", ?exit_code, "batch worker exited");

    let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
    let mut first = true;
    while let Some(request) = queue.pop_front() {
        let outcome = match exit_code {
            None if first && !partial.is_empty() => Ok(std::mem::take(&mut partial)),
            None => Err(BatchFailure {
                code: 0,
                stdout: String::new(),
                stderr: "mktree exited before emitting a hash".to_string(),
            }),
            Some(code) => Err(BatchFailure {
                code,
                stdout: if first {
                    std::mem::take(&mut partial)
                } else {
                    String::new()
                },
                stderr: request.stderr.clone(),
            }),
        };
        let _ = request.reply.send(outcome);
        first = false;
    }
}

/// Accumulate stderr onto the head request.
fn stderr_loop(stderr: std::process::ChildStderr, shared: Arc<WorkerShared>) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
                match queue.front_mut() {
                    Some(front) => front.stderr.push_str(&line),
                    None => tracing::warn!(
                        target: "espalier::batch",
                        "mktree stderr with no pending request: {}",
                        line.trim_end()
                    ),
                }
            }
        }
    }
}

/// Close stdin once the deadline passes without being reset.
fn idle_loop(shared: Arc<WorkerShared>, stdin: Arc<Mutex<Option<ChildStdin>>>) {
    let mut idle = shared.idle.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if idle.stop {
            return;
        }
        let now = Instant::now();
        if now >= idle.deadline {
            drop(idle);
            tracing::debug!(target: "espalier::batch", "batch worker idle; closing stdin");
            *stdin.lock().unwrap_or_else(PoisonError::into_inner) = None;
            return;
        }
        let wait = idle.deadline - now;
        let (guard, _) = shared
            .idle_cv
            .wait_timeout(idle, wait)
            .unwrap_or_else(PoisonError::into_inner);
        idle = guard;
    }
}
