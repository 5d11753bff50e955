//! Subprocess execution.
//!
//! `TokioSpawner` is the production implementation of the `ProcessSpawner`
//! port. A spawned child runs in its own process group with stdin closed
//! and stdout/stderr piped; its output is read as two independent line
//! streams and its exit status as one terminal outcome.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};

use crate::invocation::Invocation;

/// Longest output line kept in memory; longer lines are split.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Abstracts process spawning so sessions can be tested without (or while
/// observing) real subprocesses.
pub trait ProcessSpawner: Send + Sync {
    /// Start the invocation.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the process cannot be started (missing
    /// executable, permission denied for the requested UID/GID, ...).
    fn spawn(&self, invocation: &Invocation) -> io::Result<RunningProcess>;
}

/// Production spawner backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, invocation: &Invocation) -> io::Result<RunningProcess> {
        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            command.process_group(0);
            if let Some(uid) = invocation.uid {
                command.uid(uid);
            }
            if let Some(gid) = invocation.gid {
                command.gid(gid);
            }
        }

        command.spawn().map(RunningProcess::new)
    }
}

/// One line of subprocess output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// How a subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled(i32),
}

impl ExitOutcome {
    #[must_use]
    pub fn success(self) -> bool {
        self == ExitOutcome::Exited(0)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signaled(signal);
            }
        }
        ExitOutcome::Exited(-1)
    }
}

/// Line splitter over a child pipe.
///
/// Splits on `\n` or every [`MAX_LINE_BYTES`], strips a trailing `\r`,
/// replaces invalid UTF-8 and skips empty lines. `next_line` is cancel
/// safe: a partially read line stays in the buffer until the next call
/// completes it.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let room = MAX_LINE_BYTES.saturating_sub(self.buf.len()) as u64;
            let read = (&mut self.inner)
                .take(room)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if read == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            let mut line: &[u8] = &self.buf;
            if let Some(stripped) = line.strip_suffix(b"\n") {
                line = stripped;
            }
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let text = String::from_utf8_lossy(line).into_owned();
            self.buf.clear();

            if !text.is_empty() {
                return Ok(Some(text));
            }
            if read == 0 {
                return Ok(None);
            }
        }
    }
}

async fn next_from<R: AsyncRead + Unpin>(
    reader: Option<&mut LineReader<R>>,
) -> io::Result<Option<String>> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => std::future::pending().await,
    }
}

enum Source {
    Stdout,
    Stderr,
}

/// A spawned subprocess.
///
/// Dropping it before [`RunningProcess::wait`] returns kills the child's
/// whole process group.
pub struct RunningProcess {
    child: Child,
    stdout: Option<LineReader<ChildStdout>>,
    stderr: Option<LineReader<ChildStderr>>,
    reaped: bool,
}

impl std::fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProcess")
            .field("pid", &self.child.id())
            .field("stdout_open", &self.stdout.is_some())
            .field("stderr_open", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

impl RunningProcess {
    fn new(mut child: Child) -> Self {
        let stdout = child.stdout.take().map(LineReader::new);
        let stderr = child.stderr.take().map(LineReader::new);
        Self {
            child,
            stdout,
            stderr,
            reaped: false,
        }
    }

    /// OS process id, if the child has not been reaped yet.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next line from either stream, or `None` once both are closed.
    ///
    /// Order is preserved within each stream; lines from the two streams
    /// interleave as they arrive. A read error closes that stream.
    pub async fn next_output(&mut self) -> Option<OutputLine> {
        loop {
            if self.stdout.is_none() && self.stderr.is_none() {
                return None;
            }

            let (source, line) = tokio::select! {
                line = next_from(self.stdout.as_mut()) => (Source::Stdout, line),
                line = next_from(self.stderr.as_mut()) => (Source::Stderr, line),
            };

            match (source, line) {
                (Source::Stdout, Ok(Some(text))) => return Some(OutputLine::Stdout(text)),
                (Source::Stderr, Ok(Some(text))) => return Some(OutputLine::Stderr(text)),
                (Source::Stdout, Ok(None)) => self.stdout = None,
                (Source::Stderr, Ok(None)) => self.stderr = None,
                (Source::Stdout, Err(err)) => {
                    tracing::debug!(error = %err, "stdout read failed");
                    self.stdout = None;
                }
                (Source::Stderr, Err(err)) => {
                    tracing::debug!(error = %err, "stderr read failed");
                    self.stderr = None;
                }
            }
        }
    }

    /// Wait for the child to exit and release its pipes.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on the child fails.
    pub async fn wait(mut self) -> io::Result<ExitOutcome> {
        self.stdout = None;
        self.stderr = None;
        let status = self.child.wait().await?;
        self.reaped = true;
        Ok(status.into())
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if !self.reaped {
            kill_process_group(&self.child);
        }
        // `kill_on_drop` on the child covers the direct process.
    }
}

/// The child leads its own group; take any descendants with it.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        tracing::debug!(pid, error = %err, "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
