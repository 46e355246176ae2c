//! Process lifecycle: launch, feed, drain, reap

use crate::bootstrap::{self, ParentEnds};
use crate::config::{DrainMode, LaunchConfig};
use crate::errors::{ProcessError, ProcessResult};
use crate::pipe::PipeSet;
use crate::stream::{collect_stream, write_payload};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::fmt;
use std::fs::File;
use std::thread;
use std::time::{Duration, Instant};

/// How long an abandoned child gets between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_millis(100);

/// Starts the child described by a [`LaunchConfig`].
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: LaunchConfig,
}

impl ProcessLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    /// Create the pipes, fork, and return the parent's handle.
    ///
    /// Pipe and fork failures come back as fatal errors (see
    /// [`ProcessError::is_fatal`]). A program that does not exist is not an
    /// error here: the fork succeeds and the child exits with 127.
    pub fn launch(&self) -> ProcessResult<ProcessHandle> {
        let exec = self.config.prepare()?;
        let pipes = PipeSet::new()?;

        // SAFETY: the child only runs `bootstrap::child`, which sticks to
        // async-signal-safe calls and ends in exec or _exit.
        match unsafe { fork() }.map_err(ProcessError::Fork)? {
            ForkResult::Child => bootstrap::child(pipes, &exec),
            ForkResult::Parent { child } => {
                let ends = bootstrap::parent(pipes);
                tracing::debug!(
                    pid = child.as_raw(),
                    program = %self.config.program().display(),
                    fds = ?bootstrap::describe(&ends),
                    "spawned child"
                );
                Ok(ProcessHandle::new(child, ends, self.config.get_drain_mode()))
            }
        }
    }
}

/// The parent's view of a running child.
///
/// Owns the write end of the child's stdin and the read ends of its stdout
/// and stderr. [`ProcessHandle::finalize`] or [`ProcessHandle::communicate`]
/// consume the handle and reap the child. A handle dropped without either
/// terminates and reaps the child itself.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
    drain_mode: DrainMode,
    reaped: bool,
}

impl ProcessHandle {
    fn new(pid: Pid, ends: ParentEnds, drain_mode: DrainMode) -> Self {
        Self {
            pid,
            stdin: Some(ends.stdin),
            stdout: Some(ends.stdout),
            stderr: Some(ends.stderr),
            drain_mode,
            reaped: false,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Write the whole payload to the child's stdin.
    ///
    /// Loops over short writes. The input stays open so more can follow;
    /// it is closed by [`ProcessHandle::finalize`]. Returns the bytes the
    /// child accepted, which is less than `payload.len()` only if the child
    /// closed its stdin early.
    ///
    /// This blocks while the pipe is full. A payload larger than the pipe
    /// buffer sent to a child that writes output before reading all of its
    /// input can block forever; [`ProcessHandle::communicate`] does not have
    /// that problem.
    pub fn write_input(&mut self, payload: &[u8]) -> ProcessResult<usize> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::InputClosed {
            pid: self.pid.as_raw(),
        })?;
        let written = write_payload(stdin, payload)?;
        tracing::debug!(pid = self.pid.as_raw(), written, "wrote input");
        Ok(written)
    }

    /// Close stdin, drain stdout and stderr to end-of-stream, and reap.
    pub fn finalize(mut self) -> ProcessResult<ProcessOutput> {
        drop(self.stdin.take());
        let (stdout, stderr) = self.take_output_ends();
        let (stdout, stderr) = drain(stdout, stderr, self.drain_mode)?;
        let status = self.reap()?;
        Ok(ProcessOutput {
            stdout,
            stderr,
            status,
        })
    }

    /// Feed `payload` and drain both streams at the same time, then reap.
    ///
    /// The writer gets its own thread and closes stdin as soon as it is
    /// done, so neither a large payload nor large output can stall the
    /// exchange. The drain mode is ignored: everything runs concurrently.
    pub fn communicate(mut self, payload: &[u8]) -> ProcessResult<ProcessOutput> {
        let stdin = self.stdin.take().ok_or(ProcessError::InputClosed {
            pid: self.pid.as_raw(),
        })?;
        let (stdout, stderr) = self.take_output_ends();

        let (written, stdout, stderr) = thread::scope(|s| {
            let writer = s.spawn(move || write_payload(stdin, payload));
            let out = s.spawn(move || collect_stream(stdout));
            let err = collect_stream(stderr);

            let written = writer
                .join()
                .map_err(|_| ProcessError::DrainPanicked { stream: "stdin" })?;
            let out = out
                .join()
                .map_err(|_| ProcessError::DrainPanicked { stream: "stdout" })?;
            ProcessResult::Ok((written?, out?, err?))
        })?;
        tracing::debug!(pid = self.pid.as_raw(), written, "wrote input");

        let status = self.reap()?;
        Ok(ProcessOutput {
            stdout,
            stderr,
            status,
        })
    }

    fn take_output_ends(&mut self) -> (File, File) {
        match (self.stdout.take(), self.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            // Both are only taken by the consuming methods above.
            _ => unreachable!("output ends taken twice"),
        }
    }

    /// Block until the child exits.
    fn reap(&mut self) -> ProcessResult<ExitStatus> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.reaped = true;
                    tracing::debug!(pid = self.pid.as_raw(), code, "child exited");
                    return Ok(ExitStatus::Exited(code));
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    self.reaped = true;
                    tracing::debug!(pid = self.pid.as_raw(), ?signal, "child killed");
                    return Ok(ExitStatus::Signaled(signal));
                }
                // Stop/continue notifications; keep waiting for termination.
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(source) => {
                    return Err(ProcessError::Wait {
                        pid: self.pid.as_raw(),
                        source,
                    })
                }
            }
        }
    }

    /// Whether the child has already exited; reaps it if so.
    fn try_reap(&mut self) -> bool {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => false,
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
                self.reaped = true;
                true
            }
            Ok(_) | Err(Errno::EINTR) => false,
            // ECHILD: someone else reaped it; nothing left to clean up.
            Err(_) => {
                self.reaped = true;
                true
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        // Closing stdin first lets a well-behaved child exit on its own.
        drop(self.stdin.take());
        drop(self.stdout.take());
        drop(self.stderr.take());

        if self.try_reap() {
            return;
        }

        tracing::warn!(pid = self.pid.as_raw(), "terminating abandoned child");
        if let Err(e) = kill(self.pid, Signal::SIGTERM) {
            tracing::warn!(pid = self.pid.as_raw(), error = %e, "SIGTERM failed");
        }

        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if self.try_reap() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let _ = kill(self.pid, Signal::SIGKILL);
        if let Err(e) = self.reap() {
            tracing::warn!(error = %e, "failed to reap abandoned child");
        }
    }
}

/// Collect both output streams according to `mode`.
fn drain(
    stdout: File,
    stderr: File,
    mode: DrainMode,
) -> ProcessResult<(Option<Vec<u8>>, Option<Vec<u8>>)> {
    match mode {
        DrainMode::Sequential => {
            let out = collect_stream(stdout)?;
            let err = collect_stream(stderr)?;
            Ok((out, err))
        }
        DrainMode::Concurrent => thread::scope(|s| {
            let out = s.spawn(move || collect_stream(stdout));
            let err = collect_stream(stderr);
            let out = out
                .join()
                .map_err(|_| ProcessError::DrainPanicked { stream: "stdout" })?;
            Ok((out?, err?))
        }),
    }
}

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with this code
    Exited(i32),
    /// Killed by a signal
    Signaled(Signal),
}

impl ExitStatus {
    /// Exit code, or `128 + signal` for a killed child.
    pub fn code(&self) -> i32 {
        match *self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal as i32,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status: {}", code),
            Self::Signaled(signal) => write!(f, "signal: {} ({})", *signal as i32, signal),
        }
    }
}

/// Everything a finished child produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` if the child wrote nothing to stdout
    pub stdout: Option<Vec<u8>>,
    /// `None` if the child wrote nothing to stderr
    pub stderr: Option<Vec<u8>>,
    pub status: ExitStatus,
}

/// Launch `config`, feed it `payload`, and wait for everything.
pub fn run(config: LaunchConfig, payload: &[u8]) -> ProcessResult<ProcessOutput> {
    ProcessLauncher::new(config).launch()?.communicate(payload)
}
