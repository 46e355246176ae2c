//! Pipe allocation for the three standard streams

use crate::errors::{ProcessError, ProcessResult};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// One unidirectional byte channel.
///
/// Both ends are close-on-exec, so a pipe can only reach an exec'd program
/// image through an explicit `dup2` onto a standard descriptor slot.
#[derive(Debug)]
pub struct Pipe {
    pub read_end: OwnedFd,
    pub write_end: OwnedFd,
}

impl Pipe {
    /// Allocate a pipe, mapping failure to the fatal tier.
    pub fn new() -> ProcessResult<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(ProcessError::PipeAllocation)?;
        // SAFETY: pipe2 just returned these descriptors and nothing else owns them.
        let (read_end, write_end) =
            unsafe { (OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write)) };
        Ok(Self {
            read_end,
            write_end,
        })
    }
}

/// Pipes for stdin, stdout and stderr of one child.
#[derive(Debug)]
pub struct PipeSet {
    pub input: Pipe,
    pub output: Pipe,
    pub error: Pipe,
}

impl PipeSet {
    /// Create all three pipes or none.
    ///
    /// A failure part way through drops the pipes already created, which
    /// closes their descriptors.
    pub fn new() -> ProcessResult<Self> {
        let input = Pipe::new()?;
        let output = Pipe::new()?;
        let error = Pipe::new()?;
        tracing::debug!(
            input = ?(input.read_end.as_raw_fd(), input.write_end.as_raw_fd()),
            output = ?(output.read_end.as_raw_fd(), output.write_end.as_raw_fd()),
            error = ?(error.read_end.as_raw_fd(), error.write_end.as_raw_fd()),
            "allocated pipe set"
        );
        Ok(Self {
            input,
            output,
            error,
        })
    }

    /// Every descriptor in the set, in input/output/error, read/write order.
    pub fn raw_fds(&self) -> [RawFd; 6] {
        [
            self.input.read_end.as_raw_fd(),
            self.input.write_end.as_raw_fd(),
            self.output.read_end.as_raw_fd(),
            self.output.write_end.as_raw_fd(),
            self.error.read_end.as_raw_fd(),
            self.error.write_end.as_raw_fd(),
        ]
    }
}
