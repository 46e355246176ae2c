//! The two sides of the fork: wiring the child's stdio and trimming the parent's descriptors
//!
//! Everything in [`child`] runs between `fork` and `exec` in a possibly
//! multi-threaded process, so it is restricted to async-signal-safe calls:
//! `dup2`, `fcntl`, `close`, `write`, `execv`, `_exit`, `abort`. No
//! allocation, no locks, no logging.

use crate::config::PreparedExec;
use crate::pipe::PipeSet;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::{close, dup2, execv};
use std::fs::File;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

/// Exit code of a child whose program does not exist.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Exit code of a child whose program exists but cannot be executed.
pub const EXIT_CANNOT_EXECUTE: i32 = 126;

/// Descriptors the parent keeps after the fork.
#[derive(Debug)]
pub struct ParentEnds {
    pub stdin: File,
    pub stdout: File,
    pub stderr: File,
}

/// Parent side: close the ends only the child uses.
///
/// A write end left open here would keep the matching read end from ever
/// reporting end-of-stream.
pub fn parent(pipes: PipeSet) -> ParentEnds {
    let PipeSet {
        input,
        output,
        error,
    } = pipes;

    drop(input.read_end);
    drop(output.write_end);
    drop(error.write_end);

    ParentEnds {
        stdin: File::from(input.write_end),
        stdout: File::from(output.read_end),
        stderr: File::from(error.read_end),
    }
}

/// Child side: redirect stdio onto the pipes and exec. Never returns.
pub fn child(pipes: PipeSet, exec: &PreparedExec) -> ! {
    let PipeSet {
        input,
        output,
        error,
    } = pipes;

    // All six descriptors exist before the first dup2, so each target slot
    // (0, 1, 2) is distinct from every pipe descriptor as long as the parent
    // had its own stdio open. A pipe end that already sits on its own slot is
    // handled by `redirect`.
    redirect(input.read_end, input.write_end, libc::STDIN_FILENO);
    redirect(output.write_end, output.read_end, libc::STDOUT_FILENO);
    redirect(error.write_end, error.read_end, libc::STDERR_FILENO);

    let errno = match execv(&exec.program, exec.argv.as_slice()) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };

    // SAFETY: write(2) and _exit(2) are async-signal-safe; the notice buffer
    // was allocated before the fork.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            exec.failure_notice.as_ptr().cast(),
            exec.failure_notice.len(),
        );
        libc::_exit(exec_failure_code(errno))
    }
}

/// Put `keep` on `slot`, then close the original and the opposite end.
fn redirect(keep: OwnedFd, unused: OwnedFd, slot: RawFd) {
    drop(unused);

    let fd = keep.into_raw_fd();
    if fd == slot {
        // dup2 onto itself is a no-op that leaves FD_CLOEXEC set, which would
        // close the stream at exec.
        if fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).is_err() {
            std::process::abort();
        }
        return;
    }

    if dup2(fd, slot).is_err() {
        std::process::abort();
    }
    let _ = close(fd);
}

/// Shell convention: 127 for a missing program, 126 for anything else.
pub fn exec_failure_code(errno: Errno) -> i32 {
    match errno {
        Errno::ENOENT | Errno::ENOTDIR => EXIT_NOT_FOUND,
        _ => EXIT_CANNOT_EXECUTE,
    }
}

/// Raw descriptors of the parent ends, for logging
pub fn describe(ends: &ParentEnds) -> [RawFd; 3] {
    [
        ends.stdin.as_raw_fd(),
        ends.stdout.as_raw_fd(),
        ends.stderr.as_raw_fd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::collect_stream;
    use std::io::Write;

    #[test]
    fn test_exec_failure_code() {
        assert_eq!(exec_failure_code(Errno::ENOENT), 127);
        assert_eq!(exec_failure_code(Errno::ENOTDIR), 127);
        assert_eq!(exec_failure_code(Errno::EACCES), 126);
        assert_eq!(exec_failure_code(Errno::ENOEXEC), 126);
    }

    #[test]
    fn test_parent_closes_child_ends() {
        let pipes = PipeSet::new().unwrap();
        let mut ends = parent(pipes);

        // With every write end gone, both read ends report end-of-stream.
        assert_eq!(collect_stream(&mut ends.stdout).unwrap(), None);
        assert_eq!(collect_stream(&mut ends.stderr).unwrap(), None);

        // With the read end gone, stdin writes fail instead of blocking.
        let err = ends.stdin.write(b"x").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
