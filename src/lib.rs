//! Run one child process over pipes
//!
//! `splosh` creates a pipe for each standard stream, forks, wires the pipes
//! onto the child's stdio, writes a payload into the child's stdin and
//! collects everything it prints together with its exit status.
//!
//! ```no_run
//! use splosh::{run, LaunchConfig};
//!
//! let output = run(LaunchConfig::new("/usr/bin/grep").arg0("grep").arg("^ok"), b"not ok\nok here\n")?;
//! assert_eq!(output.stdout.as_deref(), Some(&b"ok here\n"[..]));
//! # Ok::<(), splosh::ProcessError>(())
//! ```

#![cfg(unix)]

pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod pipe;
pub mod process;
pub mod stream;
pub mod utils;

// Re-export commonly used types
pub use config::{DrainMode, LaunchConfig, PROGRAM_ENV_VAR};
pub use errors::{FailFast, ProcessError, ProcessResult};
pub use process::{run, ExitStatus, ProcessHandle, ProcessLauncher, ProcessOutput};
