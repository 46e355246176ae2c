//! Utility functions for process management

use crate::errors::{ProcessError, ProcessResult};
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, Instant};

/// Measure the execution time of a closure
pub fn measure_time<T, F>(operation: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let result = operation();
    let duration = start.elapsed();
    (result, duration)
}

/// Convert an OS string to a C-compatible string
pub fn to_cstring<S: AsRef<OsStr>>(s: S) -> ProcessResult<CString> {
    let s = s.as_ref();
    CString::new(s.as_bytes()).map_err(|_| {
        ProcessError::InvalidInput(format!(
            "{:?} contains an interior NUL byte",
            s.to_string_lossy()
        ))
    })
}
