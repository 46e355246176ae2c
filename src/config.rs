//! Launch configuration: which program the child runs and how its output is drained

use crate::errors::{ProcessError, ProcessResult};
use crate::utils::to_cstring;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Environment variable holding the program path in the default setup.
pub const PROGRAM_ENV_VAR: &str = "SPLOSH_GREP_PATH";

/// argv[0] used by the default invocation.
pub const DEFAULT_ARG0: &str = "grep";

/// Arguments used by the default invocation.
pub const DEFAULT_ARGS: &[&str] = &["hihelo"];

/// How the finalizer drains stdout and stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrainMode {
    /// One thread per stream; neither stream can stall the other.
    #[default]
    Concurrent,
    /// stdout to end-of-stream, then stderr.
    ///
    /// A child that fills the stderr pipe before closing stdout deadlocks
    /// against this mode.
    Sequential,
}

/// A single fixed invocation, supplied at launch time.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    program: PathBuf,
    arg0: Option<OsString>,
    args: Vec<OsString>,
    drain_mode: DrainMode,
}

impl LaunchConfig {
    /// Run `program` with no arguments
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            arg0: None,
            args: Vec::new(),
            drain_mode: DrainMode::default(),
        }
    }

    /// The default invocation with the program path read from [`PROGRAM_ENV_VAR`].
    pub fn from_env() -> ProcessResult<Self> {
        Self::from_env_var(PROGRAM_ENV_VAR)
    }

    /// The default invocation with the program path read from `var`.
    pub fn from_env_var(var: &str) -> ProcessResult<Self> {
        match std::env::var_os(var) {
            Some(program) if !program.is_empty() => Ok(Self::default_invocation(program)),
            _ => Err(ProcessError::MissingProgram { var: var.into() }),
        }
    }

    /// `program` run as `grep hihelo`
    pub fn default_invocation<P: Into<PathBuf>>(program: P) -> Self {
        Self::new(program)
            .arg0(DEFAULT_ARG0)
            .args(DEFAULT_ARGS.iter().copied())
    }

    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Add several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Replace all arguments set so far
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.clear();
        self.args(args)
    }

    /// Override argv[0]; defaults to the program path.
    pub fn arg0<S: AsRef<OsStr>>(mut self, arg0: S) -> Self {
        self.arg0 = Some(arg0.as_ref().to_owned());
        self
    }

    /// Choose how stdout and stderr are drained
    pub fn drain_mode(mut self, mode: DrainMode) -> Self {
        self.drain_mode = mode;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_drain_mode(&self) -> DrainMode {
        self.drain_mode
    }

    /// Full argv, argv[0] included
    pub fn argv(&self) -> Vec<&OsStr> {
        let arg0 = self
            .arg0
            .as_deref()
            .unwrap_or_else(|| self.program.as_os_str());
        std::iter::once(arg0)
            .chain(self.args.iter().map(OsString::as_os_str))
            .collect()
    }

    /// Convert to the form the child needs after fork.
    pub fn prepare(&self) -> ProcessResult<PreparedExec> {
        if self.program.as_os_str().is_empty() {
            return Err(ProcessError::InvalidInput("Command cannot be empty".into()));
        }
        let program = to_cstring(&self.program)?;
        let argv = self
            .argv()
            .into_iter()
            .map(to_cstring)
            .collect::<ProcessResult<Vec<_>>>()?;

        let mut failure_notice = b"splosh: cannot execute ".to_vec();
        failure_notice.extend_from_slice(self.program.as_os_str().as_bytes());
        failure_notice.push(b'\n');

        Ok(PreparedExec {
            program,
            argv,
            failure_notice,
        })
    }
}

/// Everything the child path needs, allocated before the fork.
///
/// Between fork and exec only async-signal-safe calls are allowed, so the
/// child must not allocate or format anything.
#[derive(Debug, Clone)]
pub struct PreparedExec {
    pub program: CString,
    pub argv: Vec<CString>,
    /// Written to the child's stderr when exec fails
    pub failure_notice: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_defaults_to_program_path() {
        let config = LaunchConfig::new("/bin/cat").arg("-u");
        assert_eq!(config.argv(), vec![OsStr::new("/bin/cat"), OsStr::new("-u")]);
    }

    #[test]
    fn test_argv_with_arg0() {
        let config = LaunchConfig::new("/usr/bin/grep").arg0("grep").arg("ok");
        assert_eq!(config.argv(), vec![OsStr::new("grep"), OsStr::new("ok")]);
    }

    #[test]
    fn test_with_args_replaces_defaults() {
        let config = LaunchConfig::default_invocation("/usr/bin/grep").with_args(["-v", "x"]);
        assert_eq!(
            config.argv(),
            vec![OsStr::new("grep"), OsStr::new("-v"), OsStr::new("x")]
        );
    }

    #[test]
    fn test_prepare() {
        let prepared = LaunchConfig::new("/usr/bin/grep")
            .arg0("grep")
            .args(["-e", "ok"])
            .prepare()
            .unwrap();
        assert_eq!(prepared.program.as_bytes(), b"/usr/bin/grep");
        let argv: Vec<&[u8]> = prepared.argv.iter().map(|a| a.as_bytes()).collect();
        assert_eq!(argv, vec![&b"grep"[..], b"-e", b"ok"]);
        assert_eq!(
            prepared.failure_notice,
            b"splosh: cannot execute /usr/bin/grep\n"
        );
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        assert!(matches!(
            LaunchConfig::new("").prepare(),
            Err(ProcessError::InvalidInput(_))
        ));
        assert!(matches!(
            LaunchConfig::new("/bin/cat").arg("a\0b").prepare(),
            Err(ProcessError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_from_env_var() {
        std::env::set_var("SPLOSH_TEST_PROGRAM_SET", "/usr/bin/grep");
        let config = LaunchConfig::from_env_var("SPLOSH_TEST_PROGRAM_SET").unwrap();
        assert_eq!(config.program(), Path::new("/usr/bin/grep"));
        assert_eq!(config.argv(), vec![OsStr::new("grep"), OsStr::new("hihelo")]);
        assert_eq!(config.get_drain_mode(), DrainMode::Concurrent);

        match LaunchConfig::from_env_var("SPLOSH_TEST_PROGRAM_UNSET") {
            Err(ProcessError::MissingProgram { var }) => {
                assert_eq!(var, "SPLOSH_TEST_PROGRAM_UNSET")
            }
            other => panic!("expected MissingProgram, got {:?}", other),
        }
    }
}
