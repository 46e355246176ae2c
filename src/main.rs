//! `splosh`: pipe stdin through one command and show what it printed
//!
//! stdout of the child is shown in green, stderr in red, and the child's exit
//! status becomes ours.

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::queue;
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use splosh::config::PROGRAM_ENV_VAR;
use splosh::stream::collect_stream;
use splosh::utils::measure_time;
use splosh::{DrainMode, FailFast, LaunchConfig, ProcessLauncher};
use std::ffi::OsStr;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const CODENAME: &str = "pre-alpha";

#[derive(Parser, Debug)]
#[command(name = "splosh")]
#[command(about = "Feed stdin to a command and show its colored output")]
struct Cli {
    /// Print the version banner to stderr and exit
    #[arg(short = '@')]
    banner: bool,

    /// Program to run; falls back to $SPLOSH_GREP_PATH
    #[arg(long)]
    program: Option<PathBuf>,

    /// argv[0] passed to the program [default: grep]
    #[arg(long)]
    arg0: Option<String>,

    /// Drain stdout fully before stderr
    #[arg(long)]
    sequential: bool,

    /// Print captured output without colors; also set by a non-empty $NO_COLOR
    #[arg(long)]
    no_color: bool,

    /// Arguments passed to the program [default: hihelo]
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if cli.banner {
        eprintln!("{}", banner());
        return Ok(());
    }

    let config = launch_config(&cli)?;

    let payload = collect_stream(io::stdin().lock())
        .context("reading stdin")?
        .unwrap_or_default();

    let (output, elapsed) = measure_time(|| -> Result<_> {
        let handle = ProcessLauncher::new(config)
            .launch()
            .or_abort()
            .context("launching child")?;
        Ok(handle.communicate(&payload)?)
    });
    let output = output?;
    tracing::info!(status = %output.status, ?elapsed, "child finished");

    let color = colors_enabled(cli.no_color, std::env::var_os("NO_COLOR").as_deref());
    if let Some(stdout) = &output.stdout {
        show(&mut io::stdout().lock(), stdout, Color::DarkGreen, color).context("writing stdout")?;
    }
    if let Some(stderr) = &output.stderr {
        show(&mut io::stderr().lock(), stderr, Color::DarkRed, color).context("writing stderr")?;
    }

    std::process::exit(output.status.code())
}

/// `--program` wins over the environment; explicit args replace `hihelo`.
fn launch_config(cli: &Cli) -> Result<LaunchConfig> {
    let mut config = match &cli.program {
        Some(program) => LaunchConfig::default_invocation(program),
        None => LaunchConfig::from_env()
            .with_context(|| format!("no program given; pass --program or set {}", PROGRAM_ENV_VAR))?,
    };
    if let Some(arg0) = &cli.arg0 {
        config = config.arg0(arg0);
    }
    if !cli.args.is_empty() {
        config = config.with_args(&cli.args);
    }
    Ok(config.drain_mode(if cli.sequential {
        DrainMode::Sequential
    } else {
        DrainMode::Concurrent
    }))
}

/// Any non-empty `NO_COLOR` turns colors off, whatever its value.
fn colors_enabled(no_color_flag: bool, no_color_env: Option<&OsStr>) -> bool {
    !no_color_flag && no_color_env.map_or(true, OsStr::is_empty)
}

/// `splosh:<major>.<minor>:<codename>`
fn banner() -> String {
    format!(
        "splosh:{}.{}:{}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        CODENAME
    )
}

fn show<W: Write>(out: &mut W, bytes: &[u8], fg: Color, color: bool) -> io::Result<()> {
    if color {
        queue!(out, SetForegroundColor(fg))?;
    }
    out.write_all(bytes)?;
    if color {
        queue!(out, ResetColor)?;
    }
    out.flush()
}
