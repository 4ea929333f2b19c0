//! pageflash CLI - Command-line tool for uploading firmware to page-based
//! serial bootloaders.
//!
//! ## Features
//!
//! - Upload a raw binary image page by page, with automatic retries
//! - Optional Modbus-style wake command before each attempt
//! - Offline inspection of the page table an upload would send
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;

use commands::{cmd_completions, cmd_info, cmd_upload};
use config::Config;

/// pageflash - Upload firmware to a page-based serial bootloader.
///
/// Environment variables:
///   PAGEFLASH_PORT   - Default serial port
///   PAGEFLASH_BAUD   - Default upload baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "pageflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a firmware image to the bootloader.
    Upload(UploadArgs),

    /// Show the pages an upload would send, without touching a port.
    Info {
        /// Firmware image.
        firmware: PathBuf,

        /// Page index of the first image page.
        #[arg(short, long, default_value_t = pageflash::session::DEFAULT_START_OFFSET)]
        start: u8,

        /// Crypt mode (page indices offset by 0x80).
        #[arg(short, long)]
        crypt: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Options for `pageflash upload`.
///
/// Every option left unset falls back to the config file, then to the
/// built-in default shown in its help.
#[derive(Args, Debug)]
pub(crate) struct UploadArgs {
    /// Firmware image.
    pub firmware: PathBuf,

    /// Serial port to use [default: /dev/ttyUSB0, COM3 on Windows].
    #[arg(short, long, env = "PAGEFLASH_PORT")]
    pub port: Option<String>,

    /// Upload baud rate [default: 115200].
    #[arg(short, long, env = "PAGEFLASH_BAUD")]
    pub baud: Option<u32>,

    /// Page index of the first image page [default: 1].
    #[arg(short, long)]
    pub start: Option<u8>,

    /// Crypt mode (page indices offset by 0x80).
    #[arg(short, long, overrides_with = "no_crypt")]
    pub crypt: bool,

    /// Disable crypt mode set in a config file.
    #[arg(long, overrides_with = "crypt")]
    pub no_crypt: bool,

    /// Send the wake command before each attempt.
    #[arg(short = 'm', long, visible_alias = "modbus", overrides_with = "no_wake")]
    pub wake: bool,

    /// Disable the wake command set in a config file.
    #[arg(long, overrides_with = "wake")]
    pub no_wake: bool,

    /// Wake command device address [default: 32].
    #[arg(long, value_name = "ADDR", value_parser = parse_u8)]
    pub wake_addr: Option<u8>,

    /// Wake command baud rate [default: 9600].
    #[arg(long, value_name = "BAUD")]
    pub wake_baud: Option<u32>,

    /// Wake command register [default: 65535].
    #[arg(long, value_name = "REG", value_parser = parse_u16)]
    pub wake_reg: Option<u16>,

    /// Wake command value [default: 0xDEAD].
    #[arg(long, value_name = "VALUE", value_parser = parse_u16)]
    pub wake_value: Option<u16>,

    /// Total number of attempts [default: 10].
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Give up on an attempt if no beacon arrives within SECS [default: wait forever].
    #[arg(long, value_name = "SECS", value_parser = parse_secs)]
    pub beacon_timeout: Option<f64>,
}

impl UploadArgs {
    /// Crypt mode as given on the command line, if at all.
    pub fn crypt_flag(&self) -> Option<bool> {
        on_off(self.crypt, self.no_crypt)
    }

    /// Wake mode as given on the command line, if at all.
    pub fn wake_flag(&self) -> Option<bool> {
        on_off(self.wake, self.no_wake)
    }
}

/// Collapse a `--flag`/`--no-flag` pair. clap keeps only the last one given.
fn on_off(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Errors raised by the CLI itself rather than the library.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Unusable configuration file or option combination.
    #[error("{0}")]
    Config(String),
}

/// Parse an integer given in decimal or `0x`-prefixed hex.
fn parse_int(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let v = parse_int(s)?;
    u8::try_from(v).map_err(|_| format!("{v} does not fit in 8 bits"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let v = parse_int(s)?;
    u16::try_from(v).map_err(|_| format!("{v} does not fit in 16 bits"))
}

fn parse_secs(s: &str) -> Result<f64, String> {
    let secs: f64 = s.trim().parse().map_err(|e| format!("invalid duration '{s}': {e}"))?;
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(format!("duration must be a non-negative number of seconds, got '{s}'"))
    }
}

/// Exit status for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<CliError>().is_some() {
        return 3;
    }
    match err.downcast_ref::<pageflash::Error>() {
        Some(pageflash::Error::PortOpen { .. }) => 4,
        Some(pageflash::Error::Config(_) | pageflash::Error::PageIndexOverflow { .. }) => 3,
        _ => 1,
    }
}

/// One-line message shown to the user for a failed run.
fn user_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<pageflash::Error>() {
        Some(pageflash::Error::FirmwareNotFound(_)) => "File not found.".to_string(),
        Some(pageflash::Error::RetryExhausted { .. }) => {
            "Max retries reached. Firmware upload unsuccessful.".to_string()
        },
        Some(pageflash::Error::PortOpen { source, .. }) => format!("Serial port error: {source}"),
        Some(pageflash::Error::Serial(e)) => format!("Serial port error: {e}"),
        _ => format!("{err:#}"),
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "pageflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!("{err:?}");
            eprintln!("{} {}", style("Error:").red().bold(), user_message(&err));
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match cli.config_path {
        Some(ref path) => {
            Config::load_from_path(path).map_err(|e| CliError::Config(format!("{e:#}")))?
        },
        None => Config::load(),
    };

    match &cli.command {
        Commands::Upload(args) => cmd_upload(cli, &config, args)?,
        Commands::Info {
            firmware,
            start,
            crypt,
            json,
        } => cmd_info(firmware, *start, *crypt, *json)?,
        Commands::Completions { shell } => cmd_completions(*shell),
    }

    Ok(())
}
