//! Upload command implementation.

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use pageflash::{FirmwareImage, UploadConfig, UploadEvent, UploadSession, WakeConfig};
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, UploadArgs, use_fancy_output};

/// Port used when neither the command line nor a config file names one.
#[cfg(windows)]
pub(crate) const DEFAULT_PORT: &str = "COM3";
/// Port used when neither the command line nor a config file names one.
#[cfg(not(windows))]
pub(crate) const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Fully resolved upload settings.
#[derive(Debug)]
pub(crate) struct UploadSettings {
    pub port: String,
    pub upload: UploadConfig,
}

/// Combine command-line arguments, config file and defaults.
pub(crate) fn resolve_settings(args: &UploadArgs, config: &Config) -> Result<UploadSettings> {
    let port = args
        .port
        .clone()
        .or_else(|| config.connection.port.clone())
        .unwrap_or_else(|| DEFAULT_PORT.to_string());

    let defaults = UploadConfig::default();
    let mut upload = UploadConfig::default()
        .with_baud_rate(args.baud.or(config.connection.baud).unwrap_or(defaults.baud_rate))
        .with_start_offset(args.start.or(config.upload.start).unwrap_or(defaults.start_offset))
        .with_crypt(args.crypt_flag().or(config.upload.crypt).unwrap_or(false))
        .with_max_retries(
            args.max_retries
                .or(config.upload.max_retries)
                .unwrap_or(defaults.max_retries),
        );

    if let Some(secs) = args.beacon_timeout.or(config.upload.beacon_timeout_secs) {
        let limit = Duration::try_from_secs_f64(secs)
            .map_err(|e| CliError::Config(format!("Invalid beacon timeout {secs}: {e}")))?;
        upload = upload.with_beacon_timeout(Some(limit));
    }

    if args.wake_flag().or(config.wake.enabled).unwrap_or(false) {
        let base = WakeConfig::default();
        upload = upload.with_wake(WakeConfig {
            address: args.wake_addr.or(config.wake.address).unwrap_or(base.address),
            baud_rate: args.wake_baud.or(config.wake.baud).unwrap_or(base.baud_rate),
            register: args.wake_reg.or(config.wake.register).unwrap_or(base.register),
            value: args.wake_value.or(config.wake.value).unwrap_or(base.value),
        });
    }

    Ok(UploadSettings { port, upload })
}

/// Upload command implementation.
pub(crate) fn cmd_upload(cli: &Cli, config: &Config, args: &UploadArgs) -> Result<()> {
    let settings = resolve_settings(args, config)?;
    debug!(
        "Port {}, upload settings {}",
        settings.port,
        serde_json::to_string(&settings.upload).unwrap_or_default()
    );

    if !cli.quiet {
        eprintln!(
            "{} Loading firmware: {}",
            style("📦").cyan(),
            style(args.firmware.display()).green()
        );
    }
    let image = FirmwareImage::from_file(&args.firmware)?;
    let total_pages = image.page_count();

    // Reject settings the bootloader cannot address before opening the port
    settings.upload.validate()?;
    settings.upload.numbering().sequence(total_pages)?;

    if !cli.quiet {
        eprintln!(
            "  {} bytes, {} pages of {} bytes",
            image.len(),
            total_pages,
            pageflash::PAGE_SIZE
        );
        eprintln!(
            "{} Opening {} at {} baud",
            style("🔌").cyan(),
            style(&settings.port).green(),
            settings.upload.baud_rate
        );
    }

    let mut session = UploadSession::open(&settings.port, settings.upload)?;

    if !cli.quiet {
        eprintln!("{} Waiting for bootloader...", style("⏳").yellow());
    }

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total_pages as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let result = session.run_with_progress(&image, |event| match *event {
        UploadEvent::AttemptStarted {
            attempt,
            max_attempts,
        } => {
            pb.set_position(0);
            pb.set_message(format!("attempt {attempt}/{max_attempts}"));
        },
        UploadEvent::WakeSent => pb.set_message("wake sent"),
        UploadEvent::BeaconReceived => pb.set_message("writing"),
        UploadEvent::PageAcknowledged { sent, index, .. } => {
            pb.set_position(sent as u64);
            pb.set_message(format!("page {index:#04x}"));
        },
        UploadEvent::AttemptAborted { attempt, reason } => {
            pb.set_message(format!("attempt {attempt} aborted: {reason}"));
        },
    });

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            pb.abandon();
            return Err(err.into());
        },
    };

    pb.finish_with_message("done");

    if !cli.quiet {
        eprintln!(
            "\n{} Firmware upload successful!",
            style("🎉").green().bold()
        );
        if report.attempts > 1 {
            eprintln!("  ({} attempts)", report.attempts);
        }
    }

    Ok(())
}
