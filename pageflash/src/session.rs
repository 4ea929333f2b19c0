//! Upload session.
//!
//! An upload is a sequence of attempts. Each attempt runs
//!
//! ```text
//! [wake] -> AwaitBeacon -> SendingPages -> Success
//!                |               |
//!                +---------------+--> Aborted -> reset buffers -> next attempt
//! ```
//!
//! Pages go out last to first and every page must be acknowledged before the
//! next is sent. A rejected or unanswered page aborts the whole attempt; there
//! is no partial success. Transport errors end the session immediately.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pageflash::{FirmwareImage, UploadConfig, UploadSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!     let config = UploadConfig::default().with_crypt(true);
//!
//!     let mut session = UploadSession::open("/dev/ttyUSB0", config)?;
//!     let report = session.run(&image)?;
//!     println!("Uploaded {} pages in {} attempt(s)", report.pages, report.attempts);
//!     Ok(())
//! }
//! ```

use log::{debug, info, trace, warn};
use std::time::Duration;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::image::{FirmwareImage, Page};
use crate::port::{LineSettings, Port};
use crate::protocol::beacon::wait_for_beacon;
use crate::protocol::frame::{ACK, PageFrame, PageNumbering};
use crate::protocol::timing::page_ack_timeout;
use crate::protocol::wake::{WakeConfig, send_wake};

/// Default number of attempts.
pub const MAX_RETRIES: u32 = 10;

/// Default upload baud rate.
pub const DEFAULT_UPLOAD_BAUD: u32 = 115200;

/// Default index of the first image page.
pub const DEFAULT_START_OFFSET: u8 = 1;

/// Upload settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UploadConfig {
    /// Baud rate of the bootloader link.
    pub baud_rate: u32,
    /// Page index of the first image page.
    pub start_offset: u8,
    /// Offset every page index by 0x80.
    pub crypt: bool,
    /// Wake command sent before every handshake, if any.
    pub wake: Option<WakeConfig>,
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Upper bound on the beacon wait of one attempt. `None` waits forever.
    pub beacon_timeout: Option<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_UPLOAD_BAUD,
            start_offset: DEFAULT_START_OFFSET,
            crypt: false,
            wake: None,
            max_retries: MAX_RETRIES,
            beacon_timeout: None,
        }
    }
}

impl UploadConfig {
    /// Set the upload baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the start page offset.
    #[must_use]
    pub fn with_start_offset(mut self, start_offset: u8) -> Self {
        self.start_offset = start_offset;
        self
    }

    /// Enable or disable crypt mode.
    #[must_use]
    pub fn with_crypt(mut self, crypt: bool) -> Self {
        self.crypt = crypt;
        self
    }

    /// Send a wake command before each attempt.
    #[must_use]
    pub fn with_wake(mut self, wake: WakeConfig) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Set the maximum number of attempts.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Bound the beacon wait.
    #[must_use]
    pub fn with_beacon_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.beacon_timeout = timeout;
        self
    }

    /// Line settings used while talking to the bootloader.
    pub fn line_settings(&self) -> LineSettings {
        LineSettings::new(self.baud_rate)
    }

    /// Page numbering for this configuration.
    pub fn numbering(&self) -> PageNumbering {
        PageNumbering::new(self.start_offset, self.crypt)
    }

    /// Reject settings the protocol cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::Config("upload baud rate must be non-zero".into()));
        }
        if self.wake.is_some_and(|wake| wake.baud_rate == 0) {
            return Err(Error::Config("wake baud rate must be non-zero".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("at least one attempt is required".into()));
        }
        Ok(())
    }
}

/// Why an attempt was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// The bootloader answered a page with something other than ACK.
    #[error("page {index:#04x} rejected with {response:#04x}")]
    Nack {
        /// Index of the rejected page.
        index: u8,
        /// Byte received instead of ACK.
        response: u8,
    },

    /// No answer to a page before the timeout.
    #[error("no acknowledgment for page {index:#04x}")]
    AckTimeout {
        /// Index of the unanswered page.
        index: u8,
    },

    /// The beacon wait bound elapsed.
    #[error("bootloader beacon not received")]
    BeaconTimeout,
}

/// Result of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Every page was acknowledged.
    Success,
    /// The attempt stopped early.
    Aborted(AbortReason),
}

/// Progress notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent {
    /// A new attempt begins.
    AttemptStarted {
        /// 1-based attempt number.
        attempt: u32,
        /// Maximum number of attempts.
        max_attempts: u32,
    },
    /// The wake command was sent.
    WakeSent,
    /// The bootloader beacon was seen.
    BeaconReceived,
    /// A page was acknowledged.
    PageAcknowledged {
        /// Pages acknowledged so far in this attempt.
        sent: usize,
        /// Pages in the image.
        total: usize,
        /// Index of the acknowledged page.
        index: u8,
    },
    /// The attempt was abandoned.
    AttemptAborted {
        /// 1-based attempt number.
        attempt: u32,
        /// Why.
        reason: AbortReason,
    },
}

/// Summary of a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Pages transferred.
    pub pages: usize,
}

/// Drives the upload protocol over a [`Port`].
///
/// Generic over the port type so tests can substitute a simulated bootloader.
pub struct UploadSession<P: Port> {
    port: P,
    config: UploadConfig,
}

impl<P: Port> UploadSession<P> {
    /// Create a session on an already opened port.
    pub fn new(port: P, config: UploadConfig) -> Self {
        Self { port, config }
    }

    /// Upload settings.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Upload `image`.
    ///
    /// The port is closed when this returns, whatever the outcome.
    pub fn run(&mut self, image: &FirmwareImage) -> Result<UploadReport> {
        self.run_with_progress(image, |_| {})
    }

    /// Upload `image`, reporting progress through `progress`.
    ///
    /// The port is closed when this returns, whatever the outcome.
    pub fn run_with_progress<F>(
        &mut self,
        image: &FirmwareImage,
        mut progress: F,
    ) -> Result<UploadReport>
    where
        F: FnMut(&UploadEvent),
    {
        let result = self.upload(image, &mut progress);

        match (self.port.close(), result) {
            (Ok(()), result) => result,
            (Err(close_err), Ok(_)) => Err(close_err),
            (Err(close_err), Err(e)) => {
                warn!("Failed to close {}: {close_err}", self.port.name());
                Err(e)
            },
        }
    }

    fn upload<F>(&mut self, image: &FirmwareImage, progress: &mut F) -> Result<UploadReport>
    where
        F: FnMut(&UploadEvent),
    {
        self.config.validate()?;

        let pages = image.pages();
        let indices = self.config.numbering().sequence(pages.len())?;
        let max_attempts = self.config.max_retries;

        info!(
            "Uploading {} bytes as {} pages (start {}, crypt {})",
            image.len(),
            pages.len(),
            self.config.start_offset,
            if self.config.crypt { "on" } else { "off" }
        );

        let mut last_reason = AbortReason::BeaconTimeout;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                info!("Attempt {attempt}/{max_attempts}");
            }
            progress(&UploadEvent::AttemptStarted {
                attempt,
                max_attempts,
            });

            match self.attempt(&pages, &indices, progress)? {
                AttemptOutcome::Success => {
                    info!("Firmware upload successful after {attempt} attempt(s)");
                    return Ok(UploadReport {
                        attempts: attempt,
                        pages: pages.len(),
                    });
                },
                AttemptOutcome::Aborted(reason) => {
                    warn!("Didn't get ACK ({reason}), retrying...");
                    progress(&UploadEvent::AttemptAborted { attempt, reason });

                    // Nothing from this attempt may reach the next one.
                    self.port.clear_input()?;
                    self.port.clear_output()?;
                    last_reason = reason;
                },
            }
        }

        Err(Error::RetryExhausted {
            attempts: max_attempts,
            last: last_reason,
        })
    }

    /// One wake + handshake + all-pages pass.
    fn attempt<F>(
        &mut self,
        pages: &[Page],
        indices: &[u8],
        progress: &mut F,
    ) -> Result<AttemptOutcome>
    where
        F: FnMut(&UploadEvent),
    {
        if let Some(wake) = self.config.wake {
            send_wake(&mut self.port, &wake)?;
            progress(&UploadEvent::WakeSent);
        }

        // Full 8N1, not just the baud rate: the wake step left the line at 8N2.
        let line = self.config.line_settings();
        debug!("Switching {} to {} baud", self.port.name(), line.baud_rate);
        self.port.apply_settings(&line)?;

        if !wait_for_beacon(&mut self.port, self.config.beacon_timeout)? {
            return Ok(AttemptOutcome::Aborted(AbortReason::BeaconTimeout));
        }
        info!("Bootloader ready");
        progress(&UploadEvent::BeaconReceived);

        self.port.set_timeout(page_ack_timeout(line.baud_rate))?;

        let total = pages.len();
        for (position, (page, &index)) in pages.iter().rev().zip(indices).enumerate() {
            let frame = PageFrame::new(index, page);
            trace!(
                "Writing page {}/{total} (index {index:#04x}, checksum {:#04x})",
                position + 1,
                frame.checksum()
            );

            self.port.write_all_bytes(&frame.header())?;
            self.port.write_all_bytes(frame.payload())?;

            match self.port.read_bytes(1)?.first() {
                Some(&ACK) => progress(&UploadEvent::PageAcknowledged {
                    sent: position + 1,
                    total,
                    index,
                }),
                Some(&response) => {
                    return Ok(AttemptOutcome::Aborted(AbortReason::Nack { index, response }));
                },
                None => return Ok(AttemptOutcome::Aborted(AbortReason::AckTimeout { index })),
            }
        }

        Ok(AttemptOutcome::Success)
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Result, UploadConfig, UploadSession};
    use crate::port::{NativePort, SerialConfig};

    impl UploadSession<NativePort> {
        /// Open `port_name` at the upload baud rate and create a session.
        pub fn open(port_name: &str, config: UploadConfig) -> Result<Self> {
            config.validate()?;
            let port = NativePort::open(&SerialConfig::new(port_name, config.baud_rate))?;
            Ok(Self::new(port, config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PAGE_SIZE;
    use crate::port::mock::MockPort;
    use crate::port::StopBits;
    use crate::protocol::checksum::page_checksum;
    use crate::protocol::timing::beacon_read_timeout;

    const BAUD: u32 = 115200;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Three pages whose first byte identifies them.
    fn three_page_image() -> FirmwareImage {
        let mut data = vec![0u8; 2 * PAGE_SIZE + 10];
        data[0] = 0xA0;
        data[PAGE_SIZE] = 0xA1;
        data[2 * PAGE_SIZE] = 0xA2;
        FirmwareImage::from_bytes(data)
    }

    fn run(
        port: MockPort,
        config: UploadConfig,
        image: &FirmwareImage,
    ) -> (Result<UploadReport>, MockPort) {
        init_logger();
        let mut session = UploadSession::new(port, config);
        let result = session.run(image);
        (result, session.into_port())
    }

    #[test]
    fn test_all_pages_acked_single_attempt() {
        let image = three_page_image();
        let (result, port) = run(MockPort::acking(BAUD), UploadConfig::default(), &image);

        let report = result.unwrap();
        assert_eq!(report, UploadReport { attempts: 1, pages: 3 });
        assert_eq!(port.attempts(), 1);

        let indices: Vec<u8> = port.frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![3, 2, 1]);

        // Last page first.
        let first_bytes: Vec<u8> = port.frames.iter().map(|f| f.payload[0]).collect();
        assert_eq!(first_bytes, vec![0xA2, 0xA1, 0xA0]);

        for frame in &port.frames {
            assert_eq!(frame.payload.len(), PAGE_SIZE);
            assert_eq!(frame.checksum, page_checksum(&frame.payload));
        }

        assert_eq!(port.input_clears, 0);
        assert_eq!(port.output_clears, 0);
        assert!(port.closed);
    }

    #[test]
    fn test_crypt_mode_indices() {
        let image = three_page_image();
        let config = UploadConfig::default().with_crypt(true);
        let (result, port) = run(MockPort::acking(BAUD), config, &image);

        assert!(result.is_ok());
        let indices: Vec<u8> = port.frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0x83, 0x82, 0x81]);
    }

    #[test]
    fn test_nack_twice_then_success() {
        let image = three_page_image();
        let port = MockPort::bootloader(BAUD, |attempt, position| {
            if attempt <= 2 && position == 1 {
                Some(0x55)
            } else {
                Some(ACK)
            }
        });

        let (result, port) = run(port, UploadConfig::default(), &image);

        assert_eq!(result.unwrap().attempts, 3);
        assert_eq!(port.attempts(), 3);
        assert_eq!(port.input_clears, 2);
        assert_eq!(port.output_clears, 2);

        // Aborted attempts stop right after the rejected page.
        let per_attempt: Vec<usize> = (1..=3)
            .map(|a| port.frames.iter().filter(|f| f.attempt == a).count())
            .collect();
        assert_eq!(per_attempt, vec![2, 2, 3]);
    }

    #[test]
    fn test_always_nack_exhausts_retries() {
        let image = three_page_image();
        let port = MockPort::bootloader(BAUD, |_, _| Some(0x00));

        let (result, port) = run(port, UploadConfig::default(), &image);

        match result {
            Err(Error::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, MAX_RETRIES);
                assert_eq!(last, AbortReason::Nack { index: 3, response: 0x00 });
            },
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(port.attempts(), MAX_RETRIES);
        assert_eq!(port.frames.len(), MAX_RETRIES as usize);
        assert_eq!(port.input_clears, MAX_RETRIES as usize);
        assert!(port.closed);
    }

    #[test]
    fn test_missing_ack_is_timeout() {
        let image = FirmwareImage::from_bytes(vec![0x42; 100]);
        let port = MockPort::bootloader(BAUD, |_, _| None);
        let config = UploadConfig::default().with_max_retries(2);

        let (result, port) = run(port, config, &image);

        assert!(matches!(
            result,
            Err(Error::RetryExhausted {
                attempts: 2,
                last: AbortReason::AckTimeout { index: 1 },
            })
        ));
        assert_eq!(port.frames.len(), 2);
    }

    #[test]
    fn test_wake_precedes_every_handshake() {
        let image = FirmwareImage::from_bytes(vec![0x11; 10]);
        let wake = WakeConfig::default();
        let port = MockPort::bootloader(BAUD, |attempt, _| {
            if attempt == 1 { Some(0xFF) } else { Some(ACK) }
        });
        let config = UploadConfig::default().with_wake(wake);

        let (result, port) = run(port, config, &image);

        assert_eq!(result.unwrap().attempts, 2);
        assert_eq!(
            port.wake_writes,
            vec![wake.command().as_bytes().to_vec(); 2]
        );

        let upload_line = LineSettings::new(BAUD);
        assert_eq!(
            port.settings_log,
            vec![wake.line_settings(), upload_line, wake.line_settings(), upload_line]
        );
        assert_eq!(port.settings_log[0].stop_bits, StopBits::Two);
        assert_eq!(port.settings_log[1].stop_bits, StopBits::One);
    }

    #[test]
    fn test_no_wake_by_default() {
        let image = FirmwareImage::from_bytes(vec![0x11; 10]);
        let (result, port) = run(MockPort::acking(BAUD), UploadConfig::default(), &image);

        assert!(result.is_ok());
        assert!(port.wake_writes.is_empty());
        assert_eq!(port.settings_log, vec![LineSettings::new(BAUD)]);
    }

    #[test]
    fn test_timeouts_follow_baud_rate() {
        let baud = 9600;
        let image = FirmwareImage::from_bytes(vec![0x11; 10]);
        let config = UploadConfig::default().with_baud_rate(baud);

        let (result, port) = run(MockPort::acking(baud), config, &image);

        assert!(result.is_ok());
        assert_eq!(
            port.timeout_log,
            vec![beacon_read_timeout(baud), page_ack_timeout(baud)]
        );
    }

    #[test]
    fn test_beacon_after_noise_chunk() {
        let image = FirmwareImage::from_bytes(vec![0x11; 10]);
        let port = MockPort::acking(BAUD).with_noise(&[0x00, 0x01, 0x02, 0x03]);

        let (result, _) = run(port, UploadConfig::default(), &image);
        assert!(result.is_ok());
    }

    #[test]
    fn test_bounded_beacon_wait_counts_as_failed_attempt() {
        let image = FirmwareImage::from_bytes(vec![0x11; 10]);
        let port = MockPort::acking(BAUD).without_beacon();
        let config = UploadConfig::default()
            .with_max_retries(3)
            .with_beacon_timeout(Some(Duration::from_millis(5)));

        let (result, port) = run(port, config, &image);

        assert!(matches!(
            result,
            Err(Error::RetryExhausted {
                attempts: 3,
                last: AbortReason::BeaconTimeout,
            })
        ));
        assert!(port.frames.is_empty());
        assert_eq!(port.input_clears, 3);
    }

    #[test]
    fn test_transport_failure_is_not_retried() {
        let image = FirmwareImage::from_bytes(vec![0x11; 10]);
        let port = MockPort::acking(BAUD).failing_writes();

        let (result, port) = run(port, UploadConfig::default(), &image);

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(port.attempts(), 1);
        assert_eq!(port.input_clears, 0);
        assert!(port.closed);
    }

    #[test]
    fn test_index_overflow_rejected_before_io() {
        let image = FirmwareImage::from_bytes(vec![0x11; 200 * PAGE_SIZE]);
        let config = UploadConfig::default().with_crypt(true);

        let (result, port) = run(MockPort::acking(BAUD), config, &image);

        assert!(matches!(result, Err(Error::PageIndexOverflow { .. })));
        assert!(port.settings_log.is_empty());
        assert!(port.closed);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let image = FirmwareImage::from_bytes(vec![0x11; 10]);
        let config = UploadConfig::default().with_max_retries(0);

        let (result, _) = run(MockPort::acking(BAUD), config, &image);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_progress_events() {
        let image = FirmwareImage::from_bytes(vec![0x11; PAGE_SIZE + 1]);
        let port = MockPort::bootloader(BAUD, |attempt, _| {
            if attempt == 1 { None } else { Some(ACK) }
        });
        let mut session = UploadSession::new(port, UploadConfig::default());

        let mut events = Vec::new();
        let report = session
            .run_with_progress(&image, |event| events.push(*event))
            .unwrap();

        assert_eq!(report.attempts, 2);
        assert_eq!(
            events,
            vec![
                UploadEvent::AttemptStarted {
                    attempt: 1,
                    max_attempts: MAX_RETRIES
                },
                UploadEvent::BeaconReceived,
                UploadEvent::AttemptAborted {
                    attempt: 1,
                    reason: AbortReason::AckTimeout { index: 2 }
                },
                UploadEvent::AttemptStarted {
                    attempt: 2,
                    max_attempts: MAX_RETRIES
                },
                UploadEvent::BeaconReceived,
                UploadEvent::PageAcknowledged {
                    sent: 1,
                    total: 2,
                    index: 2
                },
                UploadEvent::PageAcknowledged {
                    sent: 2,
                    total: 2,
                    index: 1
                },
            ]
        );
    }

    #[test]
    fn test_empty_image_sends_one_fill_page() {
        let image = FirmwareImage::from_bytes(Vec::new());
        let (result, port) = run(MockPort::acking(BAUD), UploadConfig::default(), &image);

        assert_eq!(result.unwrap().pages, 1);
        assert_eq!(port.frames.len(), 1);
        assert_eq!(port.frames[0].index, 1);
        assert!(port.frames[0].payload.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_config_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.start_offset, 1);
        assert!(!config.crypt);
        assert!(config.wake.is_none());
        assert_eq!(config.max_retries, 10);
        assert!(config.beacon_timeout.is_none());
        assert!(config.validate().is_ok());
    }
}
