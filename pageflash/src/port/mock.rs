//! In-memory port simulating the bootloader, for tests.
//!
//! Unlike `Cursor<Vec<u8>>`, reads and writes are independent, and replies
//! are produced in reaction to what the host sends:
//!
//! - reconfiguring to the upload baud starts a new attempt and queues the
//!   beacon;
//! - every complete page frame is answered by the responder closure;
//! - anything written at another baud rate is recorded as a wake command.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{LineSettings, Port};
use crate::protocol::beacon::BEACON;
use crate::protocol::frame::FRAME_LEN;

/// Reply for the page at `position` (0 = first frame) of `attempt` (1-based).
pub(crate) type Responder = Box<dyn FnMut(u32, usize) -> Option<u8> + Send>;

/// A page frame as received by the simulated bootloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SeenFrame {
    pub attempt: u32,
    pub index: u8,
    pub checksum: u8,
    pub payload: Vec<u8>,
}

pub(crate) struct MockPort {
    settings: LineSettings,
    timeout: Duration,
    inbound: VecDeque<u8>,
    upload_baud: Option<u32>,
    emit_beacon: bool,
    noise: Vec<u8>,
    fail_writes: bool,
    responder: Responder,
    pending: Vec<u8>,
    attempt: u32,
    position: usize,

    pub settings_log: Vec<LineSettings>,
    pub timeout_log: Vec<Duration>,
    pub wake_writes: Vec<Vec<u8>>,
    pub frames: Vec<SeenFrame>,
    pub input_clears: usize,
    pub output_clears: usize,
    pub closed: bool,
}

impl MockPort {
    /// A port nobody answers on, opened at `baud`.
    pub(crate) fn silent(baud: u32) -> Self {
        Self {
            settings: LineSettings::new(baud),
            timeout: Duration::from_millis(1000),
            inbound: VecDeque::new(),
            upload_baud: None,
            emit_beacon: false,
            noise: Vec::new(),
            fail_writes: false,
            responder: Box::new(|_, _| None),
            pending: Vec::new(),
            attempt: 0,
            position: 0,
            settings_log: Vec::new(),
            timeout_log: Vec::new(),
            wake_writes: Vec::new(),
            frames: Vec::new(),
            input_clears: 0,
            output_clears: 0,
            closed: false,
        }
    }

    /// A bootloader listening at `upload_baud` that answers pages with
    /// `responder`.
    pub(crate) fn bootloader<F>(upload_baud: u32, responder: F) -> Self
    where
        F: FnMut(u32, usize) -> Option<u8> + Send + 'static,
    {
        Self {
            upload_baud: Some(upload_baud),
            emit_beacon: true,
            responder: Box::new(responder),
            ..Self::silent(upload_baud)
        }
    }

    /// A bootloader acknowledging every page.
    pub(crate) fn acking(upload_baud: u32) -> Self {
        Self::bootloader(upload_baud, |_, _| Some(crate::protocol::frame::ACK))
    }

    /// Never send the beacon.
    pub(crate) fn without_beacon(mut self) -> Self {
        self.emit_beacon = false;
        self
    }

    /// Send `noise` ahead of every beacon.
    pub(crate) fn with_noise(mut self, noise: &[u8]) -> Self {
        self.noise = noise.to_vec();
        self
    }

    /// Fail every write with a broken pipe.
    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub(crate) fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Number of attempts the bootloader saw.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }

    fn at_upload_baud(&self) -> bool {
        self.upload_baud == Some(self.settings.baud_rate)
    }

    fn receive_frames(&mut self) {
        while self.pending.len() >= FRAME_LEN {
            let frame: Vec<u8> = self.pending.drain(..FRAME_LEN).collect();
            self.frames.push(SeenFrame {
                attempt: self.attempt,
                index: frame[4],
                checksum: frame[5],
                payload: frame[6..].to_vec(),
            });
            let position = self.position;
            self.position += 1;
            if let Some(reply) = (self.responder)(self.attempt, position) {
                self.inbound.push_back(reply);
            }
        }
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout_log.push(timeout);
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn apply_settings(&mut self, settings: &LineSettings) -> Result<()> {
        self.settings_log.push(*settings);
        self.settings = *settings;
        if self.at_upload_baud() {
            self.attempt += 1;
            self.position = 0;
            if self.emit_beacon {
                let noise = self.noise.clone();
                self.inbound.extend(noise);
                self.inbound.extend(BEACON);
            }
        }
        Ok(())
    }

    fn settings(&self) -> LineSettings {
        self.settings
    }

    fn clear_input(&mut self) -> Result<()> {
        self.input_clears += 1;
        self.inbound.clear();
        Ok(())
    }

    fn clear_output(&mut self) -> Result<()> {
        self.output_clears += 1;
        self.pending.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if self.at_upload_baud() {
            self.pending.extend_from_slice(buf);
            self.receive_frames();
        } else {
            self.wake_writes.push(buf.to_vec());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
