//! Chatter relays lines between the host and a [Device].
//!
//! Every line the device prints is appended to the session logfile, in
//! arrival order, and kept in memory for the trial setter to re-parse. Lines
//! the host wants to send go through a FIFO queue. Only one queued line is
//! ever in flight: the next one is sent once the device has echoed the
//! previous one back as `ACK <line>`.

use crate::device::{self, Device};
use crate::error::{ArduError, Result};
use crate::trial_speak::ACK;
use chrono::Local;
use log::{debug, info, warn};
use serial2::SerialPort;
use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    str,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

/// The most recently sent queued line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingCommand {
    /// Exactly as queued, without the newline
    pub line: String,
    /// Whether the device has echoed it back
    pub acked: bool,
}

/// A logfile name like `ardulines.20241017153045` in `dir`.
pub fn default_log_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref()
        .join(Local::now().format("ardulines.%Y%m%d%H%M%S").to_string())
}

/// The relay between the host and one device, with its logfile.
pub struct Chatter<D: Device> {
    device: Option<D>,
    logfile: Option<BufWriter<File>>,
    log_path: PathBuf,
    user_input: Option<Receiver<String>>,
    read_buf: Vec<u8>,
    lines: Vec<String>,
    write_queue: VecDeque<String>,
    outstanding: Option<OutstandingCommand>,
}

impl Chatter<SerialPort> {
    /// Open a rig on a serial port and start a logfile at `log_path`.
    pub fn open(
        port: &str,
        baud_rate: u32,
        read_timeout: Duration,
        settle: Duration,
        log_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let serial = device::open_serial(port, baud_rate, read_timeout, settle)?;
        Chatter::new(serial, log_path)
    }
}

impl<D: Device> Chatter<D> {
    /// Wrap an already opened device. The logfile is appended to if it
    /// exists, and its directory is created if it does not.
    pub fn new(device: D, log_path: impl AsRef<Path>) -> Result<Self> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(dir) = log_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        info!("Logging device output to {}", log_path.display());

        Ok(Chatter {
            device: Some(device),
            logfile: Some(BufWriter::new(file)),
            log_path,
            user_input: None,
            read_buf: Vec::new(),
            lines: Vec::new(),
            write_queue: VecDeque::new(),
            outstanding: None,
        })
    }

    /// Lines received on `user_input` are forwarded to the device as they
    /// are, outside the queue.
    pub fn with_user_input(mut self, user_input: Receiver<String>) -> Self {
        self.set_user_input(user_input);
        self
    }

    /// Like [Chatter::with_user_input], on an existing chatter.
    pub fn set_user_input(&mut self, user_input: Receiver<String>) {
        self.user_input = Some(user_input);
    }

    /// Queue a line for the device. A newline is appended when it is sent.
    pub fn queue_write(&mut self, line: impl Into<String>) {
        self.write_queue.push_back(line.into());
    }

    /// One step of the relay. Returns the number of lines received.
    ///
    /// In order: forward pending user input, read and log everything the
    /// device has printed, look for the acknowledgement of the outstanding
    /// line, and send the next queued line if the outstanding one has been
    /// acknowledged.
    pub fn poll(&mut self, echo: bool) -> Result<usize> {
        if self.device.is_none() {
            return Err(ArduError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "chatter is closed",
            )));
        }

        self.forward_user_input()?;

        let first_new = self.lines.len();
        self.read_device(echo)?;
        let new_lines = self.lines.len() - first_new;

        if let Some(outstanding) = self.outstanding.as_mut().filter(|o| !o.acked) {
            let expected = format!("{} {}", ACK, outstanding.line);
            if self.lines[first_new..]
                .iter()
                .any(|line| line.trim_end().ends_with(&expected))
            {
                debug!("{:?} acknowledged", outstanding.line);
                outstanding.acked = true;
            }
        }

        let clear_to_send = self.outstanding.as_ref().map_or(true, |o| o.acked);
        if clear_to_send {
            if let Some(line) = self.write_queue.pop_front() {
                self.send(&line)?;
                self.outstanding = Some(OutstandingCommand { line, acked: false });
            }
        }

        Ok(new_lines)
    }

    fn forward_user_input(&mut self) -> Result<()> {
        let Some(rx) = &self.user_input else {
            return Ok(());
        };
        let mut pending = Vec::new();
        let disconnected = loop {
            match rx.try_recv() {
                Ok(line) => pending.push(line),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        if disconnected {
            debug!("user input closed");
            self.user_input = None;
        }
        for line in pending {
            info!("Forwarding user input {:?}", line);
            self.send(line.trim_end())?;
        }
        Ok(())
    }

    fn send(&mut self, line: &str) -> Result<()> {
        let device = self.device.as_mut().ok_or_else(|| {
            ArduError::TransportWrite(io::Error::new(
                io::ErrorKind::NotConnected,
                "chatter is closed",
            ))
        })?;

        debug!("Sending {:?}", line);
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        device.write_all(&bytes).map_err(|e| {
            warn!("Failed to write {:?}: {}", line, e);
            ArduError::TransportWrite(e)
        })
    }

    fn read_device(&mut self, echo: bool) -> Result<()> {
        let mut buffer = [0; 256];
        loop {
            let Some(device) = self.device.as_mut() else {
                return Ok(());
            };
            let read_len = device.read_available(&mut buffer)?;
            if read_len == 0 {
                break;
            }

            for &c in buffer.iter().take(read_len) {
                if c != b'\n' {
                    self.read_buf.push(c);
                    continue;
                }
                let line = match str::from_utf8(&self.read_buf) {
                    Ok(s) => s.trim_end_matches('\r').to_owned(),
                    // Often happens at the beginning of transmission when
                    // there is still garbage in the hardware buffer
                    Err(e) => {
                        warn!("Failed to decode utf-8: {:?}", e);
                        String::from_utf8_lossy(&self.read_buf)
                            .trim_end_matches('\r')
                            .to_owned()
                    }
                };
                self.read_buf.clear();
                self.record(line, echo)?;
            }
        }

        if let Some(logfile) = self.logfile.as_mut() {
            logfile.flush()?;
        }
        Ok(())
    }

    fn record(&mut self, line: String, echo: bool) -> Result<()> {
        if let Some(logfile) = self.logfile.as_mut() {
            writeln!(logfile, "{}", line)?;
        }
        if echo {
            println!("{}", line);
        }
        self.lines.push(line);
        Ok(())
    }

    /// Every line received this session, in order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Where every received line is written.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// The line waiting for, or last given, its acknowledgement.
    pub fn outstanding(&self) -> Option<&OutstandingCommand> {
        self.outstanding.as_ref()
    }

    /// Lines queued but not yet sent.
    pub fn queued(&self) -> usize {
        self.write_queue.len()
    }

    /// `None` once closed.
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Whether [Chatter::close] has run.
    pub fn is_closed(&self) -> bool {
        self.device.is_none()
    }

    /// Flush the logfile and release the device. Lines still in the queue
    /// are dropped. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(device) = self.device.take() {
            if !self.write_queue.is_empty() {
                info!("Dropping {} unsent lines", self.write_queue.len());
                self.write_queue.clear();
            }
            drop(device);
        }
        if let Some(mut logfile) = self.logfile.take() {
            logfile.flush()?;
            info!("Closed {}", self.log_path.display());
        }
        Ok(())
    }
}
