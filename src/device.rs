//! The boundary between the host and the rig.
//!
//! Everything above this module talks to a [Device]. The real implementation
//! is a [serial2::SerialPort]; [crate::dummy_device::DummyDevice] stands in
//! for a rig in simulation and tests.

use crate::error::{ArduError, Result};
use log::{debug, info};
use serial2::SerialPort;
use std::{io, path::PathBuf, thread::sleep, time::Duration};

/// A byte stream to and from a rig.
pub trait Device: Send {
    /// Read whatever is available, waiting at most the device's read timeout.
    /// Returns `Ok(0)` if nothing arrived in time.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write every byte or fail.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Drop anything received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl Device for SerialPort {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read(buf) {
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            other => other,
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        SerialPort::write_all(self, bytes)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.discard_input_buffer()
    }
}

/// Open a rig's serial port.
///
/// Opening the port resets most Arduinos, which then print boot noise. We
/// wait for that, throw it away, and wait again before anything is sent.
pub fn open_serial(
    port: &str,
    baud_rate: u32,
    read_timeout: Duration,
    settle: Duration,
) -> Result<SerialPort> {
    let unavailable = |source| ArduError::DeviceUnavailable {
        port: port.to_owned(),
        source,
    };

    let mut serial = SerialPort::open(port, baud_rate).map_err(unavailable)?;
    serial.set_read_timeout(read_timeout).map_err(unavailable)?;
    info!("Opened {} at {} baud", port, baud_rate);

    sleep(settle);
    serial.discard_input().map_err(unavailable)?;
    debug!("Discarded stale input on {}", port);
    sleep(settle);

    Ok(serial)
}

/// Serial ports that a rig might be plugged into.
pub fn available_ports() -> Result<Vec<PathBuf>> {
    Ok(SerialPort::available_ports()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_port_is_unavailable() {
        let err = open_serial(
            "/dev/this-port-does-not-exist",
            115200,
            Duration::from_millis(10),
            Duration::ZERO,
        )
        .unwrap_err();
        match err {
            ArduError::DeviceUnavailable { port, .. } => {
                assert_eq!(port, "/dev/this-port-does-not-exist")
            }
            other => panic!("unexpected error {}", other),
        }
    }
}
