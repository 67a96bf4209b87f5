//! Serial transport implementation

use super::{Parity, SerialConfig, StopBits, Transport};
use crate::error::{ConnectCause, Error, Result};
use serialport::{DataBits, FlowControl, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;

/// Baud rates accepted at connect time
pub const SUPPORTED_BAUD_RATES: [u32; 13] = [
    9_600, 19_200, 38_400, 57_600, 115_200, 128_000, 153_600, 230_400, 256_000, 460_800,
    512_000, 921_600, 1_000_000,
];

/// Serial transport for UART / USB-serial LIDARs
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialTransport {
    /// Open a serial port
    pub fn open(config: &SerialConfig) -> Result<Self> {
        if !SUPPORTED_BAUD_RATES.contains(&config.baud_rate) {
            return Err(Error::UnsupportedBaudRate(config.baud_rate));
        }

        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| Error::Connect {
                target: config.port.clone(),
                cause: ConnectCause::from_serial(&e),
                detail: e.to_string(),
            })?;

        log::info!(
            "Opened serial port: {} at {} baud",
            config.port,
            config.baud_rate
        );

        Ok(SerialTransport {
            port,
            path: config.port.clone(),
            baud_rate: config.baud_rate,
            timeout: config.read_timeout,
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.path, self.baud_rate)
    }

    fn shutdown(&mut self) {
        // dropping the port closes the fd; discard whatever is queued first
        if let Err(e) = self.port.clear(serialport::ClearBuffer::All) {
            log::debug!("Clearing {} before close failed: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_baud_rejected_before_open() {
        let config = SerialConfig::new("/dev/does-not-exist", 14_400);
        assert!(matches!(
            SerialTransport::open(&config),
            Err(Error::UnsupportedBaudRate(14_400))
        ));
    }

    #[test]
    fn test_missing_port_is_connect_error() {
        let config = SerialConfig::new("/dev/drishti-missing-port", 115_200);
        match SerialTransport::open(&config) {
            Err(Error::Connect { target, .. }) => assert_eq!(target, "/dev/drishti-missing-port"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }

    #[test]
    #[ignore] // Requires hardware
    fn test_open_real_port() {
        let config = SerialConfig::new("/dev/ttyUSB0", 115_200);
        let mut port = SerialTransport::open(&config).unwrap();
        let mut buf = [0u8; 64];
        port.read(&mut buf, Duration::from_millis(200)).unwrap();
    }
}
