//! Error types for Drishti-IO
//!
//! Two separate taxonomies live here:
//!
//! - [`Error`]: operation failures surfaced to callers (connect, single-shot
//!   reads, lifecycle misuse, mid-scan transport loss).
//! - [`FaultKind`] / [`DecodeFault`]: recoverable per-frame decode faults.
//!   These never leave the acquisition loop as errors; they are counted in
//!   [`Statistics`](crate::lidar::Statistics) and the codec resynchronises.

use crate::lidar::SessionState;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Drishti-IO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport could not be opened
    #[error("Connect to {target} failed ({cause}): {detail}")]
    Connect {
        /// Port path or host:port
        target: String,
        /// Classified failure
        cause: ConnectCause,
        /// Underlying error text
        detail: String,
    },

    /// Read returned nothing within its timeout
    #[error("Read timed out")]
    Timeout,

    /// Channel was closed
    #[error("Transport closed")]
    Closed,

    /// Single-shot read exhausted its attempts without a sample
    #[error("No LIDAR data after {attempts} read attempts")]
    NoData {
        /// Read attempts made
        attempts: u32,
    },

    /// Transport failed while connected or scanning
    #[error("Transport fault: {0}")]
    TransportFault(String),

    /// Repeated joint-capture failure (advisory)
    #[error("Capture degraded: {consecutive} consecutive ticks without any successful leg")]
    Degraded {
        /// Consecutive total-failure ticks so far
        consecutive: u32,
    },

    /// Operation not valid in the current session state
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Baud rate outside the supported set
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Continuous capture already running
    #[error("Continuous capture already running")]
    AlreadyRunning,

    /// Camera collaborator failure
    #[error("Camera error: {0}")]
    Camera(String),

    /// Worker thread panicked
    #[error("Thread panicked")]
    ThreadPanic,
}

impl Error {
    /// Whether this error means the underlying link is gone (as opposed to
    /// an idle timeout).
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Error::Serial(_) | Error::Io(_) | Error::TransportFault(_) | Error::Closed
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Why a transport could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectCause {
    /// Connection refused, host or network unreachable
    #[error("unreachable")]
    Unreachable,
    /// Connect did not complete within its bound
    #[error("timed out")]
    TimedOut,
    /// Device node or socket not accessible
    #[error("permission denied")]
    PermissionDenied,
    /// Device node does not exist
    #[error("not found")]
    NotFound,
    /// Kind/transport combination or parameters rejected before opening
    #[error("invalid configuration")]
    InvalidConfig,
    /// Anything else
    #[error("other")]
    Other,
}

impl ConnectCause {
    /// Classify an I/O error raised while opening a transport
    pub fn from_io(e: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::AddrNotAvailable => ConnectCause::Unreachable,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectCause::TimedOut,
            ErrorKind::PermissionDenied => ConnectCause::PermissionDenied,
            ErrorKind::NotFound => ConnectCause::NotFound,
            ErrorKind::InvalidInput => ConnectCause::InvalidConfig,
            _ => ConnectCause::Other,
        }
    }

    /// Classify a serial port open error
    pub fn from_serial(e: &serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => ConnectCause::NotFound,
            serialport::ErrorKind::InvalidInput => ConnectCause::InvalidConfig,
            serialport::ErrorKind::Io(kind) => {
                ConnectCause::from_io(&std::io::Error::from(kind))
            }
            serialport::ErrorKind::Unknown => ConnectCause::Other,
        }
    }
}

/// Recoverable decode-time fault classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum FaultKind {
    /// Frame checksum did not match; the codec shifts by one byte
    #[error("checksum error")]
    ChecksumError,
    /// Line or frame structure malformed; discarded up to the next delimiter
    #[error("framing error")]
    FramingError,
    /// A numeric token could not be parsed; only its record is dropped
    #[error("parse error")]
    ParseError,
    /// Frame started but not finished yet; keep buffering
    #[error("incomplete frame")]
    Incomplete,
    /// Frame exceeded its size ceiling; discarded and resynchronised
    #[error("frame overflow")]
    Overflow,
}

/// A decode fault with context
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct DecodeFault {
    /// Classification
    pub kind: FaultKind,
    /// Human-readable context
    pub detail: String,
}

impl DecodeFault {
    /// Create a new fault
    pub fn new(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Shorthand for the "keep buffering" signal
    pub fn incomplete() -> Self {
        Self::new(FaultKind::Incomplete, "waiting for more bytes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_cause_from_io() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(ConnectCause::from_io(&refused), ConnectCause::Unreachable);

        let timeout = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert_eq!(ConnectCause::from_io(&timeout), ConnectCause::TimedOut);

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(ConnectCause::from_io(&denied), ConnectCause::PermissionDenied);
    }

    #[test]
    fn test_transport_fault_classification() {
        assert!(Error::Closed.is_transport_fault());
        assert!(Error::TransportFault("unplugged".into()).is_transport_fault());
        assert!(!Error::Timeout.is_transport_fault());
        assert!(!Error::NoData { attempts: 3 }.is_transport_fault());
    }

    #[test]
    fn test_decode_fault_display() {
        let fault = DecodeFault::new(FaultKind::ChecksumError, "expected 0x12, got 0x34");
        assert_eq!(fault.to_string(), "checksum error: expected 0x12, got 0x34");
    }
}
