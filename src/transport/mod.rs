//! Transport layer for I/O abstraction
//!
//! A [`Transport`] is one physical link (serial port, TCP stream, UDP socket,
//! or a scripted mock). [`TransportChannel`] wraps a boxed transport so it can
//! be shared between the session and its scan worker and closed from any
//! thread.

use crate::error::{ConnectCause, Error, Result};
use crate::types::{DeviceKind, LinkKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod mock;
mod net;
mod serial;

pub use mock::MockTransport;
pub use net::{TcpTransport, UdpTransport};
pub use serial::{SerialTransport, SUPPORTED_BAUD_RATES};

/// Callback that makes a blocked read return early
pub type Interrupter = Box<dyn Fn() + Send + Sync>;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read into buffer, waiting at most `timeout`
    ///
    /// Returns `Ok(0)` when nothing arrived in time. Datagram transports
    /// return exactly one datagram per call.
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Port path or peer address, for logs and errors
    fn describe(&self) -> String;

    /// Whether each read yields one self-contained datagram
    fn is_datagram(&self) -> bool {
        false
    }

    /// Release the underlying handle
    fn shutdown(&mut self) {}

    /// Handle that can unblock an in-flight read from another thread
    ///
    /// Transports whose reads are already bounded by the read timeout return
    /// `None`.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1", alias = "one")]
    One,
    #[serde(rename = "2", alias = "two")]
    Two,
}

/// Serial link parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Upper bound on a single blocking read
    pub read_timeout: Duration,
}

impl SerialConfig {
    /// 8N1 at the given rate with a 100 ms read timeout
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Network link parameters (TCP or UDP, chosen by device kind)
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Device host name or address
    pub host: String,
    /// Device port
    pub port: u16,
    /// Local UDP port to bind; defaults to `port`
    pub local_port: Option<u16>,
    /// Upper bound on a single blocking read
    pub read_timeout: Duration,
    /// Upper bound on TCP connection establishment
    pub connect_timeout: Duration,
}

impl NetworkConfig {
    /// Peer with 100 ms read and 2 s connect timeouts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            local_port: None,
            read_timeout: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Link configuration
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    Serial(SerialConfig),
    Network(NetworkConfig),
}

impl TransportConfig {
    /// Port path or host:port
    pub fn target(&self) -> String {
        match self {
            TransportConfig::Serial(c) => c.port.clone(),
            TransportConfig::Network(c) => format!("{}:{}", c.host, c.port),
        }
    }

    /// Configured per-read timeout
    pub fn read_timeout(&self) -> Duration {
        match self {
            TransportConfig::Serial(c) => c.read_timeout,
            TransportConfig::Network(c) => c.read_timeout,
        }
    }

    /// Reject kind/link combinations that can never work
    pub fn check_kind(&self, kind: DeviceKind) -> Result<()> {
        let ok = matches!(
            (kind.link(), self),
            (LinkKind::Serial, TransportConfig::Serial(_))
                | (LinkKind::Tcp | LinkKind::Udp, TransportConfig::Network(_))
        );
        if ok {
            Ok(())
        } else {
            Err(Error::Connect {
                target: self.target(),
                cause: ConnectCause::InvalidConfig,
                detail: format!("{} needs a {:?} link", kind, kind.link()),
            })
        }
    }
}

/// Shared handle to one open transport
///
/// Reads and writes serialize on an internal lock. `close` may be called from
/// any thread, any number of times; the transport is shut down exactly once.
pub struct TransportChannel {
    transport: Mutex<Option<Box<dyn Transport>>>,
    interrupter: Option<Interrupter>,
    closed: AtomicBool,
    description: String,
    datagram: bool,
}

impl TransportChannel {
    /// Open the link described by `config` for a device family
    pub fn open(config: &TransportConfig, kind: DeviceKind) -> Result<Self> {
        config.check_kind(kind)?;
        let transport: Box<dyn Transport> = match (config, kind.link()) {
            (TransportConfig::Serial(c), _) => Box::new(SerialTransport::open(c)?),
            (TransportConfig::Network(c), LinkKind::Udp) => Box::new(UdpTransport::bind(c)?),
            (TransportConfig::Network(c), _) => Box::new(TcpTransport::connect(c)?),
        };
        Ok(Self::from_transport(transport))
    }

    /// Wrap an already-open transport
    pub fn from_transport(transport: Box<dyn Transport>) -> Self {
        let description = transport.describe();
        let datagram = transport.is_datagram();
        let interrupter = transport.interrupter();
        Self {
            transport: Mutex::new(Some(transport)),
            interrupter,
            closed: AtomicBool::new(false),
            description,
            datagram,
        }
    }

    /// Read into `buffer`, waiting at most `timeout`
    ///
    /// Returns the byte count, [`Error::Timeout`] when nothing arrived, or
    /// [`Error::Closed`] once the channel is closed.
    pub fn read_into(&self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let mut guard = self.transport.lock();
        let transport = guard.as_mut().ok_or(Error::Closed)?;
        match transport.read(buffer, timeout) {
            Ok(0) => Err(Error::Timeout),
            Ok(n) => Ok(n),
            // an interrupted read surfaces as whatever the OS reported
            Err(_) if self.is_closed() => Err(Error::Closed),
            Err(e) => Err(e),
        }
    }

    /// Read up to `max_bytes`, waiting at most `timeout`
    pub fn read_with_timeout(&self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; max_bytes.max(1)];
        let n = self.read_into(&mut buffer, timeout)?;
        buffer.truncate(n);
        Ok(buffer)
    }

    /// Write and flush the whole buffer
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let mut guard = self.transport.lock();
        let transport = guard.as_mut().ok_or(Error::Closed)?;
        let mut written = 0;
        while written < data.len() {
            let n = transport.write(&data[written..])?;
            if n == 0 {
                return Err(Error::TransportFault(format!(
                    "{} accepted no bytes",
                    self.description
                )));
            }
            written += n;
        }
        transport.flush()
    }

    /// Close the channel; returns `false` if it was already closed
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(interrupt) = &self.interrupter {
            interrupt();
        }
        if let Some(mut transport) = self.transport.lock().take() {
            transport.shutdown();
            log::info!("Closed {}", self.description);
        }
        true
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether reads yield whole datagrams
    pub fn is_datagram(&self) -> bool {
        self.datagram
    }

    /// Port path or peer address
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close();
    }
}
