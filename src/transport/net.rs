//! TCP and UDP transports for Ethernet LIDARs

use super::{Interrupter, NetworkConfig, Transport};
use crate::error::{ConnectCause, Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Smallest timeout the socket API accepts
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

fn connect_error(target: String, e: &io::Error) -> Error {
    Error::Connect {
        target,
        cause: ConnectCause::from_io(e),
        detail: e.to_string(),
    }
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let target = format!("{}:{}", host, port);
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| connect_error(target.clone(), &e))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::Connect {
            target,
            cause: ConnectCause::Unreachable,
            detail: "host resolved to no addresses".to_string(),
        });
    }
    Ok(addrs)
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// TCP transport (SICK CoLa-A on port 2111)
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpTransport {
    /// Connect with a bounded timeout, trying each resolved address
    pub fn connect(config: &NetworkConfig) -> Result<Self> {
        let target = format!("{}:{}", config.host, config.port);
        let mut last_error = None;

        for addr in resolve(&config.host, config.port)? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout.max(MIN_TIMEOUT)) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    log::info!("Connected to {}", addr);
                    return Ok(TcpTransport { stream, peer: addr });
                }
                Err(e) => {
                    log::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        let e = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable));
        Err(connect_error(target, &e))
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        self.stream.set_read_timeout(Some(timeout.max(MIN_TIMEOUT)))?;
        match self.stream.read(buffer) {
            Ok(0) => Err(Error::TransportFault(format!(
                "{} closed the connection",
                self.peer
            ))),
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.stream.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let control = self.stream.try_clone().ok()?;
        Some(Box::new(move || {
            let _ = control.shutdown(Shutdown::Both);
        }))
    }
}

/// UDP transport: one datagram per read
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind the local port and remember the peer for commands
    pub fn bind(config: &NetworkConfig) -> Result<Self> {
        let peer = resolve(&config.host, config.port)?[0];
        let local_port = config.local_port.unwrap_or(config.port);
        let local = format!("0.0.0.0:{}", local_port);

        let socket = UdpSocket::bind(&local).map_err(|e| connect_error(local.clone(), &e))?;
        log::info!("Listening on {} for {}", local, peer);

        Ok(UdpTransport { socket, peer })
    }
}

impl Transport for UdpTransport {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        self.socket.set_read_timeout(Some(timeout.max(MIN_TIMEOUT)))?;
        match self.socket.recv_from(buffer) {
            Ok((n, _from)) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.socket.send_to(data, self.peer)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        match self.socket.local_addr() {
            Ok(local) => format!("udp://{} <- {}", local, self.peer),
            Err(_) => format!("udp://{}", self.peer),
        }
    }

    fn is_datagram(&self) -> bool {
        true
    }
}
