//! Mock transport for testing

use super::{Interrupter, Transport};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mock transport for hardware-free testing
///
/// Reads are served from a script of chunks. Clones share state, so a test
/// keeps one clone to feed data and inspect writes while the session owns
/// another.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<MockTransportInner>,
    readable: Condvar,
}

enum ScriptedRead {
    Data(Vec<u8>),
    Fault(String),
}

struct MockTransportInner {
    reads: VecDeque<ScriptedRead>,
    written: Vec<u8>,
    replies: Vec<(Vec<u8>, Vec<u8>)>,
    datagram: bool,
    interrupted: bool,
    shutdown_count: usize,
    description: String,
}

impl MockTransport {
    /// Create a new byte-stream mock
    pub fn new() -> Self {
        MockTransport {
            shared: Arc::new(Shared {
                inner: Mutex::new(MockTransportInner {
                    reads: VecDeque::new(),
                    written: Vec::new(),
                    replies: Vec::new(),
                    datagram: false,
                    interrupted: false,
                    shutdown_count: 0,
                    description: "mock".to_string(),
                }),
                readable: Condvar::new(),
            }),
        }
    }

    /// Create a mock whose reads return one scripted chunk each, like UDP
    pub fn datagram() -> Self {
        let mock = Self::new();
        {
            let mut inner = mock.shared.inner.lock();
            inner.datagram = true;
            inner.description = "mock-udp".to_string();
        }
        mock
    }

    /// Queue a chunk to be read
    pub fn push_read(&self, data: &[u8]) {
        self.shared.inner.lock().reads.push_back(ScriptedRead::Data(data.to_vec()));
        self.shared.readable.notify_all();
    }

    /// Queue a transport fault (e.g. device unplugged)
    pub fn push_fault(&self, reason: &str) {
        self.shared.inner.lock().reads.push_back(ScriptedRead::Fault(reason.to_string()));
        self.shared.readable.notify_all();
    }

    /// Queue `reply` whenever a write equals `command`
    pub fn reply_to(&self, command: &[u8], reply: &[u8]) {
        self.shared
            .inner
            .lock()
            .replies
            .push((command.to_vec(), reply.to_vec()));
    }

    /// Get all written data
    pub fn written(&self) -> Vec<u8> {
        self.shared.inner.lock().written.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.shared.inner.lock().written.clear();
    }

    /// Scripted reads not yet consumed
    pub fn pending_reads(&self) -> usize {
        self.shared.inner.lock().reads.len()
    }

    /// Times `shutdown` was called
    pub fn shutdown_count(&self) -> usize {
        self.shared.inner.lock().shutdown_count
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();

        loop {
            if inner.interrupted {
                return Err(Error::Closed);
            }
            if let Some(next) = inner.reads.pop_front() {
                return match next {
                    ScriptedRead::Fault(reason) => Err(Error::TransportFault(reason)),
                    ScriptedRead::Data(mut data) => {
                        let n = data.len().min(buffer.len());
                        buffer[..n].copy_from_slice(&data[..n]);
                        if n < data.len() && !inner.datagram {
                            // stream semantics: the remainder stays readable
                            let rest = data.split_off(n);
                            inner.reads.push_front(ScriptedRead::Data(rest));
                        }
                        Ok(n)
                    }
                };
            }
            if self
                .shared
                .readable
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                return Ok(0);
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.shared.inner.lock();
        if inner.interrupted {
            return Err(Error::Closed);
        }
        inner.written.extend_from_slice(data);
        let replies: Vec<Vec<u8>> = inner
            .replies
            .iter()
            .filter(|(command, _)| command.as_slice() == data)
            .map(|(_, reply)| reply.clone())
            .collect();
        let replied = !replies.is_empty();
        for reply in replies {
            inner.reads.push_back(ScriptedRead::Data(reply));
        }
        drop(inner);
        if replied {
            self.shared.readable.notify_all();
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        self.shared.inner.lock().description.clone()
    }

    fn is_datagram(&self) -> bool {
        self.shared.inner.lock().datagram
    }

    fn shutdown(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.interrupted = true;
        inner.shutdown_count += 1;
        drop(inner);
        self.shared.readable.notify_all();
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let shared = Arc::clone(&self.shared);
        Some(Box::new(move || {
            shared.inner.lock().interrupted = true;
            shared.readable.notify_all();
        }))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
