//! LIDAR session: connect, identify, read, and stream one device
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect──▶ Connected ──start_scan──▶ Scanning
//!                             ▲   │ ◀──stop_scan───────┘  │
//!                             │   └──transport fault──▶ Faulted
//!                             └──────reconnect─────────────┘
//! ```
//!
//! Closing the channel from another thread while scanning ends the worker
//! and leaves the session `Disconnected`; `reconnect` reopens it.
//!
//! `disconnect` is valid from every state and never fails.

pub mod protocol;
pub mod scheduler;

pub use protocol::{CommandSet, DeviceInfo};
pub use scheduler::{
    AcquisitionScheduler, LatestScan, ScanContext, ScanWorker, SessionState, SharedStatistics,
    StateCell, Statistics,
};

use crate::codec::{CodecOptions, StreamDecoder};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportChannel, TransportConfig};
use crate::types::{monotonic_seconds, DeviceKind, RangeSample, SampleLimits, ScanFrame};
use crossbeam_channel::{Receiver, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-read wait while emptying pending input
const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Reads spent emptying pending input before giving up on a fast stream
const MAX_DRAIN_READS: usize = 64;

/// Everything needed to open and run a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kind: DeviceKind,
    pub transport: TransportConfig,
    /// Plausibility window applied to every decoded sample
    pub limits: SampleLimits,
    /// Reads per `read_once` before giving up
    pub max_read_attempts: u32,
    /// Run the stop + identify handshake on connect
    pub handshake: bool,
    /// How long the handshake waits for an identity reply
    pub handshake_timeout: Duration,
    /// Bytes requested per stream read
    pub chunk_size: usize,
    pub codec: CodecOptions,
}

impl SessionConfig {
    /// Defaults for a device family on a link
    pub fn new(kind: DeviceKind, transport: TransportConfig) -> Self {
        Self {
            kind,
            transport,
            limits: SampleLimits::UNBOUNDED,
            max_read_attempts: 5,
            handshake: true,
            handshake_timeout: Duration::from_millis(500),
            chunk_size: 4096,
            codec: CodecOptions::default(),
        }
    }
}

/// One connected LIDAR
pub struct LidarSession {
    config: SessionConfig,
    commands: CommandSet,
    channel: Arc<TransportChannel>,
    /// Present whenever no worker holds it
    decoder: Option<StreamDecoder>,
    worker: Option<ScanWorker>,
    state: StateCell,
    stats: SharedStatistics,
    latest_scan: LatestScan,
    device_info: Option<DeviceInfo>,
    /// Device streaming has been started and not stopped
    streaming: bool,
}

impl LidarSession {
    /// Connect with default session settings
    pub fn connect(kind: DeviceKind, transport: TransportConfig) -> Result<Self> {
        Self::connect_with(SessionConfig::new(kind, transport))
    }

    /// Open the configured link and connect
    pub fn connect_with(config: SessionConfig) -> Result<Self> {
        let channel = TransportChannel::open(&config.transport, config.kind)?;
        Self::establish(config, channel)
    }

    /// Connect over an already-open transport (mock or custom link)
    ///
    /// `config.transport` still supplies the read timeout and must match the
    /// device family's link type.
    pub fn connect_over(config: SessionConfig, transport: Box<dyn Transport>) -> Result<Self> {
        config.transport.check_kind(config.kind)?;
        Self::establish(config, TransportChannel::from_transport(transport))
    }

    fn establish(config: SessionConfig, channel: TransportChannel) -> Result<Self> {
        let mut session = LidarSession {
            commands: CommandSet::for_kind(config.kind),
            decoder: Some(StreamDecoder::new(config.kind, &config.codec)),
            channel: Arc::new(channel),
            worker: None,
            state: StateCell::new(SessionState::Connected),
            stats: SharedStatistics::new(),
            latest_scan: LatestScan::default(),
            device_info: None,
            streaming: false,
            config,
        };

        log::info!(
            "{} connected on {}",
            session.config.kind,
            session.channel.description()
        );
        if session.config.handshake {
            session.handshake();
        }
        Ok(session)
    }

    /// Best-effort stop + identify exchange
    fn handshake(&mut self) {
        let kind = self.config.kind;
        if let Some(stop) = self.commands.stop {
            if let Err(e) = self.channel.write_all(stop) {
                log::warn!("{}: stop command during handshake failed: {}", kind, e);
                return;
            }
        }
        let Some(identify) = self.commands.identify else {
            return;
        };
        if let Err(e) = self.channel.write_all(identify) {
            log::warn!("{}: identify command failed: {}", kind, e);
            return;
        }

        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut reply = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self
                .channel
                .read_with_timeout(self.config.chunk_size, remaining.min(self.config.transport.read_timeout()))
            {
                Ok(bytes) => reply.extend_from_slice(&bytes),
                Err(Error::Timeout) => {}
                Err(e) => {
                    log::warn!("{}: identification read failed: {}", kind, e);
                    break;
                }
            }
            if let Some(info) = protocol::parse_identity(kind, &reply) {
                log::info!("{} identified: {}", kind, info.summary());
                self.device_info = Some(info);
                return;
            }
        }

        if kind.identifies() {
            log::warn!(
                "{}: no identification reply within {:?} ({} bytes received)",
                kind,
                self.config.handshake_timeout,
                reply.len()
            );
        }
    }

    /// Reopen the link after a fault or disconnect
    pub fn reconnect(&mut self) -> Result<()> {
        match self.state() {
            SessionState::Faulted | SessionState::Disconnected => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "reconnect",
                    state,
                });
            }
        }
        self.reap_worker();
        self.channel.close();

        let channel = TransportChannel::open(&self.config.transport, self.config.kind)?;
        self.channel = Arc::new(channel);
        self.decoder = Some(StreamDecoder::new(self.config.kind, &self.config.codec));
        self.streaming = false;
        self.state.set(SessionState::Connected);
        log::info!("{} reconnected on {}", self.config.kind, self.channel.description());

        if self.config.handshake {
            self.handshake();
        }
        Ok(())
    }

    fn require(&self, operation: &'static str, expected: SessionState) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState { operation, state })
        }
    }

    /// Mark the session after a lost link
    ///
    /// A channel released elsewhere leaves the session `Disconnected`; any
    /// other failure is a transport fault.
    fn fault(&self, error: &Error) {
        if matches!(error, Error::Closed) {
            log::warn!("{} channel closed", self.config.kind);
            self.state.set(SessionState::Disconnected);
            return;
        }
        log::error!("{} transport fault: {}", self.config.kind, error);
        self.stats.record_transport_fault(error);
        self.state.set(SessionState::Faulted);
    }

    /// Start device streaming if this family streams
    fn ensure_streaming(&mut self) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        if let Some(start) = self.commands.start {
            if let Err(e) = self.channel.write_all(start) {
                self.fault(&e);
                return Err(e);
            }
        }
        self.streaming = true;
        Ok(())
    }

    /// Read one fresh sample
    ///
    /// The decoder starts clean on every call so nothing carried over from an
    /// earlier read can come back out. Polled families discard whatever is
    /// waiting on the link, send a single-scan request and return the first
    /// sample of the reply that passes the limits. Streaming families decode
    /// the input already pending and return the newest accepted sample,
    /// falling back to blocking reads when nothing is pending.
    pub fn read_once(&mut self) -> Result<RangeSample> {
        self.require("read_once", SessionState::Connected)?;
        let Some(mut decoder) = self.decoder.take() else {
            return Err(Error::InvalidState {
                operation: "read_once",
                state: self.state(),
            });
        };
        decoder.reset();
        let result = self.read_fresh(&mut decoder);
        self.decoder = Some(decoder);
        result
    }

    fn read_fresh(&mut self, decoder: &mut StreamDecoder) -> Result<RangeSample> {
        let datagram = self.channel.is_datagram();
        let mut buffer = vec![0u8; if datagram { 65_536 } else { self.config.chunk_size.max(1) }];

        let polled = self.commands.poll;
        if let Some(poll) = polled {
            // a late reply to an earlier poll must not pass for this one
            self.drain(&mut buffer, None)?;
            if let Err(e) = self.channel.write_all(poll) {
                self.fault(&e);
                return Err(e);
            }
        } else {
            self.ensure_streaming()?;
            if let Some(newest) = self.drain(&mut buffer, Some(&mut *decoder))? {
                return Ok(newest);
            }
        }

        let attempts = self.config.max_read_attempts.max(1);
        let timeout = self.config.transport.read_timeout();
        for _ in 0..attempts {
            let n = match self.channel.read_into(&mut buffer, timeout) {
                Ok(n) => n,
                Err(Error::Timeout) => continue,
                Err(e) => {
                    self.fault(&e);
                    return Err(e);
                }
            };

            let accepted = self.decode(decoder, &buffer[..n]);
            if polled.is_some() {
                if let Some(first) = accepted.first().copied() {
                    // a poll reply is one whole scan
                    let mut frame = ScanFrame::with_capacity(accepted.len());
                    accepted.into_iter().for_each(|s| frame.push(s));
                    *self.latest_scan.lock() = Some(frame);
                    return Ok(first);
                }
            } else if let Some(newest) = accepted.last().copied() {
                return Ok(newest);
            }
        }

        log::debug!("{}: no data after {} reads", self.config.kind, attempts);
        Err(Error::NoData { attempts })
    }

    /// Empty the input the link already holds
    ///
    /// With a decoder the pending bytes are decoded and the newest accepted
    /// sample is kept; without one they are thrown away.
    fn drain(
        &mut self,
        buffer: &mut [u8],
        mut decoder: Option<&mut StreamDecoder>,
    ) -> Result<Option<RangeSample>> {
        let mut newest = None;
        let mut discarded = 0usize;
        for _ in 0..MAX_DRAIN_READS {
            let n = match self.channel.read_into(buffer, DRAIN_TIMEOUT) {
                Ok(n) => n,
                Err(Error::Timeout) => break,
                Err(e) => {
                    self.fault(&e);
                    return Err(e);
                }
            };
            match decoder.as_deref_mut() {
                Some(decoder) => {
                    if let Some(last) = self.decode(decoder, &buffer[..n]).last() {
                        newest = Some(*last);
                    }
                }
                None => discarded += n,
            }
        }
        if discarded > 0 {
            log::debug!("{}: discarded {} stale bytes", self.config.kind, discarded);
        }
        Ok(newest)
    }

    fn decode(&self, decoder: &mut StreamDecoder, bytes: &[u8]) -> Vec<RangeSample> {
        let now = monotonic_seconds();
        let batch = if self.channel.is_datagram() {
            decoder.push_datagram(bytes, now)
        } else {
            decoder.push(bytes, now)
        };
        scheduler::accept_batch(batch, &self.config.limits, &self.stats)
    }

    /// Stream samples to `callback` on a background worker
    ///
    /// The callback runs on the worker thread, in decode order, and only sees
    /// samples that pass the limits.
    pub fn start_scan<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(&RangeSample) + Send + 'static,
    {
        self.require("start_scan", SessionState::Connected)?;
        self.ensure_streaming()?;

        let decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => StreamDecoder::new(self.config.kind, &self.config.codec),
        };
        let ctx = ScanContext {
            kind: self.config.kind,
            channel: Arc::clone(&self.channel),
            decoder,
            limits: self.config.limits,
            read_timeout: self.config.transport.read_timeout(),
            chunk_size: self.config.chunk_size,
            stats: self.stats.clone(),
            state: self.state.clone(),
            latest_scan: Arc::clone(&self.latest_scan),
        };

        self.state.set(SessionState::Scanning);
        match AcquisitionScheduler::spawn(ctx, callback) {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.decoder = Some(StreamDecoder::new(self.config.kind, &self.config.codec));
                self.state.set(SessionState::Connected);
                Err(e)
            }
        }
    }

    /// Stream samples into a bounded queue
    ///
    /// When the consumer falls behind, the newest samples are dropped.
    pub fn start_scan_queued(&mut self, capacity: usize) -> Result<Receiver<RangeSample>> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let kind = self.config.kind;
        let mut dropped: u64 = 0;
        self.start_scan(move |sample| match tx.try_send(*sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                if dropped.is_power_of_two() {
                    log::warn!("{}: scan queue full, {} samples dropped", kind, dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        })?;
        Ok(rx)
    }

    /// Join a finished or stopping worker and take its decoder back
    fn reap_worker(&mut self) -> Option<Result<()>> {
        let worker = self.worker.take()?;
        worker.request_stop();
        let result = match worker.join() {
            Ok(mut decoder) => {
                decoder.reset();
                self.decoder = Some(decoder);
                Ok(())
            }
            Err(e) => {
                log::error!("{} scan worker panicked", self.config.kind);
                self.decoder = Some(StreamDecoder::new(self.config.kind, &self.config.codec));
                self.state.set(SessionState::Faulted);
                Err(e)
            }
        };
        Some(result)
    }

    /// Stop the background worker and device streaming
    ///
    /// Returns within one read timeout. A worker that already hit a transport
    /// fault is reaped and the session stays `Faulted`.
    pub fn stop_scan(&mut self) -> Result<()> {
        let Some(result) = self.reap_worker() else {
            return Ok(());
        };
        result?;

        // a faulted or externally closed link keeps its state
        if matches!(self.state(), SessionState::Scanning | SessionState::Connected) {
            if let Some(stop) = self.commands.stop {
                if let Err(e) = self.channel.write_all(stop) {
                    log::warn!("{}: stop command failed: {}", self.config.kind, e);
                }
            }
            self.streaming = false;
            self.state.transition(SessionState::Scanning, SessionState::Connected);
        }
        Ok(())
    }

    /// Stop everything and release the link; never fails
    pub fn disconnect(&mut self) {
        if self.state() == SessionState::Disconnected && self.worker.is_none() {
            return;
        }
        if let Err(e) = self.stop_scan() {
            log::warn!("{}: stop during disconnect failed: {}", self.config.kind, e);
        }
        if self.streaming && self.state() == SessionState::Connected {
            if let Some(stop) = self.commands.stop {
                if let Err(e) = self.channel.write_all(stop) {
                    log::warn!("{}: stop command during disconnect failed: {}", self.config.kind, e);
                }
            }
        }
        self.streaming = false;
        self.channel.close();
        self.state.set(SessionState::Disconnected);
        log::info!("{} disconnected", self.config.kind);
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Snapshot of the acquisition counters
    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    /// Shared handle to the transport, closable from any thread
    pub fn channel(&self) -> Arc<TransportChannel> {
        Arc::clone(&self.channel)
    }

    pub fn kind(&self) -> DeviceKind {
        self.config.kind
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identity parsed during the handshake
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Most recent complete revolution (or poll reply)
    pub fn latest_scan(&self) -> Option<ScanFrame> {
        self.latest_scan.lock().clone()
    }

    /// Distance at the sample nearest `angle_deg` in the latest scan
    pub fn distance_at_angle(&self, angle_deg: f64) -> Option<f64> {
        self.latest_scan.lock().as_ref()?.distance_at_angle(angle_deg)
    }

    /// Closest distance per angular bin of the latest scan
    pub fn obstacle_map(&self, resolution_deg: f64) -> Vec<(f64, f64)> {
        self.latest_scan
            .lock()
            .as_ref()
            .map(|scan| scan.obstacle_map(resolution_deg))
            .unwrap_or_default()
    }
}

impl Drop for LidarSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
