//! Background acquisition: scan worker thread and shared statistics

use crate::codec::{DecodeBatch, StreamDecoder};
use crate::error::{DecodeFault, Error, Result};
use crate::transport::TransportChannel;
use crate::types::{monotonic_seconds, DeviceKind, RangeSample, SampleLimits, ScanAssembler, ScanFrame};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Delivered samples between statistics summaries
const SUMMARY_INTERVAL: u64 = 1000;

/// Largest datagram a UDP LIDAR can send
const MAX_DATAGRAM: usize = 65_536;

/// Lifecycle of a LIDAR session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connected,
    Scanning,
    Faulted,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connected,
            2 => SessionState::Scanning,
            3 => SessionState::Faulted,
            _ => SessionState::Disconnected,
        }
    }
}

/// Session state shared with the scan worker
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from -> to`; returns false if the state was not `from`
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Acquisition counters
///
/// Every decode outcome is one attempt: a delivered sample, a sample rejected
/// by the limits, a decode fault, or a transport fault. Counters are updated
/// together, so in any snapshot
/// `frames_attempted == frames_succeeded + samples_filtered + decode_faults + transport_faults`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub frames_attempted: u64,
    pub frames_succeeded: u64,
    pub decode_faults: u64,
    pub transport_faults: u64,
    pub samples_filtered: u64,
    /// Most recent fault, decode or transport
    pub last_error: Option<String>,
    #[serde(skip)]
    pub last_sample_at: Option<Instant>,
}

impl Statistics {
    /// Time since the last delivered sample
    pub fn last_sample_age(&self) -> Option<Duration> {
        self.last_sample_at.map(|at| at.elapsed())
    }

    /// Decode faults per attempt
    pub fn fault_rate(&self) -> f64 {
        if self.frames_attempted == 0 {
            0.0
        } else {
            self.decode_faults as f64 / self.frames_attempted as f64
        }
    }
}

/// Statistics shared between a session and its worker
#[derive(Debug, Clone, Default)]
pub struct SharedStatistics(Arc<Mutex<Statistics>>);

impl SharedStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decoded batch after filtering
    pub fn record_batch(&self, delivered: usize, filtered: usize, faults: &[DecodeFault]) {
        let mut stats = self.0.lock();
        let (delivered, filtered, faulted) = (delivered as u64, filtered as u64, faults.len() as u64);
        stats.frames_attempted += delivered + filtered + faulted;
        stats.frames_succeeded += delivered;
        stats.samples_filtered += filtered;
        stats.decode_faults += faulted;
        if let Some(fault) = faults.last() {
            stats.last_error = Some(fault.to_string());
        }
        if delivered > 0 {
            stats.last_sample_at = Some(Instant::now());
        }
    }

    /// Record a lost link
    pub fn record_transport_fault(&self, error: &Error) {
        let mut stats = self.0.lock();
        stats.frames_attempted += 1;
        stats.transport_faults += 1;
        stats.last_error = Some(error.to_string());
    }

    /// Consistent copy of the counters
    pub fn snapshot(&self) -> Statistics {
        self.0.lock().clone()
    }
}

/// Most recent complete revolution
pub type LatestScan = Arc<Mutex<Option<ScanFrame>>>;

/// Split a batch by the limits, record it, and return the accepted samples
pub(crate) fn accept_batch(
    batch: DecodeBatch,
    limits: &SampleLimits,
    stats: &SharedStatistics,
) -> Vec<RangeSample> {
    for fault in &batch.faults {
        log::debug!("Decode fault: {}", fault);
    }
    let total = batch.samples.len();
    let accepted: Vec<RangeSample> = batch
        .samples
        .into_iter()
        .filter(|s| limits.accepts(s))
        .collect();
    stats.record_batch(accepted.len(), total - accepted.len(), &batch.faults);
    accepted
}

/// Everything a scan worker owns or shares
pub struct ScanContext {
    pub kind: DeviceKind,
    pub channel: Arc<TransportChannel>,
    pub decoder: StreamDecoder,
    pub limits: SampleLimits,
    pub read_timeout: Duration,
    pub chunk_size: usize,
    pub stats: SharedStatistics,
    pub state: StateCell,
    pub latest_scan: LatestScan,
}

/// Handle to a running scan worker
pub struct ScanWorker {
    handle: JoinHandle<StreamDecoder>,
    stop: Arc<AtomicBool>,
}

impl ScanWorker {
    /// Ask the worker to exit after its current read
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and take back its decoder
    pub fn join(self) -> Result<StreamDecoder> {
        self.handle.join().map_err(|_| Error::ThreadPanic)
    }
}

/// Spawns scan workers
pub struct AcquisitionScheduler;

impl AcquisitionScheduler {
    /// Start a named worker delivering samples to `callback` in decode order
    pub fn spawn<F>(ctx: ScanContext, callback: F) -> Result<ScanWorker>
    where
        F: FnMut(&RangeSample) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("lidar-{}", ctx.kind))
            .spawn(move || run(ctx, stop_flag, callback))?;
        Ok(ScanWorker { handle, stop })
    }
}

fn run<F>(ctx: ScanContext, stop: Arc<AtomicBool>, mut callback: F) -> StreamDecoder
where
    F: FnMut(&RangeSample),
{
    let ScanContext {
        kind,
        channel,
        mut decoder,
        limits,
        read_timeout,
        chunk_size,
        stats,
        state,
        latest_scan,
    } = ctx;

    let datagram = channel.is_datagram();
    let mut buffer = vec![0u8; if datagram { MAX_DATAGRAM } else { chunk_size.max(1) }];
    let mut assembler = ScanAssembler::new();
    let mut delivered: u64 = 0;

    log::info!("{} scan worker started on {}", kind, channel.description());

    while !stop.load(Ordering::SeqCst) {
        let n = match channel.read_into(&mut buffer, read_timeout) {
            Ok(n) => n,
            Err(Error::Timeout) => continue,
            Err(_) if stop.load(Ordering::SeqCst) => break,
            Err(Error::Closed) => {
                // another holder of the channel released the link
                log::warn!("{} channel closed during scan", kind);
                state.transition(SessionState::Scanning, SessionState::Disconnected);
                return decoder;
            }
            Err(e) => {
                log::error!("{} transport fault on {}: {}", kind, channel.description(), e);
                stats.record_transport_fault(&e);
                state.set(SessionState::Faulted);
                return decoder;
            }
        };

        let now = monotonic_seconds();
        let batch = if datagram {
            decoder.push_datagram(&buffer[..n], now)
        } else {
            decoder.push(&buffer[..n], now)
        };

        for sample in accept_batch(batch, &limits, &stats) {
            log::trace!(
                "{:.2} deg {:.0} mm q{}",
                sample.angle_deg,
                sample.distance_mm,
                sample.quality
            );
            if let Some(frame) = assembler.push(sample) {
                *latest_scan.lock() = Some(frame);
            }
            callback(&sample);

            delivered += 1;
            if delivered % SUMMARY_INTERVAL == 0 {
                let s = stats.snapshot();
                log::debug!(
                    "{}: {} samples delivered, {} decode faults ({:.2}% fault rate)",
                    kind,
                    s.frames_succeeded,
                    s.decode_faults,
                    s.fault_rate() * 100.0
                );
            }
        }
    }

    state.transition(SessionState::Scanning, SessionState::Connected);
    log::info!("{} scan worker stopped after {} samples", kind, delivered);
    decoder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecOptions;
    use crate::error::FaultKind;
    use crate::transport::MockTransport;

    fn context(mock: &MockTransport, limits: SampleLimits) -> (ScanContext, SharedStatistics, StateCell, LatestScan) {
        let stats = SharedStatistics::new();
        let state = StateCell::new(SessionState::Scanning);
        let latest = LatestScan::default();
        let ctx = ScanContext {
            kind: DeviceKind::GenericSerial,
            channel: Arc::new(TransportChannel::from_transport(Box::new(mock.clone()))),
            decoder: StreamDecoder::new(DeviceKind::GenericSerial, &CodecOptions::default()),
            limits,
            read_timeout: Duration::from_millis(20),
            chunk_size: 256,
            stats: stats.clone(),
            state: state.clone(),
            latest_scan: Arc::clone(&latest),
        };
        (ctx, stats, state, latest)
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_state_transitions() {
        let cell = StateCell::new(SessionState::Connected);
        assert!(cell.transition(SessionState::Connected, SessionState::Scanning));
        assert!(!cell.transition(SessionState::Connected, SessionState::Faulted));
        assert_eq!(cell.get(), SessionState::Scanning);
    }

    #[test]
    fn test_worker_filters_and_delivers_in_order() {
        let mock = MockTransport::new();
        let limits = SampleLimits {
            angle_limits: (0.0, 180.0),
            range_limits_mm: (0.0, 10_000.0),
        };
        let (ctx, stats, state, latest) = context(&mock, limits);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let worker = AcquisitionScheduler::spawn(ctx, move |s| sink.lock().push(s.angle_deg)).unwrap();
        mock.push_read(b"10,100\n200,100\n20,100\nbad\n350,100\n");
        mock.push_read(b"30,100\n");
        wait_for(|| seen.lock().len() == 3);

        worker.request_stop();
        worker.join().unwrap();
        assert_eq!(*seen.lock(), vec![10.0, 20.0, 30.0]);

        let s = stats.snapshot();
        assert_eq!(s.frames_succeeded, 3);
        assert_eq!(s.samples_filtered, 2);
        assert_eq!(s.decode_faults, 1);
        assert_eq!(s.frames_attempted, 6);
        assert_eq!(state.get(), SessionState::Connected);
        assert!(latest.lock().is_none());
    }

    #[test]
    fn test_transport_fault_ends_worker_faulted() {
        let mock = MockTransport::new();
        let (ctx, stats, state, _) = context(&mock, SampleLimits::UNBOUNDED);
        let worker = AcquisitionScheduler::spawn(ctx, |_| {}).unwrap();

        mock.push_read(b"1,100\n");
        mock.push_fault("device unplugged");
        wait_for(|| worker.is_finished());

        worker.join().unwrap();
        assert_eq!(state.get(), SessionState::Faulted);
        let s = stats.snapshot();
        assert_eq!(s.transport_faults, 1);
        assert_eq!(s.frames_succeeded, 1);
        assert!(s.last_error.unwrap().contains("unplugged"));
    }

    #[test]
    fn test_external_close_ends_worker_disconnected() {
        let mock = MockTransport::new();
        let (ctx, stats, state, _) = context(&mock, SampleLimits::UNBOUNDED);
        let channel = Arc::clone(&ctx.channel);
        let worker = AcquisitionScheduler::spawn(ctx, |_| {}).unwrap();

        assert!(channel.close());
        wait_for(|| worker.is_finished());
        worker.join().unwrap();
        assert_eq!(state.get(), SessionState::Disconnected);
        assert_eq!(stats.snapshot().transport_faults, 0);
        assert_eq!(mock.shutdown_count(), 1);
    }

    #[test]
    fn test_revolutions_reach_latest_scan() {
        let mock = MockTransport::new();
        let (ctx, _, _, latest) = context(&mock, SampleLimits::UNBOUNDED);
        let worker = AcquisitionScheduler::spawn(ctx, |_| {}).unwrap();

        mock.push_read(b"0,100\n120,200\n240,300\n359,400\n1,500\n");
        wait_for(|| latest.lock().is_some());
        worker.request_stop();
        worker.join().unwrap();

        let frame = latest.lock().clone().unwrap();
        assert_eq!(frame.len(), 4);
        assert_eq!(frame.distance_at_angle(120.0), Some(200.0));
    }

    #[test]
    fn test_batch_accounting() {
        let stats = SharedStatistics::new();
        let faults = vec![DecodeFault::new(FaultKind::ParseError, "x")];
        stats.record_batch(5, 2, &faults);
        stats.record_transport_fault(&Error::TransportFault("gone".into()));
        let s = stats.snapshot();
        assert_eq!(s.frames_attempted, 9);
        assert_eq!(
            s.frames_attempted,
            s.frames_succeeded + s.samples_filtered + s.decode_faults + s.transport_faults
        );
        assert!(s.last_sample_age().is_some());
    }
}
