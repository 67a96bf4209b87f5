//! Joint camera + LIDAR capture
//!
//! The orchestrator owns at most one camera and one LIDAR. Each tick tries
//! both legs independently and joins the outcome into one [`CaptureRecord`];
//! a failing leg never aborts the other.
//!
//! # Threading
//!
//! `run_continuous` starts one `capture-loop` thread. Ticks are scheduled at
//! `start + n * interval`, so a slow tick does not push later ticks back.
//! `stop()` (or a [`StopHandle`] from any thread) wakes the loop immediately
//! instead of waiting out the current sleep.

pub mod camera;
pub mod detect;
pub mod record;

pub use camera::{CameraInfo, CameraKind, CameraSource, Frame};
pub use detect::{
    detect_hardware, detect_hardware_in, CameraCandidate, DetectedHardware, LidarCandidate,
};
pub use record::{CameraResult, CaptureRecord, LidarResult};

use crate::error::{Error, Result};
use crate::lidar::{LidarSession, SessionConfig, Statistics};
use crate::types::{monotonic_seconds, RangeSample, ScanFrame};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A LIDAR the orchestrator can sample
pub trait LidarSource: Send {
    /// One fresh sample
    fn read_once(&mut self) -> Result<RangeSample>;

    /// Most recent complete revolution, if the source keeps one
    fn latest_scan(&self) -> Option<ScanFrame>;

    fn statistics(&self) -> Statistics;

    /// Release the device; never fails
    fn disconnect(&mut self);
}

impl LidarSource for LidarSession {
    fn read_once(&mut self) -> Result<RangeSample> {
        LidarSession::read_once(self)
    }

    fn latest_scan(&self) -> Option<ScanFrame> {
        LidarSession::latest_scan(self)
    }

    fn statistics(&self) -> Statistics {
        LidarSession::statistics(self)
    }

    fn disconnect(&mut self) {
        LidarSession::disconnect(self)
    }
}

/// Receives `Error::Degraded` from the capture loop
pub type DegradedMonitor = Arc<dyn Fn(&Error) + Send + Sync>;

/// Orchestrator behaviour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    /// Consecutive total-failure ticks per degraded report (0 disables)
    pub degraded_threshold: u32,
    /// Largest accepted camera/LIDAR time difference within one record
    pub skew_tolerance: Option<Duration>,
    /// Put the latest revolution into each LIDAR result
    pub attach_scan: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            degraded_threshold: 3,
            skew_tolerance: None,
            attach_scan: false,
        }
    }
}

/// Cumulative capture counters
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatistics {
    pub ticks: u64,
    pub images_captured: u64,
    pub lidar_samples: u64,
    /// Error entries across all records
    pub errors: u64,
    /// Current run of ticks where no attached leg succeeded
    pub consecutive_failures: u32,
    pub degraded_events: u64,
    #[serde(skip)]
    pub started_at: Instant,
}

impl CaptureStatistics {
    fn new() -> Self {
        Self {
            ticks: 0,
            images_captured: 0,
            lidar_samples: 0,
            errors: 0,
            consecutive_failures: 0,
            degraded_events: 0,
            started_at: Instant::now(),
        }
    }

    pub fn runtime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn per_second(&self, count: u64) -> f64 {
        let secs = self.runtime().as_secs_f64();
        if secs > 0.0 { count as f64 / secs } else { 0.0 }
    }

    /// Images per second
    pub fn image_rate(&self) -> f64 {
        self.per_second(self.images_captured)
    }

    /// LIDAR samples per second
    pub fn sample_rate(&self) -> f64 {
        self.per_second(self.lidar_samples)
    }

    /// Error entries per tick
    pub fn error_rate(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.errors as f64 / self.ticks as f64
        }
    }
}

/// State shared with the capture loop
struct Rig {
    camera: Mutex<Option<Box<dyn CameraSource>>>,
    lidar: Mutex<Option<Box<dyn LidarSource>>>,
    stats: Mutex<CaptureStatistics>,
    monitor: Mutex<Option<DegradedMonitor>>,
    options: CaptureOptions,
}

impl Rig {
    fn capture_once(&self) -> CaptureRecord {
        let timestamp = monotonic_seconds();
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let mut errors = Vec::new();

        let camera = self.camera.lock().as_mut().map(|camera| match camera.capture_frame() {
            Ok(frame) => CameraResult::captured(frame),
            Err(e) => {
                errors.push(format!("camera: {}", e));
                CameraResult::failed()
            }
        });

        let lidar = self.lidar.lock().as_mut().map(|lidar| match lidar.read_once() {
            Ok(sample) => {
                let mut result = LidarResult::measured(sample);
                if self.options.attach_scan {
                    result.scan = lidar.latest_scan();
                }
                result
            }
            Err(e) => {
                errors.push(format!("lidar: {}", e));
                LidarResult::failed()
            }
        });

        let skew_s = match (&camera, &lidar) {
            (Some(c), Some(l)) => l.timestamp.zip(c.captured_at).map(|(l, c)| l - c),
            _ => None,
        };
        if let (Some(skew), Some(tolerance)) = (skew_s, self.options.skew_tolerance) {
            if skew.abs() > tolerance.as_secs_f64() {
                errors.push(format!(
                    "skew: {:.3}s between camera and lidar exceeds {:.3}s",
                    skew,
                    tolerance.as_secs_f64()
                ));
            }
        }

        let record = CaptureRecord {
            timestamp,
            wall_time,
            camera,
            lidar,
            skew_s,
            errors,
        };
        self.account(&record);
        record
    }

    fn account(&self, record: &CaptureRecord) {
        let degraded = {
            let mut stats = self.stats.lock();
            stats.ticks += 1;
            stats.errors += record.errors.len() as u64;
            if record.camera_ok() {
                stats.images_captured += 1;
            }
            if record.lidar_ok() {
                stats.lidar_samples += 1;
            }

            if record.total_failure() {
                stats.consecutive_failures += 1;
                let threshold = self.options.degraded_threshold;
                if threshold > 0 && stats.consecutive_failures % threshold == 0 {
                    stats.degraded_events += 1;
                    Some(stats.consecutive_failures)
                } else {
                    None
                }
            } else {
                stats.consecutive_failures = 0;
                None
            }
        };

        for e in &record.errors {
            log::debug!("Tick fault: {}", e);
        }

        if let Some(consecutive) = degraded {
            let error = Error::Degraded { consecutive };
            log::warn!("{}", error);
            let monitor = self.monitor.lock().clone();
            if let Some(monitor) = monitor {
                monitor(&error);
            }
        }
    }
}

/// Stops a running capture loop from any thread
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.wake.try_send(());
    }
}

struct CaptureLoop {
    handle: JoinHandle<()>,
    control: StopHandle,
}

/// Pairs a camera and a LIDAR and runs joint capture
pub struct CaptureOrchestrator {
    rig: Arc<Rig>,
    capture_loop: Option<CaptureLoop>,
}

impl CaptureOrchestrator {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            rig: Arc::new(Rig {
                camera: Mutex::new(None),
                lidar: Mutex::new(None),
                stats: Mutex::new(CaptureStatistics::new()),
                monitor: Mutex::new(None),
                options,
            }),
            capture_loop: None,
        }
    }

    pub fn options(&self) -> CaptureOptions {
        self.rig.options
    }

    /// Attach a camera, disconnecting any previous one
    pub fn attach_camera<C: CameraSource + 'static>(&self, camera: C) {
        let info = camera.info();
        log::info!(
            "Camera attached: {} {}x{} @ {:.1} fps ({})",
            info.kind,
            info.width,
            info.height,
            info.fps,
            info.backend
        );
        if let Some(mut old) = self.rig.camera.lock().replace(Box::new(camera)) {
            old.disconnect();
        }
    }

    /// Attach a LIDAR, disconnecting any previous one
    pub fn attach_lidar<L: LidarSource + 'static>(&self, lidar: L) {
        if let Some(mut old) = self.rig.lidar.lock().replace(Box::new(lidar)) {
            old.disconnect();
        }
    }

    /// Connect a LIDAR session and attach it
    pub fn setup_lidar(&self, config: SessionConfig) -> Result<()> {
        let session = LidarSession::connect_with(config)?;
        self.attach_lidar(session);
        Ok(())
    }

    /// Hook called with `Error::Degraded`; runs on the capture thread
    pub fn set_monitor<F>(&self, monitor: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.rig.monitor.lock() = Some(Arc::new(monitor));
    }

    /// Capture one joined record now
    pub fn capture_once(&self) -> CaptureRecord {
        self.rig.capture_once()
    }

    /// Capture every `interval` on a background thread
    ///
    /// Runs until `stop()` or, when `duration` is set, until `n * interval`
    /// reaches it. `on_record` runs on the capture thread.
    pub fn run_continuous<F>(
        &mut self,
        interval: Duration,
        duration: Option<Duration>,
        on_record: F,
    ) -> Result<StopHandle>
    where
        F: FnMut(CaptureRecord) + Send + 'static,
    {
        if interval.is_zero() {
            return Err(Error::InvalidParameter("capture interval must be > 0".into()));
        }
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.reap();

        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let control = StopHandle {
            stop: Arc::new(AtomicBool::new(false)),
            wake: wake_tx,
        };
        let rig = Arc::clone(&self.rig);
        let stop = Arc::clone(&control.stop);

        let handle = thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || capture_loop(rig, interval, duration, stop, wake_rx, on_record))?;

        self.capture_loop = Some(CaptureLoop {
            handle,
            control: control.clone(),
        });
        Ok(control)
    }

    /// Handle for stopping the running loop from another thread
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.capture_loop.as_ref().map(|l| l.control.clone())
    }

    pub fn is_running(&self) -> bool {
        self.capture_loop
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    /// Stop the loop and wait for it; returns within one tick
    pub fn stop(&mut self) {
        if let Some(capture_loop) = &self.capture_loop {
            capture_loop.control.stop();
        }
        self.reap();
    }

    /// Wait for the loop to end on its own (duration or a stop handle)
    pub fn wait(&mut self) -> Result<()> {
        match self.capture_loop.take() {
            Some(capture_loop) => capture_loop.handle.join().map_err(|_| Error::ThreadPanic),
            None => Ok(()),
        }
    }

    fn reap(&mut self) {
        if let Some(capture_loop) = self.capture_loop.take() {
            if capture_loop.handle.join().is_err() {
                log::error!("Capture loop panicked");
            }
        }
    }

    pub fn statistics(&self) -> CaptureStatistics {
        self.rig.stats.lock().clone()
    }

    /// Counters of the attached LIDAR
    pub fn lidar_statistics(&self) -> Option<Statistics> {
        self.rig.lidar.lock().as_ref().map(|l| l.statistics())
    }

    /// Stop capturing and release both devices
    pub fn cleanup(&mut self) {
        self.stop();
        if let Some(mut camera) = self.rig.camera.lock().take() {
            camera.disconnect();
        }
        if let Some(mut lidar) = self.rig.lidar.lock().take() {
            lidar.disconnect();
        }

        let stats = self.statistics();
        if stats.ticks > 0 {
            log::info!(
                "Capture finished: {} ticks, {} images, {} lidar samples, {} errors in {:.1}s",
                stats.ticks,
                stats.images_captured,
                stats.lidar_samples,
                stats.errors,
                stats.runtime().as_secs_f64()
            );
        }
    }
}

impl Default for CaptureOrchestrator {
    fn default() -> Self {
        Self::new(CaptureOptions::default())
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn capture_loop<F>(
    rig: Arc<Rig>,
    interval: Duration,
    duration: Option<Duration>,
    stop: Arc<AtomicBool>,
    wake: Receiver<()>,
    mut on_record: F,
) where
    F: FnMut(CaptureRecord),
{
    let start = Instant::now();
    let mut tick: u32 = 0;
    log::info!(
        "Capture loop started: every {:?}, {}",
        interval,
        duration.map_or("unbounded".to_string(), |d| format!("for {:?}", d))
    );

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let offset = interval.saturating_mul(tick);
        if duration.is_some_and(|d| offset >= d) {
            break;
        }

        let target = start + offset;
        let now = Instant::now();
        if target > now {
            match wake.recv_timeout(target - now) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if stop.load(Ordering::SeqCst) {
                break;
            }
        }

        on_record(rig.capture_once());
        tick += 1;

        // more than a whole interval late: resume at the latest boundary
        let elapsed = start.elapsed();
        let due = (elapsed.as_nanos() / interval.as_nanos()) as u32;
        if due > tick {
            log::warn!("Capture loop behind schedule, skipping {} tick(s)", due - tick);
            tick = due;
        }
    }

    log::info!("Capture loop stopped after {} ticks", tick);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct StubCamera {
        fail: bool,
    }

    impl CameraSource for StubCamera {
        fn capture_frame(&mut self) -> Result<Frame> {
            if self.fail {
                return Err(Error::Camera("no frame".into()));
            }
            Ok(Frame {
                width: 2,
                height: 2,
                channels: 1,
                data: vec![0; 4],
                captured_at: monotonic_seconds(),
            })
        }

        fn info(&self) -> CameraInfo {
            CameraInfo {
                kind: CameraKind::Usb,
                width: 2,
                height: 2,
                fps: 30.0,
                backend: "stub".into(),
            }
        }

        fn disconnect(&mut self) {}
    }

    struct StubLidar {
        fail: bool,
        lag: f64,
    }

    impl LidarSource for StubLidar {
        fn read_once(&mut self) -> Result<RangeSample> {
            if self.fail {
                return Err(Error::NoData { attempts: 1 });
            }
            Ok(RangeSample::new(10.0, 500.0, 90, monotonic_seconds() + self.lag))
        }

        fn latest_scan(&self) -> Option<ScanFrame> {
            None
        }

        fn statistics(&self) -> Statistics {
            Statistics::default()
        }

        fn disconnect(&mut self) {}
    }

    #[test]
    fn test_skew_judged_only_with_tolerance() {
        let orchestrator = CaptureOrchestrator::default();
        orchestrator.attach_camera(StubCamera { fail: false });
        orchestrator.attach_lidar(StubLidar { fail: false, lag: 0.5 });
        let record = orchestrator.capture_once();
        assert!(record.skew_s.unwrap() > 0.4);
        assert!(record.errors.is_empty());

        let orchestrator = CaptureOrchestrator::new(CaptureOptions {
            skew_tolerance: Some(Duration::from_millis(100)),
            ..CaptureOptions::default()
        });
        orchestrator.attach_camera(StubCamera { fail: false });
        orchestrator.attach_lidar(StubLidar { fail: false, lag: 0.5 });
        let record = orchestrator.capture_once();
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].starts_with("skew:"));
    }

    #[test]
    fn test_degraded_reported_every_threshold() {
        let orchestrator = CaptureOrchestrator::default();
        orchestrator.attach_camera(StubCamera { fail: true });
        orchestrator.attach_lidar(StubLidar { fail: true, lag: 0.0 });
        let reports = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&reports);
        orchestrator.set_monitor(move |e| {
            assert!(matches!(e, Error::Degraded { .. }));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..7 {
            let record = orchestrator.capture_once();
            assert_eq!(record.errors.len(), 2);
        }
        assert_eq!(reports.load(Ordering::SeqCst), 2);
        let stats = orchestrator.statistics();
        assert_eq!(stats.consecutive_failures, 7);
        assert_eq!(stats.degraded_events, 2);
        assert_eq!(stats.errors, 14);
    }

    #[test]
    fn test_one_good_leg_resets_failure_run() {
        let orchestrator = CaptureOrchestrator::default();
        orchestrator.attach_camera(StubCamera { fail: true });
        orchestrator.attach_lidar(StubLidar { fail: false, lag: 0.0 });
        orchestrator.capture_once();
        let stats = orchestrator.statistics();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.lidar_samples, 1);
        assert_eq!(stats.images_captured, 0);
        assert_eq!(stats.error_rate(), 1.0);
    }

    #[test]
    fn test_second_loop_rejected_and_stop_is_prompt() {
        let mut orchestrator = CaptureOrchestrator::default();
        orchestrator.attach_lidar(StubLidar { fail: false, lag: 0.0 });
        orchestrator
            .run_continuous(Duration::from_secs(10), None, |_| {})
            .unwrap();
        assert!(matches!(
            orchestrator.run_continuous(Duration::from_secs(1), None, |_| {}),
            Err(Error::AlreadyRunning)
        ));

        let started = Instant::now();
        orchestrator.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!orchestrator.is_running());
        assert!(orchestrator.statistics().ticks <= 1);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut orchestrator = CaptureOrchestrator::default();
        assert!(matches!(
            orchestrator.run_continuous(Duration::ZERO, None, |_| {}),
            Err(Error::InvalidParameter(_))
        ));
    }
}
