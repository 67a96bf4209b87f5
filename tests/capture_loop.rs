//! Orchestrator tests with deterministic camera/LIDAR stand-ins.

use drishti_io::capture::{CameraInfo, CameraKind, CameraSource, Frame, LidarSource};
use drishti_io::types::monotonic_seconds;
use drishti_io::{
    CaptureOptions, CaptureOrchestrator, CaptureRecord, DeviceKind, Error, LidarSession,
    MockTransport, RangeSample, Result, ScanFrame, SerialConfig, SessionConfig, Statistics,
    TransportConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct FakeCamera {
    fail: bool,
}

impl CameraSource for FakeCamera {
    fn capture_frame(&mut self) -> Result<Frame> {
        if self.fail {
            return Err(Error::Camera("device busy".into()));
        }
        Ok(Frame {
            width: 640,
            height: 480,
            channels: 3,
            data: vec![0; 640 * 480 * 3],
            captured_at: monotonic_seconds(),
        })
    }

    fn info(&self) -> CameraInfo {
        CameraInfo {
            kind: CameraKind::Usb,
            width: 640,
            height: 480,
            fps: 30.0,
            backend: "fake".into(),
        }
    }

    fn disconnect(&mut self) {}
}

struct FakeLidar;

impl LidarSource for FakeLidar {
    fn read_once(&mut self) -> Result<RangeSample> {
        Ok(RangeSample::new(180.0, 2500.0, 120, monotonic_seconds()))
    }

    fn latest_scan(&self) -> Option<ScanFrame> {
        None
    }

    fn statistics(&self) -> Statistics {
        Statistics::default()
    }

    fn disconnect(&mut self) {}
}

fn collect(records: &Arc<Mutex<Vec<CaptureRecord>>>) -> impl FnMut(CaptureRecord) + Send + 'static {
    let sink = Arc::clone(records);
    move |record| sink.lock().push(record)
}

#[test]
fn test_bounded_run_produces_evenly_spaced_records() {
    let mut orchestrator = CaptureOrchestrator::default();
    orchestrator.attach_camera(FakeCamera { fail: false });
    orchestrator.attach_lidar(FakeLidar);

    let records = Arc::new(Mutex::new(Vec::new()));
    let interval = Duration::from_millis(200);
    orchestrator
        .run_continuous(interval, Some(Duration::from_secs(1)), collect(&records))
        .unwrap();
    orchestrator.wait().unwrap();
    assert!(!orchestrator.is_running());

    let records = records.lock();
    assert_eq!(records.len(), 5);
    for pair in records.windows(2) {
        let gap = pair[1].timestamp - pair[0].timestamp;
        assert!((gap - 0.2).abs() < 0.08, "gap {}", gap);
    }
    // drift correction keeps the last tick near 4 intervals after the first
    let span = records[4].timestamp - records[0].timestamp;
    assert!((span - 0.8).abs() < 0.08, "span {}", span);
    assert!(records.iter().all(|r| r.camera_ok() && r.lidar_ok() && r.errors.is_empty()));
    assert_eq!(orchestrator.statistics().ticks, 5);
}

#[test]
fn test_camera_failure_does_not_touch_lidar_leg() {
    let orchestrator = CaptureOrchestrator::default();
    orchestrator.attach_camera(FakeCamera { fail: true });
    orchestrator.attach_lidar(FakeLidar);

    let record = orchestrator.capture_once();
    let camera = record.camera.as_ref().unwrap();
    let lidar = record.lidar.as_ref().unwrap();
    assert!(!camera.success);
    assert!(lidar.success);
    assert_eq!(lidar.angle, Some(180.0));
    assert_eq!(record.errors.len(), 1);
    assert!(record.errors[0].starts_with("camera:"));
    assert_eq!(record.skew_s, None);

    let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
    assert_eq!(json["camera"]["success"], false);
    assert_eq!(json["lidar"]["distance"], 2500.0);
    assert_eq!(json["lidar"]["quality"], 120);
}

#[test]
fn test_degraded_monitor_does_not_stop_the_loop() {
    let mut orchestrator = CaptureOrchestrator::new(CaptureOptions {
        degraded_threshold: 3,
        ..CaptureOptions::default()
    });
    orchestrator.attach_camera(FakeCamera { fail: true });

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    orchestrator.set_monitor(move |e| {
        if let Error::Degraded { consecutive } = e {
            sink.lock().push(*consecutive);
        }
    });

    let records = Arc::new(Mutex::new(Vec::new()));
    orchestrator
        .run_continuous(
            Duration::from_millis(50),
            Some(Duration::from_millis(350)),
            collect(&records),
        )
        .unwrap();
    orchestrator.wait().unwrap();

    assert_eq!(records.lock().len(), 7);
    assert_eq!(*reports.lock(), vec![3, 6]);
}

#[test]
fn test_stop_handle_from_another_thread() {
    let mut orchestrator = CaptureOrchestrator::default();
    orchestrator.attach_lidar(FakeLidar);
    let records = Arc::new(Mutex::new(Vec::new()));
    let stop = orchestrator
        .run_continuous(Duration::from_millis(50), None, collect(&records))
        .unwrap();

    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(120));
        stop.stop();
    });
    orchestrator.wait().unwrap();
    let ticks = records.lock().len();
    assert!((2..=4).contains(&ticks), "{} ticks", ticks);
}

#[test]
fn test_session_as_lidar_leg() {
    let mock = MockTransport::new();
    let mut serial = SerialConfig::new("/dev/drishti-mock", 115_200);
    serial.read_timeout = Duration::from_millis(20);
    let mut config = SessionConfig::new(DeviceKind::GenericSerial, TransportConfig::Serial(serial));
    config.handshake = false;
    let session = LidarSession::connect_over(config, Box::new(mock.clone())).unwrap();

    let mut orchestrator = CaptureOrchestrator::default();
    orchestrator.attach_lidar(session);

    mock.push_read(b"270.5,3300,77\n");
    let record = orchestrator.capture_once();
    assert!(record.camera.is_none());
    let lidar = record.lidar.unwrap();
    assert!(lidar.success);
    assert_eq!(lidar.angle, Some(270.5));

    let record = orchestrator.capture_once();
    assert!(record.errors[0].starts_with("lidar: No LIDAR data"));
    assert_eq!(orchestrator.lidar_statistics().unwrap().frames_succeeded, 1);

    orchestrator.cleanup();
    assert_eq!(mock.shutdown_count(), 1);
    orchestrator.cleanup();
    assert_eq!(mock.shutdown_count(), 1);
    assert!(orchestrator.lidar_statistics().is_none());
}
