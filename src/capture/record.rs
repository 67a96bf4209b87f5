//! Joined camera + LIDAR capture records

use super::camera::Frame;
use crate::types::{RangeSample, ScanFrame};
use serde::Serialize;

/// Camera leg of one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraResult {
    pub success: bool,
    /// `[height, width, channels]` when a frame was captured
    pub shape: Option<[u32; 3]>,
    /// Monotonic seconds the frame was taken
    pub captured_at: Option<f64>,
    /// Pixel data stays in memory; persistence writes it elsewhere
    #[serde(skip)]
    pub frame: Option<Frame>,
}

impl CameraResult {
    pub fn captured(frame: Frame) -> Self {
        Self {
            success: true,
            shape: Some(frame.shape()),
            captured_at: Some(frame.captured_at),
            frame: Some(frame),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            shape: None,
            captured_at: None,
            frame: None,
        }
    }
}

/// LIDAR leg of one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LidarResult {
    pub success: bool,
    pub angle: Option<f64>,
    pub distance: Option<f64>,
    pub quality: Option<u8>,
    pub timestamp: Option<f64>,
    /// Latest revolution, when the orchestrator attaches scans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanFrame>,
}

impl LidarResult {
    pub fn measured(sample: RangeSample) -> Self {
        Self {
            success: true,
            angle: Some(sample.angle_deg),
            distance: Some(sample.distance_mm),
            quality: Some(sample.quality),
            timestamp: Some(sample.timestamp),
            scan: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            angle: None,
            distance: None,
            quality: None,
            timestamp: None,
            scan: None,
        }
    }
}

/// Everything captured in one tick
///
/// Built fresh for every tick. `timestamp` is taken once when the tick starts,
/// so both legs share it even when one of them failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRecord {
    /// Monotonic seconds at tick entry
    pub timestamp: f64,
    /// Wall-clock seconds since the Unix epoch at tick entry
    pub wall_time: f64,
    /// `None` when no camera is attached
    pub camera: Option<CameraResult>,
    /// `None` when no LIDAR is attached
    pub lidar: Option<LidarResult>,
    /// LIDAR sample time minus camera frame time, when both legs succeeded
    pub skew_s: Option<f64>,
    /// Faults in the order they happened, prefixed by leg
    pub errors: Vec<String>,
}

impl CaptureRecord {
    pub fn camera_ok(&self) -> bool {
        self.camera.as_ref().is_some_and(|c| c.success)
    }

    pub fn lidar_ok(&self) -> bool {
        self.lidar.as_ref().is_some_and(|l| l.success)
    }

    /// No attached leg produced data
    pub fn total_failure(&self) -> bool {
        let attempted = self.camera.is_some() || self.lidar.is_some();
        attempted && !self.camera_ok() && !self.lidar_ok()
    }

    /// Render as one JSON line
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record(camera: Option<CameraResult>, lidar: Option<LidarResult>) -> CaptureRecord {
        CaptureRecord {
            timestamp: 12.5,
            wall_time: 1_700_000_000.0,
            camera,
            lidar,
            skew_s: None,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_json_keeps_persistence_field_names() {
        let frame = Frame {
            width: 4,
            height: 2,
            channels: 3,
            data: vec![0; 24],
            captured_at: 12.5,
        };
        let sample = RangeSample::new(90.0, 1500.0, 47, 12.51);
        let mut rec = record(Some(CameraResult::captured(frame)), Some(LidarResult::measured(sample)));
        rec.errors.push("lidar: late".into());

        let json: Value = serde_json::from_str(&rec.to_json().unwrap()).unwrap();
        assert_eq!(json["timestamp"], 12.5);
        assert_eq!(json["camera"]["success"], true);
        assert_eq!(json["camera"]["shape"], serde_json::json!([2, 4, 3]));
        assert!(json["camera"].get("frame").is_none());
        assert_eq!(json["lidar"]["angle"], 90.0);
        assert_eq!(json["lidar"]["distance"], 1500.0);
        assert_eq!(json["lidar"]["quality"], 47);
        assert!(json["lidar"].get("scan").is_none());
        assert_eq!(json["errors"][0], "lidar: late");
    }

    #[test]
    fn test_total_failure() {
        assert!(record(Some(CameraResult::failed()), Some(LidarResult::failed())).total_failure());
        assert!(record(None, Some(LidarResult::failed())).total_failure());
        assert!(!record(Some(CameraResult::failed()), Some(LidarResult::measured(RangeSample::new(0.0, 1.0, 1, 0.0)))).total_failure());
        assert!(!record(None, None).total_failure());
    }
}
