//! Range sample and scan types

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;

/// Quality reported for protocols that carry none
pub const SENTINEL_QUALITY: u8 = 255;

/// Angle wrap (degrees backwards) that marks a new revolution
const REVOLUTION_WRAP_DEG: f64 = 180.0;

/// Finest bin width `obstacle_map` will use
pub const MIN_RESOLUTION_DEG: f64 = 0.001;

/// Hard ceiling on samples per assembled frame
const MAX_FRAME_SAMPLES: usize = 16_384;

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds on the process-wide monotonic clock
///
/// All sample and record timestamps share this epoch, so they are directly
/// comparable within one process.
pub fn monotonic_seconds() -> f64 {
    seconds_since_epoch(Instant::now())
}

/// Convert an `Instant` to the monotonic seconds scale
pub fn seconds_since_epoch(at: Instant) -> f64 {
    let epoch = *CLOCK_EPOCH.get_or_init(Instant::now);
    at.saturating_duration_since(epoch).as_secs_f64()
}

/// A single range measurement
///
/// Produced only by a frame codec and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeSample {
    /// Angle in degrees, `[0, 360)`
    pub angle_deg: f64,
    /// Distance in millimetres, `>= 0`
    pub distance_mm: f64,
    /// Signal quality/intensity (0-255)
    pub quality: u8,
    /// Monotonic timestamp in seconds
    pub timestamp: f64,
}

impl RangeSample {
    /// Create a new sample, normalizing the angle into `[0, 360)`
    pub fn new(angle_deg: f64, distance_mm: f64, quality: u8, timestamp: f64) -> Self {
        Self {
            angle_deg: normalize_angle(angle_deg),
            distance_mm: distance_mm.max(0.0),
            quality,
            timestamp,
        }
    }

    /// Convert to Cartesian coordinates (x, y) in millimetres
    pub fn to_cartesian(&self) -> (f64, f64) {
        let rad = self.angle_deg.to_radians();
        (self.distance_mm * rad.cos(), self.distance_mm * rad.sin())
    }
}

/// Normalize an angle into `[0, 360)`
pub fn normalize_angle(angle_deg: f64) -> f64 {
    let a = angle_deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negatives
    if a >= 360.0 { 0.0 } else { a }
}

/// Smallest absolute difference between two angles, in degrees
pub fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Samples captured within one revolution or polling cycle
///
/// Insertion order is receipt order, which is not necessarily sorted by angle.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScanFrame {
    /// Samples in receipt order
    pub samples: Vec<RangeSample>,
    /// Timestamp of the first sample
    pub started_at: f64,
}

impl ScanFrame {
    /// Create a new empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Create frame with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            started_at: 0.0,
        }
    }

    /// Add a sample to the frame
    pub fn push(&mut self, sample: RangeSample) {
        if self.samples.is_empty() {
            self.started_at = sample.timestamp;
        }
        self.samples.push(sample);
    }

    /// Get the number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if frame is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples within a distance range (millimetres, inclusive)
    pub fn samples_in_range(&self, min_mm: f64, max_mm: f64) -> Vec<&RangeSample> {
        self.samples
            .iter()
            .filter(|s| s.distance_mm >= min_mm && s.distance_mm <= max_mm)
            .collect()
    }

    /// Sample whose angle is closest to `angle_deg`
    pub fn closest_to(&self, angle_deg: f64) -> Option<&RangeSample> {
        let target = normalize_angle(angle_deg);
        self.samples.iter().min_by(|a, b| {
            angular_distance(a.angle_deg, target).total_cmp(&angular_distance(b.angle_deg, target))
        })
    }

    /// Distance of the sample closest to `angle_deg`
    pub fn distance_at_angle(&self, angle_deg: f64) -> Option<f64> {
        self.closest_to(angle_deg).map(|s| s.distance_mm)
    }

    /// Closest distance per angular bin, sorted by bin angle
    ///
    /// Bins are centred on multiples of `resolution_deg` (at least
    /// [`MIN_RESOLUTION_DEG`]); the bin at 360° folds into 0°. Only occupied
    /// bins are stored.
    pub fn obstacle_map(&self, resolution_deg: f64) -> Vec<(f64, f64)> {
        if resolution_deg <= 0.0 || !resolution_deg.is_finite() {
            return Vec::new();
        }
        let resolution_deg = resolution_deg.max(MIN_RESOLUTION_DEG);
        let bin_count = (360.0 / resolution_deg).round().max(1.0) as u64;
        let mut bins: BTreeMap<u64, f64> = BTreeMap::new();

        for sample in &self.samples {
            let idx = (sample.angle_deg / resolution_deg).round() as u64 % bin_count;
            bins.entry(idx)
                .and_modify(|d| *d = d.min(sample.distance_mm))
                .or_insert(sample.distance_mm);
        }

        bins.into_iter()
            .map(|(i, d)| (i as f64 * resolution_deg, d))
            .collect()
    }
}

/// Groups a sample stream into revolutions
///
/// A revolution ends when the angle wraps backwards by more than half a turn.
#[derive(Debug, Default)]
pub struct ScanAssembler {
    current: ScanFrame,
    last_angle: Option<f64>,
}

impl ScanAssembler {
    /// Create a new assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample; returns the finished frame when this sample starts a new one
    pub fn push(&mut self, sample: RangeSample) -> Option<ScanFrame> {
        let wrapped = self
            .last_angle
            .is_some_and(|last| last - sample.angle_deg > REVOLUTION_WRAP_DEG);
        let full = self.current.len() >= MAX_FRAME_SAMPLES;

        let finished = if (wrapped || full) && !self.current.is_empty() {
            Some(std::mem::take(&mut self.current))
        } else {
            None
        };

        self.current.push(sample);
        self.last_angle = Some(sample.angle_deg);
        finished
    }

    /// Samples accumulated in the unfinished frame
    pub fn pending(&self) -> usize {
        self.current.len()
    }
}

/// Physical plausibility window applied after decoding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct SampleLimits {
    /// Accepted angle window `(min, max)` in degrees; `min > max` wraps through 0°
    pub angle_limits: (f64, f64),
    /// Accepted distance window `(min, max)` in millimetres
    pub range_limits_mm: (f64, f64),
}

impl SampleLimits {
    /// Accept everything
    pub const UNBOUNDED: SampleLimits = SampleLimits {
        angle_limits: (0.0, 360.0),
        range_limits_mm: (0.0, f64::MAX),
    };

    /// Whether a sample falls within both windows
    pub fn accepts(&self, sample: &RangeSample) -> bool {
        let (min_a, max_a) = self.angle_limits;
        let angle_ok = if min_a <= max_a {
            sample.angle_deg >= min_a && sample.angle_deg <= max_a
        } else {
            sample.angle_deg >= min_a || sample.angle_deg <= max_a
        };
        let (min_d, max_d) = self.range_limits_mm;
        angle_ok && sample.distance_mm >= min_d && sample.distance_mm <= max_d
    }
}

impl Default for SampleLimits {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}
