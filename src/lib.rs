//! Drishti-IO - Synchronized camera + multi-protocol LIDAR acquisition
//!
//! One session API over six LIDAR families (RPLidar, YDLidar, Hokuyo URG,
//! SICK TiM, generic serial text, generic UDP text), a background scan worker
//! per session, and an orchestrator that joins camera frames and LIDAR samples
//! into capture records.
//!
//! ```no_run
//! use drishti_io::{DeviceKind, LidarSession, SerialConfig, TransportConfig};
//!
//! let transport = TransportConfig::Serial(SerialConfig::new("/dev/ttyUSB0", 115_200));
//! let mut session = LidarSession::connect(DeviceKind::RPLidar, transport)?;
//! session.start_scan(|sample| println!("{:.1} deg {:.0} mm", sample.angle_deg, sample.distance_mm))?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! session.stop_scan()?;
//! # Ok::<(), drishti_io::Error>(())
//! ```

pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod lidar;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use capture::{CaptureOptions, CaptureOrchestrator, CaptureRecord};
pub use config::AcquisitionConfig;
pub use error::{Error, FaultKind, Result};
pub use lidar::{LidarSession, SessionConfig, SessionState, Statistics};
pub use transport::{MockTransport, NetworkConfig, SerialConfig, TransportConfig};
pub use types::{DeviceKind, RangeSample, SampleLimits, ScanFrame};
