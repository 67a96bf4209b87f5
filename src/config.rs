//! Configuration for the Drishti-IO daemon
//!
//! One TOML file describes the LIDAR, its link, and the capture loop:
//!
//! ```toml
//! [lidar]
//! kind = "rplidar"
//! read_timeout_ms = 100
//! range_limits_mm = [150.0, 12000.0]
//!
//! [lidar.serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [capture]
//! interval_ms = 1000
//! duration_ms = 60000
//! ```

use crate::capture::CaptureOptions;
use crate::codec::{CodecOptions, ScipGeometry};
use crate::error::{Error, Result};
use crate::lidar::SessionConfig;
use crate::transport::{
    NetworkConfig, Parity, SerialConfig, StopBits, TransportConfig, SUPPORTED_BAUD_RATES,
};
use crate::types::{DeviceKind, LinkKind, SampleLimits};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AcquisitionConfig {
    pub lidar: LidarConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LIDAR device and session settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LidarConfig {
    pub kind: DeviceKind,
    /// Upper bound on one blocking read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Reads per single-shot measurement
    #[serde(default = "default_max_read_attempts")]
    pub max_read_attempts: u32,
    /// Identify the device on connect
    #[serde(default = "default_handshake")]
    pub handshake: bool,
    /// Accepted angle window in degrees; `min > max` wraps through 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle_limits: Option<(f64, f64)>,
    /// Accepted distance window in millimetres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_limits_mm: Option<(f64, f64)>,
    /// Bytes requested per stream read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<SerialSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSection>,
    /// Hokuyo step geometry (URG-04LX when omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scip: Option<ScipGeometry>,
}

/// `[lidar.serial]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SerialSection {
    pub port: String,
    /// Factory rate of the device family when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
}

/// `[lidar.network]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkSection {
    pub host: String,
    /// Factory port of the device family when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Local UDP port to listen on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// `[capture]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interval_ms: u64,
    /// Unbounded when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Consecutive total failures per degraded report
    pub degraded_threshold: u32,
    /// Largest camera/LIDAR skew before a record is flagged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skew_tolerance_ms: Option<u64>,
    pub attach_scan: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            duration_ms: None,
            degraded_threshold: 3,
            skew_tolerance_ms: None,
            attach_scan: false,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_read_timeout_ms() -> u64 {
    100
}

fn default_max_read_attempts() -> u32 {
    5
}

fn default_handshake() -> bool {
    true
}

fn default_chunk_size() -> usize {
    4096
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

impl AcquisitionConfig {
    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AcquisitionConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Check everything a connect or capture would trip over later
    pub fn validate(&self) -> Result<()> {
        let lidar = &self.lidar;
        let kind = lidar.kind;

        match (kind.link(), &lidar.serial, &lidar.network) {
            (_, Some(_), Some(_)) => {
                return Err(Error::Config(
                    "[lidar] takes either a serial or a network section, not both".into(),
                ));
            }
            (LinkKind::Serial, Some(serial), None) => {
                let baud = serial.baud_rate.or(kind.default_baud_rate()).unwrap_or(0);
                if !SUPPORTED_BAUD_RATES.contains(&baud) {
                    return Err(Error::Config(format!("unsupported baud rate {}", baud)));
                }
            }
            (LinkKind::Tcp | LinkKind::Udp, None, Some(network)) => {
                if network.port.or(kind.default_network_port()).is_none() {
                    return Err(Error::Config(format!("{} needs [lidar.network] port", kind)));
                }
            }
            (LinkKind::Serial, _, _) => {
                return Err(Error::Config(format!("{} needs a [lidar.serial] section", kind)));
            }
            (LinkKind::Tcp | LinkKind::Udp, _, _) => {
                return Err(Error::Config(format!("{} needs a [lidar.network] section", kind)));
            }
        }

        if let Some((min, max)) = lidar.angle_limits {
            let in_circle = |a: f64| (0.0..=360.0).contains(&a);
            if !in_circle(min) || !in_circle(max) {
                return Err(Error::Config(format!(
                    "angle_limits ({}, {}) outside 0..360",
                    min, max
                )));
            }
        }
        if let Some((min, max)) = lidar.range_limits_mm {
            if !(min >= 0.0 && min <= max) {
                return Err(Error::Config(format!(
                    "range_limits_mm ({}, {}) must satisfy 0 <= min <= max",
                    min, max
                )));
            }
        }

        if lidar.read_timeout_ms == 0 {
            return Err(Error::Config("read_timeout_ms must be > 0".into()));
        }
        if lidar.max_read_attempts == 0 {
            return Err(Error::Config("max_read_attempts must be > 0".into()));
        }
        if lidar.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be > 0".into()));
        }
        if self.capture.interval_ms == 0 {
            return Err(Error::Config("capture interval_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Link parameters for the configured device
    pub fn transport_config(&self) -> Result<TransportConfig> {
        let lidar = &self.lidar;
        let read_timeout = Duration::from_millis(lidar.read_timeout_ms);

        if let Some(serial) = &lidar.serial {
            let baud_rate = serial
                .baud_rate
                .or(lidar.kind.default_baud_rate())
                .ok_or_else(|| Error::Config(format!("{} has no default baud rate", lidar.kind)))?;
            return Ok(TransportConfig::Serial(SerialConfig {
                port: serial.port.clone(),
                baud_rate,
                parity: serial.parity,
                stop_bits: serial.stop_bits,
                read_timeout,
            }));
        }
        if let Some(network) = &lidar.network {
            let port = network
                .port
                .or(lidar.kind.default_network_port())
                .ok_or_else(|| Error::Config(format!("{} needs a network port", lidar.kind)))?;
            return Ok(TransportConfig::Network(NetworkConfig {
                host: network.host.clone(),
                port,
                local_port: network.local_port,
                read_timeout,
                connect_timeout: Duration::from_millis(network.connect_timeout_ms),
            }));
        }
        Err(Error::Config("[lidar] has no serial or network section".into()))
    }

    /// Runtime session settings
    pub fn session_config(&self) -> Result<SessionConfig> {
        let lidar = &self.lidar;
        let mut session = SessionConfig::new(lidar.kind, self.transport_config()?);
        let unbounded = SampleLimits::UNBOUNDED;
        session.limits = SampleLimits {
            angle_limits: lidar.angle_limits.unwrap_or(unbounded.angle_limits),
            range_limits_mm: lidar.range_limits_mm.unwrap_or(unbounded.range_limits_mm),
        };
        session.max_read_attempts = lidar.max_read_attempts;
        session.handshake = lidar.handshake;
        session.chunk_size = lidar.chunk_size;
        session.codec = CodecOptions {
            scip: lidar.scip.unwrap_or_default(),
            ..CodecOptions::default()
        };
        Ok(session)
    }

    /// Runtime orchestrator settings
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            degraded_threshold: self.capture.degraded_threshold,
            skew_tolerance: self.capture.skew_tolerance_ms.map(Duration::from_millis),
            attach_scan: self.capture.attach_scan,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.capture.interval_ms)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.capture.duration_ms.map(Duration::from_millis)
    }
}

impl Default for AcquisitionConfig {
    /// RPLidar on the first USB serial adapter
    fn default() -> Self {
        Self {
            lidar: LidarConfig {
                kind: DeviceKind::RPLidar,
                read_timeout_ms: default_read_timeout_ms(),
                max_read_attempts: default_max_read_attempts(),
                handshake: default_handshake(),
                angle_limits: None,
                range_limits_mm: None,
                chunk_size: default_chunk_size(),
                serial: Some(SerialSection {
                    port: "/dev/ttyUSB0".to_string(),
                    baud_rate: Some(115_200),
                    parity: Parity::None,
                    stop_bits: StopBits::One,
                }),
                network: None,
                scip: None,
            },
            capture: CaptureConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
