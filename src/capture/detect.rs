//! Best-effort hardware probe
//!
//! Nothing is opened here: device nodes are listed and USB descriptors are
//! matched against known LIDAR vendors. A candidate without an inferred kind
//! is still worth showing to the operator.

use super::camera::CameraKind;
use crate::types::DeviceKind;
use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::fs;
use std::path::Path;

/// Hokuyo Automatic
const VID_HOKUYO: u16 = 0x15d1;
/// Silicon Labs CP210x bridge, shipped with RPLidar A-series adapters
const VID_SILABS: u16 = 0x10c4;
const PID_CP210X: u16 = 0xea60;

/// A camera device node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraCandidate {
    pub device: String,
    pub kind: CameraKind,
}

/// A port that may have a LIDAR behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LidarCandidate {
    /// Port path
    pub transport: String,
    pub kind: Option<DeviceKind>,
    /// USB manufacturer / product strings, when known
    pub description: Option<String>,
}

/// Result of a probe
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectedHardware {
    pub cameras: Vec<CameraCandidate>,
    pub lidars: Vec<LidarCandidate>,
}

/// Guess the device family from USB descriptors
pub fn infer_kind(
    vid: u16,
    pid: u16,
    manufacturer: Option<&str>,
    product: Option<&str>,
) -> Option<DeviceKind> {
    let text = format!(
        "{} {}",
        manufacturer.unwrap_or_default(),
        product.unwrap_or_default()
    )
    .to_ascii_lowercase();

    if vid == VID_HOKUYO || text.contains("hokuyo") {
        Some(DeviceKind::HokuyoURG)
    } else if text.contains("ydlidar") {
        Some(DeviceKind::YDLidar)
    } else if text.contains("rplidar") || text.contains("slamtec") {
        Some(DeviceKind::RPLidar)
    } else if vid == VID_SILABS && pid == PID_CP210X {
        Some(DeviceKind::RPLidar)
    } else {
        None
    }
}

/// Probe `/dev` and the serial port enumerator
pub fn detect_hardware() -> DetectedHardware {
    let mut found = detect_hardware_in(Path::new("/dev"));
    match serialport::available_ports() {
        Ok(ports) => merge_ports(&mut found.lidars, ports),
        Err(e) => log::debug!("Serial port enumeration failed: {}", e),
    }
    log::info!(
        "Hardware probe: {} camera(s), {} LIDAR candidate(s)",
        found.cameras.len(),
        found.lidars.len()
    );
    found
}

/// List camera and serial device nodes under `dev_root`
pub fn detect_hardware_in(dev_root: &Path) -> DetectedHardware {
    let mut found = DetectedHardware::default();
    let entries = match fs::read_dir(dev_root) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot list {}: {}", dev_root.display(), e);
            return found;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path().to_string_lossy().into_owned();
        if name.starts_with("video") {
            found.cameras.push(CameraCandidate {
                device: path,
                kind: CameraKind::Usb,
            });
        } else if name.starts_with("ttyUSB") {
            found.lidars.push(LidarCandidate {
                transport: path,
                kind: None,
                description: None,
            });
        } else if name.starts_with("ttyACM") {
            // URG scanners enumerate as CDC-ACM
            found.lidars.push(LidarCandidate {
                transport: path,
                kind: Some(DeviceKind::HokuyoURG),
                description: None,
            });
        }
    }

    found.cameras.sort_by(|a, b| a.device.cmp(&b.device));
    found.lidars.sort_by(|a, b| a.transport.cmp(&b.transport));
    found
}

/// Fold enumerated USB serial ports into the node list
///
/// USB descriptors override the node-name guess; ports not seen under the
/// device root are added.
pub fn merge_ports(lidars: &mut Vec<LidarCandidate>, ports: Vec<SerialPortInfo>) {
    for port in ports {
        let SerialPortType::UsbPort(usb) = port.port_type else {
            continue;
        };
        let kind = infer_kind(
            usb.vid,
            usb.pid,
            usb.manufacturer.as_deref(),
            usb.product.as_deref(),
        );
        let description = match (usb.manufacturer, usb.product) {
            (Some(m), Some(p)) => Some(format!("{} {}", m, p)),
            (m, p) => m.or(p),
        };

        match lidars.iter_mut().find(|c| c.transport == port.port_name) {
            Some(candidate) => {
                if kind.is_some() {
                    candidate.kind = kind;
                }
                candidate.description = description.or(candidate.description.take());
            }
            None => lidars.push(LidarCandidate {
                transport: port.port_name,
                kind,
                description,
            }),
        }
    }
    lidars.sort_by(|a, b| a.transport.cmp(&b.transport));
}
