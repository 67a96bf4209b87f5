//! LIDAR device families

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported LIDAR device families
///
/// Selects both the transport variant and the frame codec. The choice is made
/// once at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Slamtec RPLidar A-series (express scan capsules)
    #[serde(rename = "rplidar", alias = "rp_lidar")]
    RPLidar,
    /// YDLidar X/G series
    #[serde(rename = "ydlidar", alias = "yd_lidar")]
    YDLidar,
    /// Hokuyo URG over SCIP 2.0
    #[serde(rename = "hokuyo_urg")]
    HokuyoURG,
    /// SICK TiM over Ethernet (CoLa-A)
    #[serde(rename = "sick_tim")]
    SickTiM,
    /// Text records over a serial line
    #[serde(rename = "generic_serial")]
    GenericSerial,
    /// Text records in UDP datagrams
    #[serde(rename = "generic_udp")]
    GenericUDP,
}

/// Physical link a device family talks over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Serial,
    Udp,
    Tcp,
}

impl DeviceKind {
    /// All device families
    pub const ALL: [DeviceKind; 6] = [
        DeviceKind::RPLidar,
        DeviceKind::YDLidar,
        DeviceKind::HokuyoURG,
        DeviceKind::SickTiM,
        DeviceKind::GenericSerial,
        DeviceKind::GenericUDP,
    ];

    /// Configuration name (`rplidar`, `hokuyo_urg`, ...)
    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::RPLidar => "rplidar",
            DeviceKind::YDLidar => "ydlidar",
            DeviceKind::HokuyoURG => "hokuyo_urg",
            DeviceKind::SickTiM => "sick_tim",
            DeviceKind::GenericSerial => "generic_serial",
            DeviceKind::GenericUDP => "generic_udp",
        }
    }

    /// Link used by this family
    pub fn link(self) -> LinkKind {
        match self {
            DeviceKind::SickTiM => LinkKind::Tcp,
            DeviceKind::GenericUDP => LinkKind::Udp,
            _ => LinkKind::Serial,
        }
    }

    /// Usual factory baud rate for serial families
    pub fn default_baud_rate(self) -> Option<u32> {
        match self {
            DeviceKind::RPLidar => Some(115_200),
            DeviceKind::YDLidar => Some(128_000),
            DeviceKind::HokuyoURG => Some(115_200),
            DeviceKind::GenericSerial => Some(115_200),
            DeviceKind::SickTiM | DeviceKind::GenericUDP => None,
        }
    }

    /// Usual factory port for network families
    pub fn default_network_port(self) -> Option<u16> {
        match self {
            DeviceKind::SickTiM => Some(2111),
            DeviceKind::GenericUDP => Some(2368),
            _ => None,
        }
    }

    /// Whether a silent device during identification is expected
    pub fn identifies(self) -> bool {
        !matches!(self, DeviceKind::GenericSerial | DeviceKind::GenericUDP)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "rplidar" | "rp_lidar" => Ok(DeviceKind::RPLidar),
            "ydlidar" | "yd_lidar" => Ok(DeviceKind::YDLidar),
            "hokuyo_urg" | "hokuyo" | "urg" => Ok(DeviceKind::HokuyoURG),
            "sick_tim" | "sick" | "tim" => Ok(DeviceKind::SickTiM),
            "generic_serial" | "serial" => Ok(DeviceKind::GenericSerial),
            "generic_udp" | "udp" => Ok(DeviceKind::GenericUDP),
            _ => Err(Error::InvalidParameter(format!("unknown LIDAR kind: {}", s))),
        }
    }
}
