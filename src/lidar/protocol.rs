//! Per-family command sets and identification replies

use crate::codec::cola::{ETX, STX};
use crate::types::DeviceKind;
use serde::Serialize;

/// Commands a session sends to a device family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSet {
    /// Request device identity
    pub identify: Option<&'static [u8]>,
    /// Start continuous streaming
    pub start: Option<&'static [u8]>,
    /// Stop streaming
    pub stop: Option<&'static [u8]>,
    /// Request exactly one scan
    pub poll: Option<&'static [u8]>,
}

/// Reply descriptor preceding the 20-byte info block (RPLidar and YDLidar)
const INFO_DESCRIPTOR: [u8; 7] = [0xA5, 0x5A, 0x14, 0x00, 0x00, 0x00, 0x04];
const INFO_LEN: usize = 20;

impl CommandSet {
    /// Commands for a device family
    pub fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::RPLidar => CommandSet {
                identify: Some(&[0xA5, 0x50]),
                // express scan, legacy mode
                start: Some(&[0xA5, 0x82, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x22]),
                stop: Some(&[0xA5, 0x25]),
                poll: None,
            },
            DeviceKind::YDLidar => CommandSet {
                identify: Some(&[0xA5, 0x90]),
                start: Some(&[0xA5, 0x60]),
                stop: Some(&[0xA5, 0x65]),
                poll: None,
            },
            DeviceKind::HokuyoURG => CommandSet {
                identify: Some(b"SCIP2.0\nVV\n"),
                start: Some(b"MD0044072501000\n"),
                stop: Some(b"QT\n"),
                poll: Some(b"BM\nGD0044072501\n"),
            },
            DeviceKind::SickTiM => CommandSet {
                identify: Some(b"\x02sRN DeviceIdent\x03"),
                start: Some(b"\x02sEN LMDscandata 1\x03"),
                stop: Some(b"\x02sEN LMDscandata 0\x03"),
                poll: Some(b"\x02sRN LMDscandata\x03"),
            },
            DeviceKind::GenericSerial | DeviceKind::GenericUDP => CommandSet {
                identify: None,
                start: None,
                stop: None,
                poll: None,
            },
        }
    }
}

/// Identity reported by the device during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub hardware: Option<String>,
    pub serial_number: Option<String>,
    /// Vendor string or other free text
    pub description: Option<String>,
}

impl DeviceInfo {
    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            ("model", &self.model),
            ("firmware", &self.firmware),
            ("hardware", &self.hardware),
            ("serial", &self.serial_number),
            ("vendor", &self.description),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}={}", label, v)))
        .collect();
        parts.join(" ")
    }
}

/// Parse whatever identification reply the handshake collected
pub fn parse_identity(kind: DeviceKind, reply: &[u8]) -> Option<DeviceInfo> {
    match kind {
        DeviceKind::RPLidar | DeviceKind::YDLidar => parse_info_block(kind, reply),
        DeviceKind::HokuyoURG => parse_scip_version(reply),
        DeviceKind::SickTiM => parse_cola_ident(reply),
        DeviceKind::GenericSerial | DeviceKind::GenericUDP => None,
    }
}

fn parse_info_block(kind: DeviceKind, reply: &[u8]) -> Option<DeviceInfo> {
    let at = reply
        .windows(INFO_DESCRIPTOR.len())
        .position(|w| w == INFO_DESCRIPTOR)?;
    let block = reply.get(at + INFO_DESCRIPTOR.len()..at + INFO_DESCRIPTOR.len() + INFO_LEN)?;

    let (firmware, serial) = if kind == DeviceKind::RPLidar {
        let serial: String = block[4..].iter().map(|b| format!("{:02X}", b)).collect();
        (format!("{}.{:02}", block[2], block[1]), serial)
    } else {
        let serial: String = block[4..].iter().map(|b| char::from(b'0' + b % 10)).collect();
        (format!("{}.{}", block[2], block[1]), serial)
    };

    Some(DeviceInfo {
        model: Some(format!("0x{:02X}", block[0])),
        firmware: Some(firmware),
        hardware: Some(block[3].to_string()),
        serial_number: Some(serial),
        description: None,
    })
}

fn parse_scip_version(reply: &[u8]) -> Option<DeviceInfo> {
    let text = String::from_utf8_lossy(reply);
    let field = |tag: &str| {
        text.lines().find_map(|line| {
            let value = line.strip_prefix(tag)?;
            // drop ";<checksum>"
            let value = value.rsplit_once(';').map_or(value, |(v, _)| v);
            Some(value.trim().to_string())
        })
    };

    let info = DeviceInfo {
        model: field("PROD:"),
        firmware: field("FIRM:"),
        hardware: None,
        serial_number: field("SERI:"),
        description: field("VEND:"),
    };
    (info != DeviceInfo::default()).then_some(info)
}

fn parse_cola_ident(reply: &[u8]) -> Option<DeviceInfo> {
    let start = reply.iter().position(|&b| b == STX)?;
    let len = reply[start + 1..].iter().position(|&b| b == ETX)?;
    let body = String::from_utf8_lossy(&reply[start + 1..start + 1 + len]);
    let tokens: Vec<&str> = body.split(' ').filter(|t| !t.is_empty()).collect();

    match tokens.as_slice() {
        ["sRA", "DeviceIdent", _, model, _, firmware, ..] => Some(DeviceInfo {
            model: Some(model.to_string()),
            firmware: Some(firmware.to_string()),
            ..DeviceInfo::default()
        }),
        ["sRA", "DeviceIdent", _, model] => Some(DeviceInfo {
            model: Some(model.to_string()),
            ..DeviceInfo::default()
        }),
        _ => None,
    }
}
