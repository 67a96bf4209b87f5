//! RPLidar express-scan capsule codec
//!
//! Capsule layout (84 bytes):
//! - Byte 0: `0xA` in the high nibble, checksum low nibble in the low nibble
//! - Byte 1: `0x5` in the high nibble, checksum high nibble in the low nibble
//! - Bytes 2-3: start angle, q6 degrees in bits 0-14, start flag in bit 15
//! - Bytes 4-83: 16 cabins of 5 bytes (`d1: u16 LE`, `d2: u16 LE`, `offsets`)
//!
//! The checksum is the XOR of bytes 2..84. Sample angles inside a capsule are
//! interpolated toward the start angle of the *next* capsule, so a capsule is
//! emitted only once its successor has arrived intact.

use super::{Decoded, FrameCodec};
use crate::error::FaultKind;
use crate::types::RangeSample;

/// Capsule length in bytes
pub const CAPSULE_LEN: usize = 84;

/// Response descriptor sent once after the express-scan request
pub const EXPRESS_DESCRIPTOR: [u8; 7] = [0xA5, 0x5A, 0x54, 0x00, 0x00, 0x40, 0x82];

/// Quality reported for valid express samples
pub const EXPRESS_QUALITY: u8 = 188;

const CABINS: usize = 16;
const SAMPLES_PER_CAPSULE: f64 = 32.0;

#[derive(Debug, Clone)]
struct Capsule {
    start_deg: f64,
    cabins: [Cabin; CABINS],
}

#[derive(Debug, Clone, Copy, Default)]
struct Cabin {
    distance_1: u16,
    distance_2: u16,
    offsets: u8,
}

impl Cabin {
    /// Distances (q2 raw) paired with their 6-bit angle compensation
    fn samples(&self) -> [(u16, u8); 2] {
        let off1 = (self.offsets & 0x0F) | (((self.distance_1 & 0x03) as u8) << 4);
        let off2 = (self.offsets >> 4) | (((self.distance_2 & 0x03) as u8) << 4);
        [(self.distance_1, off1), (self.distance_2, off2)]
    }
}

/// Sign-extend a 6-bit q3 angle compensation into degrees
fn compensation_deg(raw: u8) -> f64 {
    let raw = (raw & 0x3F) as i8;
    let signed = if raw & 0x20 != 0 { raw - 64 } else { raw };
    signed as f64 / 8.0
}

/// Express-scan decoder
#[derive(Debug, Default)]
pub struct RpLidarCodec {
    previous: Option<Capsule>,
    resyncing: bool,
}

impl RpLidarCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_capsule(frame: &[u8]) -> Result<Capsule, (u8, u8)> {
        let expected = (frame[0] & 0x0F) | ((frame[1] & 0x0F) << 4);
        let actual = frame[2..CAPSULE_LEN].iter().fold(0u8, |acc, b| acc ^ b);
        if expected != actual {
            return Err((expected, actual));
        }

        let start_q6 = u16::from_le_bytes([frame[2], frame[3]]) & 0x7FFF;
        let mut cabins = [Cabin::default(); CABINS];
        for (i, cabin) in cabins.iter_mut().enumerate() {
            let base = 4 + i * 5;
            *cabin = Cabin {
                distance_1: u16::from_le_bytes([frame[base], frame[base + 1]]),
                distance_2: u16::from_le_bytes([frame[base + 2], frame[base + 3]]),
                offsets: frame[base + 4],
            };
        }

        Ok(Capsule {
            start_deg: start_q6 as f64 / 64.0,
            cabins,
        })
    }

    /// Samples of `capsule`, interpolated toward `next_start_deg`
    fn emit(capsule: &Capsule, next_start_deg: f64, now: f64) -> Vec<RangeSample> {
        let mut span = next_start_deg - capsule.start_deg;
        if span < 0.0 {
            span += 360.0;
        }
        let step = span / SAMPLES_PER_CAPSULE;

        let mut out = Vec::with_capacity(CABINS * 2);
        for (i, cabin) in capsule.cabins.iter().enumerate() {
            for (j, (raw, offset)) in cabin.samples().into_iter().enumerate() {
                let distance_mm = (raw >> 2) as f64;
                if distance_mm == 0.0 {
                    continue;
                }
                let index = (i * 2 + j) as f64;
                let angle = capsule.start_deg + step * index - compensation_deg(offset);
                out.push(RangeSample::new(angle, distance_mm, EXPRESS_QUALITY, now));
            }
        }
        out
    }
}

impl FrameCodec for RpLidarCodec {
    fn feed(&mut self, buf: &[u8], now: f64) -> Decoded {
        // Descriptor (possibly still arriving)
        let prefix = buf.len().min(EXPRESS_DESCRIPTOR.len());
        if buf[..prefix] == EXPRESS_DESCRIPTOR[..prefix] {
            if prefix < EXPRESS_DESCRIPTOR.len() {
                return Decoded::incomplete();
            }
            return Decoded::skip(EXPRESS_DESCRIPTOR.len());
        }

        // Skip to the next sync candidate
        let sync = buf
            .windows(2)
            .position(|w| w[0] >> 4 == 0xA && w[1] >> 4 == 0x5);
        let Some(sync_idx) = sync else {
            // keep a lone trailing 0xA? byte, it may start a capsule
            let keep = usize::from(buf.last().is_some_and(|b| b >> 4 == 0xA));
            let skip = buf.len() - keep;
            return if skip == 0 {
                Decoded::incomplete()
            } else {
                Decoded::skip(skip)
            };
        };
        if sync_idx > 0 {
            return Decoded::skip(sync_idx);
        }

        if buf.len() < CAPSULE_LEN {
            return Decoded::incomplete();
        }

        match Self::parse_capsule(&buf[..CAPSULE_LEN]) {
            Ok(capsule) => {
                self.resyncing = false;
                let samples = match self.previous.replace(capsule.clone()) {
                    Some(prev) => Self::emit(&prev, capsule.start_deg, now),
                    None => Vec::new(),
                };
                Decoded::samples(CAPSULE_LEN, samples)
            }
            Err((expected, actual)) => {
                // the held capsule has no trustworthy successor
                self.previous = None;
                if self.resyncing {
                    Decoded::skip(1)
                } else {
                    self.resyncing = true;
                    Decoded::fault(
                        1,
                        FaultKind::ChecksumError,
                        format!("capsule checksum 0x{:02X}, computed 0x{:02X}", expected, actual),
                    )
                }
            }
        }
    }

    fn reset(&mut self) {
        self.previous = None;
        self.resyncing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_frames::rplidar_capsule;
    use crate::codec::{Codec, StreamDecoder};

    fn decoder() -> StreamDecoder {
        StreamDecoder::with_codec(Codec::RpLidar(RpLidarCodec::new()), 1 << 16)
    }

    #[test]
    fn test_compensation_sign() {
        assert_eq!(compensation_deg(0b000_100), 0.5);
        assert_eq!(compensation_deg(0b111_111), -0.125);
        assert_eq!(compensation_deg(0b100_000), -4.0);
    }

    #[test]
    fn test_capsule_needs_successor() {
        let mut dec = decoder();
        let batch = dec.push(&rplidar_capsule(10.0, 1000, true), 0.0);
        assert!(batch.samples.is_empty());
        assert!(batch.faults.is_empty());

        let batch = dec.push(&rplidar_capsule(20.0, 1200, false), 0.0);
        assert_eq!(batch.samples.len(), 32);
        assert_eq!(batch.samples[0].angle_deg, 10.0);
        assert_eq!(batch.samples[16].angle_deg, 15.0);
        assert!(batch.samples.iter().all(|s| s.distance_mm == 1000.0));
        assert!(batch.samples.iter().all(|s| s.quality == EXPRESS_QUALITY));
    }

    #[test]
    fn test_interpolation_wraps_through_zero() {
        let mut dec = decoder();
        dec.push(&rplidar_capsule(355.0, 800, false), 0.0);
        let batch = dec.push(&rplidar_capsule(3.0, 800, false), 0.0);
        // span is 8 degrees across the wrap
        assert_eq!(batch.samples[16].angle_deg, 359.0);
        assert_eq!(batch.samples[31].angle_deg, 355.0 + 8.0 * 31.0 / 32.0 - 360.0);
    }

    #[test]
    fn test_angle_compensation_applied() {
        let mut capsule = rplidar_capsule(10.0, 1000, false);
        // first cabin: offset nibble 4 on sample 1 (+0.5 deg compensation)
        capsule[8] = 0x04;
        let cs = capsule[2..].iter().fold(0u8, |acc, b| acc ^ b);
        capsule[0] = 0xA0 | (cs & 0x0F);
        capsule[1] = 0x50 | (cs >> 4);

        let mut dec = decoder();
        dec.push(&capsule, 0.0);
        let batch = dec.push(&rplidar_capsule(20.0, 1000, false), 0.0);
        assert_eq!(batch.samples[0].angle_deg, 9.5);
    }

    #[test]
    fn test_zero_distance_dropped() {
        let mut dec = decoder();
        dec.push(&rplidar_capsule(10.0, 0, false), 0.0);
        let batch = dec.push(&rplidar_capsule(20.0, 0, false), 0.0);
        assert!(batch.samples.is_empty());
        assert!(batch.faults.is_empty());
    }

    #[test]
    fn test_corruption_reports_one_checksum_error() {
        let mut stream = Vec::new();
        stream.extend(rplidar_capsule(10.0, 1000, false));
        let mut bad = rplidar_capsule(20.0, 1000, false);
        bad.insert(40, 0x11);
        stream.extend(bad);
        for k in 0..3 {
            stream.extend(rplidar_capsule(30.0 + k as f64 * 10.0, 1000, false));
        }

        let mut dec = decoder();
        let batch = dec.push(&stream, 0.0);
        assert_eq!(batch.faults.len(), 1);
        assert_eq!(batch.faults[0].kind, FaultKind::ChecksumError);
        // first capsule loses its successor, the 30 and 40 degree capsules emit
        assert_eq!(batch.samples.len(), 64);
        assert_eq!(batch.samples[0].angle_deg, 30.0);
    }

    #[test]
    fn test_descriptor_skipped() {
        let mut dec = decoder();
        let batch = dec.push(&EXPRESS_DESCRIPTOR[..3], 0.0);
        assert!(batch.faults.is_empty());
        assert_eq!(dec.buffered(), 3);
        dec.push(&EXPRESS_DESCRIPTOR[3..], 0.0);
        assert_eq!(dec.buffered(), 0);
    }
}
