//! YDLidar sample-packet codec
//!
//! Packet format: [PH (2)] [CT (1)] [LSN (1)] [FSA (2)] [LSA (2)] [CS (2)] [Si (2 × LSN)]
//!
//! All 16-bit fields are little-endian. The checksum is the XOR of the 16-bit
//! words `PH`, `FSA`, `LSA`, `LSN << 8 | CT` and every sample.

use super::{Decoded, FrameCodec};
use crate::error::FaultKind;
use crate::types::{RangeSample, SENTINEL_QUALITY};

/// Packet header
pub const HEADER: [u8; 2] = [0xAA, 0x55];

const HEADER_WORD: u16 = 0x55AA;
const FIXED_LEN: usize = 10;

/// Sample-packet decoder
#[derive(Debug, Default)]
pub struct YdLidarCodec {
    resyncing: bool,
}

impl YdLidarCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }

    fn corrupt(&mut self, detail: String) -> Decoded {
        if self.resyncing {
            Decoded::skip(1)
        } else {
            self.resyncing = true;
            Decoded::fault(1, FaultKind::ChecksumError, detail)
        }
    }
}

fn word(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn angle_deg(raw: u16) -> f64 {
    (raw >> 1) as f64 / 64.0
}

impl FrameCodec for YdLidarCodec {
    fn feed(&mut self, buf: &[u8], now: f64) -> Decoded {
        let Some(sync_idx) = buf.windows(2).position(|w| w == HEADER) else {
            let keep = usize::from(buf.last() == Some(&HEADER[0]));
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
        if buf.len() < FIXED_LEN {
            return Decoded::incomplete();
        }

        let ct = buf[2];
        let lsn = buf[3] as usize;
        let fsa = word(buf, 4);
        let lsa = word(buf, 6);
        let expected = word(buf, 8);

        if lsn == 0 {
            return self.corrupt("empty sample packet".into());
        }
        let total = FIXED_LEN + lsn * 2;
        if buf.len() < total {
            return Decoded::incomplete();
        }

        let raw: Vec<u16> = (0..lsn).map(|i| word(buf, FIXED_LEN + i * 2)).collect();
        let actual = raw.iter().fold(
            HEADER_WORD ^ fsa ^ lsa ^ (((lsn as u16) << 8) | ct as u16),
            |acc, s| acc ^ s,
        );
        if actual != expected {
            return self.corrupt(format!(
                "packet checksum 0x{:04X}, computed 0x{:04X}",
                expected, actual
            ));
        }
        if fsa & 1 == 0 || lsa & 1 == 0 {
            return self.corrupt(format!("angle check bit clear (FSA 0x{:04X}, LSA 0x{:04X})", fsa, lsa));
        }
        self.resyncing = false;

        let first = angle_deg(fsa);
        let mut span = angle_deg(lsa) - first;
        if span < 0.0 {
            span += 360.0;
        }
        let step = if lsn > 1 { span / (lsn - 1) as f64 } else { 0.0 };

        let samples = raw
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != 0)
            .map(|(i, s)| {
                RangeSample::new(first + step * i as f64, *s as f64 / 4.0, SENTINEL_QUALITY, now)
            })
            .collect();

        Decoded::samples(total, samples)
    }

    fn reset(&mut self) {
        self.resyncing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_frames::ydlidar_packet;
    use crate::codec::{Codec, StreamDecoder};

    fn decoder() -> StreamDecoder {
        StreamDecoder::with_codec(Codec::YdLidar(YdLidarCodec::new()), 1 << 16)
    }

    #[test]
    fn test_interpolates_between_fsa_and_lsa() {
        let mut dec = decoder();
        let batch = dec.push(&ydlidar_packet(10.0, 20.0, &[1000, 1100, 0, 1300, 1400, 1500]), 0.5);
        assert!(batch.faults.is_empty());
        assert_eq!(batch.samples.len(), 5);
        assert_eq!(batch.samples[0].angle_deg, 10.0);
        assert_eq!(batch.samples[1].angle_deg, 12.0);
        // zero distance at index 2 is dropped
        assert_eq!(batch.samples[2].angle_deg, 16.0);
        assert_eq!(batch.samples[4].angle_deg, 20.0);
        assert_eq!(batch.samples[4].distance_mm, 1500.0);
        assert_eq!(batch.samples[0].quality, SENTINEL_QUALITY);
        assert_eq!(batch.samples[0].timestamp, 0.5);
    }

    #[test]
    fn test_wraps_through_zero() {
        let mut dec = decoder();
        let batch = dec.push(&ydlidar_packet(358.0, 2.0, &[500, 500, 500]), 0.0);
        let angles: Vec<f64> = batch.samples.iter().map(|s| s.angle_deg).collect();
        assert_eq!(angles, vec![358.0, 0.0, 2.0]);
    }

    #[test]
    fn test_single_sample_packet() {
        let mut dec = decoder();
        let batch = dec.push(&ydlidar_packet(42.0, 42.0, &[750]), 0.0);
        assert_eq!(batch.samples.len(), 1);
        assert_eq!(batch.samples[0].angle_deg, 42.0);
    }

    #[test]
    fn test_corruption_reports_one_checksum_error() {
        let mut stream = ydlidar_packet(0.0, 10.0, &[500, 600, 700]);
        let mut bad = ydlidar_packet(10.0, 20.0, &[500, 600, 700]);
        bad.insert(12, 0x11);
        stream.extend(bad);
        stream.extend(ydlidar_packet(20.0, 30.0, &[500, 600, 700]));
        stream.extend(ydlidar_packet(30.0, 40.0, &[500, 600, 700]));

        let mut dec = decoder();
        let batch = dec.push(&stream, 0.0);
        assert_eq!(batch.faults.len(), 1);
        assert_eq!(batch.faults[0].kind, FaultKind::ChecksumError);
        assert_eq!(batch.samples.len(), 9);
    }

    #[test]
    fn test_waits_for_full_packet() {
        let packet = ydlidar_packet(0.0, 10.0, &[500, 600, 700]);
        let mut dec = decoder();
        assert!(dec.push(&packet[..12], 0.0).samples.is_empty());
        assert_eq!(dec.buffered(), 12);
        assert_eq!(dec.push(&packet[12..], 0.0).samples.len(), 3);
    }
}
