//! SICK CoLa-A telegram codec
//!
//! Telegrams are ASCII between STX (0x02) and ETX (0x03). Only scan data
//! telegrams (`sRA LMDscandata` poll replies and `sSN LMDscandata` stream
//! events) produce samples; every other telegram is consumed silently.
//!
//! Scan data layout (token indices):
//! - 0-17: command, version, device and status words, counters, frequencies
//! - 18: encoder count `n`, followed by `2n` encoder tokens
//! - then the 16-bit channel count, each channel being
//!   `name scale offset start_angle step count values...`
//! - then the 8-bit channel count with the same channel layout

use super::{Decoded, FrameCodec};
use crate::error::FaultKind;
use crate::types::{RangeSample, SENTINEL_QUALITY};

/// Start of telegram
pub const STX: u8 = 0x02;
/// End of telegram
pub const ETX: u8 = 0x03;

/// Default telegram size ceiling
pub const DEFAULT_MAX_TELEGRAM: usize = 16 * 1024;

const ENCODER_COUNT_INDEX: usize = 18;

/// One measurement channel of a scan telegram
#[derive(Debug, Clone, PartialEq)]
struct Channel<'a> {
    name: &'a str,
    scale: f64,
    offset: f64,
    start_deg: f64,
    step_deg: f64,
    values: Vec<u32>,
}

/// Token cursor with typed hex accessors
struct Tokens<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(body: &'a str) -> Self {
        let tokens = body
            .split([' ', ','])
            .filter(|t| !t.is_empty())
            .collect();
        Self { tokens, pos: 0 }
    }

    fn next(&mut self) -> Result<&'a str, String> {
        let token = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or_else(|| format!("telegram ends at token {}", self.pos))?;
        self.pos += 1;
        Ok(token)
    }

    fn hex(&mut self) -> Result<u32, String> {
        let token = self.next()?;
        u32::from_str_radix(token, 16).map_err(|_| format!("bad hex token {:?} at {}", token, self.pos - 1))
    }

    fn hex_f32(&mut self) -> Result<f64, String> {
        Ok(f32::from_bits(self.hex()?) as f64)
    }

    fn skip(&mut self, count: usize) -> Result<(), String> {
        if self.pos + count > self.tokens.len() {
            return Err(format!("telegram ends inside a {}-token block", count));
        }
        self.pos += count;
        Ok(())
    }

    fn channel(&mut self) -> Result<Channel<'a>, String> {
        let name = self.next()?;
        let scale = self.hex_f32()?;
        let offset = self.hex_f32()?;
        let start_deg = self.hex()? as i32 as f64 / 10_000.0;
        let step_deg = self.hex()? as f64 / 10_000.0;
        let count = self.hex()? as usize;
        let values = (0..count).map(|_| self.hex()).collect::<Result<Vec<_>, _>>()?;
        Ok(Channel {
            name,
            scale,
            offset,
            start_deg,
            step_deg,
            values,
        })
    }
}

/// Decode an `LMDscandata` telegram body
fn decode_scan(tokens: &mut Tokens<'_>, now: f64) -> Result<Vec<RangeSample>, String> {
    tokens.pos = ENCODER_COUNT_INDEX;
    let encoders = tokens.hex()? as usize;
    tokens.skip(encoders * 2)?;

    let mut distance = None;
    for _ in 0..tokens.hex()? {
        let channel = tokens.channel()?;
        if distance.is_none() && channel.name == "DIST1" {
            distance = Some(channel);
        }
    }
    let Some(distance) = distance else {
        return Ok(Vec::new());
    };

    let mut rssi = None;
    // 8-bit channels are optional on older firmware
    if tokens.pos < tokens.tokens.len() {
        for _ in 0..tokens.hex()? {
            let channel = tokens.channel()?;
            if rssi.is_none() && channel.name == "RSSI1" {
                rssi = Some(channel);
            }
        }
    }

    let samples = distance
        .values
        .iter()
        .enumerate()
        .filter(|(_, raw)| **raw != 0)
        .map(|(i, raw)| {
            let distance_mm = distance.offset + *raw as f64 * distance.scale;
            let angle = distance.start_deg + distance.step_deg * i as f64;
            let quality = rssi
                .as_ref()
                .and_then(|c| c.values.get(i))
                .map(|q| (*q).min(u8::MAX as u32) as u8)
                .unwrap_or(SENTINEL_QUALITY);
            RangeSample::new(angle, distance_mm, quality, now)
        })
        .collect();
    Ok(samples)
}

/// CoLa-A telegram decoder
#[derive(Debug)]
pub struct ColaCodec {
    max_telegram: usize,
}

impl ColaCodec {
    /// Create a codec with a telegram size ceiling
    pub fn new(max_telegram: usize) -> Self {
        Self {
            max_telegram: max_telegram.max(2),
        }
    }
}

impl Default for ColaCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TELEGRAM)
    }
}

impl FrameCodec for ColaCodec {
    fn feed(&mut self, buf: &[u8], now: f64) -> Decoded {
        if buf[0] != STX {
            let skip = buf.iter().position(|&b| b == STX).unwrap_or(buf.len());
            return Decoded::skip(skip);
        }

        let window = &buf[1..buf.len().min(self.max_telegram)];
        let Some(etx) = window.iter().position(|&b| b == ETX) else {
            if buf.len() < self.max_telegram {
                return Decoded::incomplete();
            }
            let next_stx = window.iter().position(|&b| b == STX).map(|p| p + 1);
            return Decoded::fault(
                next_stx.unwrap_or(self.max_telegram),
                FaultKind::Overflow,
                format!("no ETX within {} bytes", self.max_telegram),
            );
        };
        let consumed = etx + 2;

        let Ok(body) = std::str::from_utf8(&window[..etx]) else {
            return Decoded::fault(consumed, FaultKind::ParseError, "telegram is not ASCII");
        };
        let mut tokens = Tokens::new(body);
        let is_scan = matches!(
            (tokens.tokens.first(), tokens.tokens.get(1)),
            (Some(&"sRA") | Some(&"sSN"), Some(&"LMDscandata"))
        );
        if !is_scan {
            return Decoded::skip(consumed);
        }

        match decode_scan(&mut tokens, now) {
            Ok(samples) => Decoded::samples(consumed, samples),
            Err(detail) => Decoded::fault(consumed, FaultKind::ParseError, detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_frames::cola_scan;
    use crate::codec::{Codec, StreamDecoder};

    fn decoder(max: usize) -> StreamDecoder {
        StreamDecoder::with_codec(Codec::Cola(ColaCodec::new(max)), 1 << 20)
    }

    #[test]
    fn test_scan_with_rssi() {
        let mut dec = decoder(DEFAULT_MAX_TELEGRAM);
        let batch = dec.push(&cola_scan(-45.0, 0.5, &[1000, 0, 3000], Some(&[10, 20, 300])), 2.0);
        assert!(batch.faults.is_empty());
        assert_eq!(batch.samples.len(), 2);
        assert_eq!(batch.samples[0].angle_deg, 315.0);
        assert_eq!(batch.samples[0].distance_mm, 1000.0);
        assert_eq!(batch.samples[0].quality, 10);
        assert_eq!(batch.samples[1].angle_deg, 316.0);
        // RSSI above 255 clamps
        assert_eq!(batch.samples[1].quality, 255);
    }

    #[test]
    fn test_scan_without_rssi_uses_sentinel() {
        let mut dec = decoder(DEFAULT_MAX_TELEGRAM);
        let batch = dec.push(&cola_scan(0.0, 1.0, &[500, 600], None), 0.0);
        assert_eq!(batch.samples.len(), 2);
        assert!(batch.samples.iter().all(|s| s.quality == SENTINEL_QUALITY));
        assert_eq!(batch.samples[1].angle_deg, 1.0);
    }

    #[test]
    fn test_other_telegrams_consumed_silently() {
        let mut dec = decoder(DEFAULT_MAX_TELEGRAM);
        let batch = dec.push(b"noise\x02sAN SetAccessMode 1\x03\x02sEA LMDscandata 1\x03", 0.0);
        assert!(batch.samples.is_empty());
        assert!(batch.faults.is_empty());
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_bad_token_is_parse_error() {
        let mut telegram = cola_scan(0.0, 1.0, &[500, 600], None);
        let text = String::from_utf8(telegram.clone()).unwrap().replace(" 258", " XYZ");
        telegram = text.into_bytes();

        let mut dec = decoder(DEFAULT_MAX_TELEGRAM);
        let batch = dec.push(&telegram, 0.0);
        assert_eq!(batch.faults.len(), 1);
        assert_eq!(batch.faults[0].kind, FaultKind::ParseError);
        let batch = dec.push(&cola_scan(0.0, 1.0, &[500], None), 0.0);
        assert_eq!(batch.samples.len(), 1);
    }

    #[test]
    fn test_missing_etx_overflows_past_ceiling() {
        let mut dec = decoder(256);
        let batch = dec.push(b"\x02sSN LMDscandata 1 2 3", 0.0);
        assert!(batch.faults.is_empty());

        let mut rest = vec![b'A'; 300];
        rest.extend(cola_scan(0.0, 1.0, &[500], None));
        let batch = dec.push(&rest, 0.0);
        assert_eq!(batch.faults.len(), 1);
        assert_eq!(batch.faults[0].kind, FaultKind::Overflow);
        // the codec resynchronises on the next STX
        assert_eq!(batch.samples.len(), 1);
    }
}
