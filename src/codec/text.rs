//! Generic text-record codec (serial lines and UDP datagrams)
//!
//! One record per line, tokens separated by commas and/or whitespace:
//! - `angle,distance,quality`
//! - `angle,distance` (quality unknown)
//! - `a1,d1,a2,d2,...` (any other even token count)

use super::{Decoded, FrameCodec};
use crate::error::{DecodeFault, FaultKind};
use crate::types::{RangeSample, SENTINEL_QUALITY};

/// Longest record accepted before it is discarded
pub const MAX_RECORD: usize = 4096;

/// Newline-delimited text decoder
#[derive(Debug, Default)]
pub struct TextCodec {
    mid_record: bool,
}

impl TextCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }
}

fn number(token: &str, what: &str) -> Result<f64, String> {
    let value: f64 = token
        .parse()
        .map_err(|_| format!("{} {:?} is not a number", what, token))?;
    if !value.is_finite() {
        return Err(format!("{} {:?} is not finite", what, token));
    }
    Ok(value)
}

fn sample(angle: &str, distance: &str, quality: u8, now: f64) -> Result<RangeSample, String> {
    let angle = number(angle, "angle")?;
    let distance = number(distance, "distance")?;
    if distance < 0.0 {
        return Err(format!("negative distance {}", distance));
    }
    Ok(RangeSample::new(angle, distance, quality, now))
}

/// Samples and token errors of one record
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Record {
    pub samples: Vec<RangeSample>,
    pub errors: Vec<String>,
}

impl Record {
    fn invalid(error: String) -> Self {
        Self {
            samples: Vec::new(),
            errors: vec![error],
        }
    }
}

/// Parse one record into samples
///
/// In the pair form every pair stands alone: a bad pair is reported and the
/// others on the line are still decoded.
pub fn parse_record(line: &str, now: f64) -> Record {
    let tokens: Vec<&str> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    match tokens.as_slice() {
        [] => Record::default(),
        [angle, distance, quality] => {
            let parsed = number(quality, "quality").and_then(|q| {
                if (0.0..=255.0).contains(&q) {
                    sample(angle, distance, q.round() as u8, now)
                } else {
                    Err(format!("quality {} outside 0-255", q))
                }
            });
            match parsed {
                Ok(s) => Record {
                    samples: vec![s],
                    errors: Vec::new(),
                },
                Err(e) => Record::invalid(e),
            }
        }
        pairs if pairs.len() % 2 == 0 => {
            let mut record = Record::default();
            for pair in pairs.chunks_exact(2) {
                match sample(pair[0], pair[1], SENTINEL_QUALITY, now) {
                    Ok(s) => record.samples.push(s),
                    Err(e) => record.errors.push(e),
                }
            }
            record
        }
        other => Record::invalid(format!("{} tokens is not a valid record", other.len())),
    }
}

impl FrameCodec for TextCodec {
    fn feed(&mut self, buf: &[u8], now: f64) -> Decoded {
        let window = &buf[..buf.len().min(MAX_RECORD + 1)];
        let Some(newline) = window.iter().position(|&b| b == b'\n') else {
            if buf.len() <= MAX_RECORD {
                return Decoded::incomplete();
            }
            let report = !self.mid_record;
            self.mid_record = true;
            return if report {
                Decoded::fault(MAX_RECORD, FaultKind::Overflow, "record exceeds 4096 bytes")
            } else {
                Decoded::skip(MAX_RECORD)
            };
        };

        let consumed = newline + 1;
        if self.mid_record {
            self.mid_record = false;
            return Decoded::skip(consumed);
        }

        let Ok(line) = std::str::from_utf8(&buf[..newline]) else {
            return Decoded::fault(consumed, FaultKind::ParseError, "record is not UTF-8");
        };
        let record = parse_record(line, now);
        let faults = record
            .errors
            .into_iter()
            .map(|detail| DecodeFault::new(FaultKind::ParseError, detail))
            .collect();
        Decoded::partial(consumed, record.samples, faults)
    }

    fn reset(&mut self) {
        self.mid_record = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, StreamDecoder};

    fn decoder() -> StreamDecoder {
        StreamDecoder::with_codec(Codec::Text(TextCodec::new()), 1 << 16)
    }

    fn samples(line: &str) -> Vec<RangeSample> {
        let record = parse_record(line, 0.0);
        assert!(record.errors.is_empty(), "{:?}", record.errors);
        record.samples
    }

    fn rejected(line: &str) -> bool {
        let record = parse_record(line, 0.0);
        record.samples.is_empty() && record.errors.len() == 1
    }

    #[test]
    fn test_record_shapes() {
        let triple = samples("45.5, 1200, 17");
        assert_eq!(triple.len(), 1);
        assert_eq!((triple[0].angle_deg, triple[0].distance_mm, triple[0].quality), (45.5, 1200.0, 17));

        let pair = samples("10 800");
        assert_eq!(pair[0].quality, SENTINEL_QUALITY);

        let pairs = samples("1,100,2,200,3,300");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2].angle_deg, 3.0);

        assert_eq!(parse_record("   ", 0.0), Record::default());
        assert!(rejected("1,2,3,4,5"));
        assert!(rejected("7"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(rejected("10,-5"));
        assert!(rejected("10,inf"));
        assert!(rejected("NaN,100"));
        assert!(rejected("10,100,300"));
        // negative angles normalize
        assert_eq!(samples("-90,100")[0].angle_deg, 270.0);
    }

    #[test]
    fn test_bad_pair_keeps_the_rest_of_the_record() {
        let record = parse_record("10,100,20,abc,30,300", 0.0);
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].contains("abc"));
        let angles: Vec<f64> = record.samples.iter().map(|s| s.angle_deg).collect();
        assert_eq!(angles, vec![10.0, 30.0]);

        let mut dec = decoder();
        let batch = dec.push(b"10,100,x,200,30,y\n", 0.0);
        assert_eq!(batch.samples.len(), 1);
        assert_eq!(batch.faults.len(), 2);
        assert!(batch.faults.iter().all(|f| f.kind == FaultKind::ParseError));
    }

    #[test]
    fn test_bad_record_resumes_on_next_line() {
        let mut dec = decoder();
        let batch = dec.push(b"45.0,abc,255\n90.0,1000,128\r\n", 3.0);
        assert_eq!(batch.faults.len(), 1);
        assert_eq!(batch.faults[0].kind, FaultKind::ParseError);
        assert_eq!(batch.samples.len(), 1);
        assert_eq!(batch.samples[0].angle_deg, 90.0);
        assert_eq!(batch.samples[0].quality, 128);
        assert_eq!(batch.samples[0].timestamp, 3.0);
    }

    #[test]
    fn test_partial_line_waits() {
        let mut dec = decoder();
        assert!(dec.push(b"12.5,30", 0.0).samples.is_empty());
        let batch = dec.push(b"0\n", 0.0);
        assert_eq!(batch.samples[0].distance_mm, 300.0);
    }

    #[test]
    fn test_overlong_record_is_one_overflow() {
        let mut dec = decoder();
        let mut stream = vec![b'1'; MAX_RECORD * 2 + 10];
        stream.extend_from_slice(b"\n5,500\n");
        let batch = dec.push(&stream, 0.0);
        assert_eq!(batch.faults.len(), 1);
        assert_eq!(batch.faults[0].kind, FaultKind::Overflow);
        assert_eq!(batch.samples.len(), 1);
    }
}
