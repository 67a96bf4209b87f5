//! Hokuyo SCIP 2.0 codec
//!
//! Replies are newline-terminated line blocks ending in a blank line:
//!
//! ```text
//! GD0044072501      echo: command, start step, end step, cluster count
//! 00P               status + checksum
//! 0F]c0             timestamp + checksum (only when data follows)
//! 0m20m20m2...X     data lines (up to 64 chars) + checksum
//!                   blank line ends the block
//! ```
//!
//! Line checksum: `(sum of body bytes & 0x3F) + 0x30`.

use super::{Decoded, FrameCodec};
use crate::error::FaultKind;
use crate::types::{RangeSample, SENTINEL_QUALITY};
use serde::{Deserialize, Serialize};

/// Longest line accepted before it is discarded
pub const MAX_LINE: usize = 1024;

/// Smallest value that is a distance rather than a device error code
const MIN_VALID_DISTANCE: u32 = 20;

/// Step-to-angle geometry of a SCIP device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScipGeometry {
    /// Steps per full revolution
    pub resolution: u32,
    /// Step pointing straight ahead
    pub front_step: u32,
}

impl Default for ScipGeometry {
    /// URG-04LX
    fn default() -> Self {
        Self {
            resolution: 1024,
            front_step: 384,
        }
    }
}

impl ScipGeometry {
    /// Angle of a step index in degrees
    pub fn step_to_deg(&self, step: f64) -> f64 {
        (step - self.front_step as f64) * 360.0 / self.resolution.max(1) as f64
    }
}

/// Parameters echoed back by a distance request
#[derive(Debug, Clone, Copy, PartialEq)]
struct Request {
    chars_per_value: usize,
    start: u16,
    end: u16,
    cluster: u16,
}

impl Request {
    fn expected_values(&self) -> usize {
        let span = (self.end - self.start) as usize + 1;
        span.div_ceil(self.cluster as usize)
    }

    fn expected_chars(&self) -> usize {
        self.expected_values() * self.chars_per_value
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Echo,
    Status(Request),
    Timestamp(Request),
    Data(Request, Vec<u8>),
    Skip,
}

/// Line checksum character for `body`
pub fn checksum(body: &[u8]) -> u8 {
    let sum: u32 = body.iter().map(|&b| b as u32).sum();
    ((sum & 0x3F) as u8) + 0x30
}

/// Split a checksummed line into its body, verifying the trailing character
fn verified(line: &[u8]) -> Option<&[u8]> {
    let (&sum, body) = line.split_last()?;
    (checksum(body) == sum).then_some(body)
}

/// Decode one SCIP character-encoded value
fn decode_value(chars: &[u8]) -> u32 {
    chars
        .iter()
        .fold(0u32, |acc, &c| (acc << 6) | (c.wrapping_sub(0x30) & 0x3F) as u32)
}

fn parse_digits(field: &[u8]) -> Option<u16> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

fn parse_echo(line: &[u8]) -> Option<Request> {
    let chars_per_value = match line.get(..2)? {
        b"GD" | b"MD" => 3,
        b"GS" | b"MS" => 2,
        _ => return None,
    };
    if line.len() < 12 {
        return None;
    }
    let start = parse_digits(&line[2..6])?;
    let end = parse_digits(&line[6..10])?;
    let cluster = parse_digits(&line[10..12])?.max(1);
    (end >= start).then_some(Request {
        chars_per_value,
        start,
        end,
        cluster,
    })
}

/// SCIP 2.0 line-state decoder
#[derive(Debug)]
pub struct ScipCodec {
    geometry: ScipGeometry,
    state: State,
    /// Inside the tail of an overlong line
    mid_line: bool,
}

impl ScipCodec {
    /// Create a codec with the given step geometry
    pub fn new(geometry: ScipGeometry) -> Self {
        Self {
            geometry,
            state: State::Echo,
            mid_line: false,
        }
    }

    fn framing(&mut self, consumed: usize, detail: String) -> Decoded {
        self.state = State::Skip;
        Decoded::fault(consumed, FaultKind::FramingError, detail)
    }

    fn finish_block(&self, request: Request, data: &[u8], now: f64) -> Result<Vec<RangeSample>, String> {
        let cpv = request.chars_per_value;
        if data.len() % cpv != 0 {
            return Err(format!("{} data chars is not a multiple of {}", data.len(), cpv));
        }
        let count = data.len() / cpv;
        if count != request.expected_values() {
            return Err(format!(
                "{} values for steps {}..={} (cluster {}), expected {}",
                count,
                request.start,
                request.end,
                request.cluster,
                request.expected_values()
            ));
        }

        let cluster = request.cluster as f64;
        let samples = data
            .chunks_exact(cpv)
            .enumerate()
            .filter_map(|(i, chars)| {
                let value = decode_value(chars);
                if value < MIN_VALID_DISTANCE {
                    return None;
                }
                let step = request.start as f64 + i as f64 * cluster + (cluster - 1.0) / 2.0;
                Some(RangeSample::new(
                    self.geometry.step_to_deg(step),
                    value as f64,
                    SENTINEL_QUALITY,
                    now,
                ))
            })
            .collect();
        Ok(samples)
    }

    fn handle_line(&mut self, line: &[u8], consumed: usize, now: f64) -> Decoded {
        let blank = line.is_empty();
        match std::mem::replace(&mut self.state, State::Echo) {
            State::Echo => {
                if blank {
                    return Decoded::skip(consumed);
                }
                if let Some(request) = parse_echo(line) {
                    self.state = State::Status(request);
                    return Decoded::skip(consumed);
                }
                let is_command = line.len() >= 2 && line[..2].iter().all(u8::is_ascii_uppercase);
                if is_command && !matches!(&line[..2], b"GD" | b"GS" | b"MD" | b"MS") {
                    // reply to some other command
                    self.state = State::Skip;
                    return Decoded::skip(consumed);
                }
                self.framing(
                    consumed,
                    format!("unexpected echo {:?}", String::from_utf8_lossy(line)),
                )
            }
            State::Status(request) => match verified(line) {
                Some(b"00") | Some(b"99") => {
                    self.state = State::Timestamp(request);
                    Decoded::skip(consumed)
                }
                Some(_) => {
                    // device refused the request
                    self.state = State::Skip;
                    Decoded::skip(consumed)
                }
                None => self.framing(
                    consumed,
                    format!("bad status line {:?}", String::from_utf8_lossy(line)),
                ),
            },
            State::Timestamp(request) => {
                if blank {
                    // acknowledgement without data
                    return Decoded::skip(consumed);
                }
                match verified(line) {
                    Some(_) => {
                        self.state = State::Data(request, Vec::new());
                        Decoded::skip(consumed)
                    }
                    None => self.framing(consumed, "bad timestamp checksum".into()),
                }
            }
            State::Data(request, mut data) => {
                if blank {
                    return match self.finish_block(request, &data, now) {
                        Ok(samples) => Decoded::samples(consumed, samples),
                        Err(detail) => Decoded::fault(consumed, FaultKind::FramingError, detail),
                    };
                }
                match verified(line) {
                    Some(body) if data.len() + body.len() > request.expected_chars() => {
                        self.state = State::Skip;
                        Decoded::fault(
                            consumed,
                            FaultKind::Overflow,
                            format!(
                                "data block exceeds {} chars for steps {}..={}",
                                request.expected_chars(),
                                request.start,
                                request.end
                            ),
                        )
                    }
                    Some(body) => {
                        data.extend_from_slice(body);
                        self.state = State::Data(request, data);
                        Decoded::skip(consumed)
                    }
                    None => self.framing(
                        consumed,
                        format!("bad data line checksum after {} chars", data.len()),
                    ),
                }
            }
            State::Skip => {
                if !blank {
                    self.state = State::Skip;
                }
                Decoded::skip(consumed)
            }
        }
    }
}

impl FrameCodec for ScipCodec {
    fn feed(&mut self, buf: &[u8], now: f64) -> Decoded {
        let window = &buf[..buf.len().min(MAX_LINE + 1)];
        let Some(newline) = window.iter().position(|&b| b == b'\n') else {
            if buf.len() <= MAX_LINE {
                return Decoded::incomplete();
            }
            let report = !self.mid_line && self.state != State::Skip;
            self.mid_line = true;
            self.state = State::Skip;
            return if report {
                Decoded::fault(MAX_LINE, FaultKind::Overflow, "line exceeds 1024 bytes")
            } else {
                Decoded::skip(MAX_LINE)
            };
        };

        let consumed = newline + 1;
        if self.mid_line {
            self.mid_line = false;
            return Decoded::skip(consumed);
        }

        let mut line = &buf[..newline];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        self.handle_line(line, consumed, now)
    }

    fn reset(&mut self) {
        self.state = State::Echo;
        self.mid_line = false;
    }
}
