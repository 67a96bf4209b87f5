//! Frame codecs: byte stream to range samples
//!
//! Every device family gets one codec. A codec is a pure function of the
//! bytes it is fed plus a small amount of protocol state (the previous
//! RPLidar capsule, the SCIP line state, a resync flag), so splitting the same
//! byte stream into different chunks yields the same samples and faults.
//!
//! [`StreamDecoder`] owns the unconsumed bytes and drives a codec until it
//! stops making progress.

use crate::error::{DecodeFault, FaultKind};
use crate::types::{DeviceKind, RangeSample};

pub mod cola;
pub mod rplidar;
pub mod scip;
pub mod text;
pub mod ydlidar;

pub use cola::ColaCodec;
pub use rplidar::RpLidarCodec;
pub use scip::{ScipCodec, ScipGeometry};
pub use text::TextCodec;
pub use ydlidar::YdLidarCodec;

/// Default ceiling on buffered, undecodable bytes
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// Result of one `feed` call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Decoded {
    /// Samples decoded from the consumed bytes
    pub samples: Vec<RangeSample>,
    /// Bytes of the input the caller may discard
    pub consumed: usize,
    /// Faults raised by this call
    pub faults: Vec<DecodeFault>,
}

impl Decoded {
    /// Nothing decodable yet
    pub fn incomplete() -> Self {
        Self {
            faults: vec![DecodeFault::incomplete()],
            ..Self::default()
        }
    }

    /// Consume bytes without output
    pub fn skip(consumed: usize) -> Self {
        Self {
            consumed,
            ..Self::default()
        }
    }

    /// Consume bytes and report a fault
    pub fn fault(consumed: usize, kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            consumed,
            faults: vec![DecodeFault::new(kind, detail)],
            ..Self::default()
        }
    }

    /// Consume bytes and emit samples
    pub fn samples(consumed: usize, samples: Vec<RangeSample>) -> Self {
        Self {
            samples,
            consumed,
            faults: Vec::new(),
        }
    }

    /// Consume a frame that was only partly valid
    pub fn partial(consumed: usize, samples: Vec<RangeSample>, faults: Vec<DecodeFault>) -> Self {
        Self {
            samples,
            consumed,
            faults,
        }
    }
}

/// Protocol decoder contract
///
/// `feed` looks at the front of `buf` and decodes at most one frame (or skips
/// some garbage). `now` is stamped on every sample produced. A fault other than
/// [`FaultKind::Incomplete`] must consume at least one byte.
pub trait FrameCodec: Send {
    /// Decode from the front of `buf`
    fn feed(&mut self, buf: &[u8], now: f64) -> Decoded;

    /// Drop protocol state (after reconnect or stream restart)
    fn reset(&mut self) {}
}

/// Codec options that depend on device setup rather than device family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecOptions {
    /// SCIP step geometry
    pub scip: ScipGeometry,
    /// CoLa-A telegram ceiling in bytes
    pub cola_max_telegram: usize,
    /// Ceiling on buffered bytes in [`StreamDecoder`]
    pub max_buffer: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            scip: ScipGeometry::default(),
            cola_max_telegram: cola::DEFAULT_MAX_TELEGRAM,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

/// Closed set of codecs, one per device family
pub enum Codec {
    RpLidar(RpLidarCodec),
    YdLidar(YdLidarCodec),
    Scip(ScipCodec),
    Cola(ColaCodec),
    Text(TextCodec),
}

impl Codec {
    /// Codec for a device family
    pub fn for_kind(kind: DeviceKind, options: &CodecOptions) -> Self {
        match kind {
            DeviceKind::RPLidar => Codec::RpLidar(RpLidarCodec::new()),
            DeviceKind::YDLidar => Codec::YdLidar(YdLidarCodec::new()),
            DeviceKind::HokuyoURG => Codec::Scip(ScipCodec::new(options.scip)),
            DeviceKind::SickTiM => Codec::Cola(ColaCodec::new(options.cola_max_telegram)),
            DeviceKind::GenericSerial | DeviceKind::GenericUDP => Codec::Text(TextCodec::new()),
        }
    }

    /// Record terminator to supply for datagrams that lack one
    pub fn datagram_terminator(&self) -> Option<u8> {
        match self {
            Codec::Text(_) => Some(b'\n'),
            _ => None,
        }
    }
}

impl FrameCodec for Codec {
    fn feed(&mut self, buf: &[u8], now: f64) -> Decoded {
        match self {
            Codec::RpLidar(c) => c.feed(buf, now),
            Codec::YdLidar(c) => c.feed(buf, now),
            Codec::Scip(c) => c.feed(buf, now),
            Codec::Cola(c) => c.feed(buf, now),
            Codec::Text(c) => c.feed(buf, now),
        }
    }

    fn reset(&mut self) {
        match self {
            Codec::RpLidar(c) => c.reset(),
            Codec::YdLidar(c) => c.reset(),
            Codec::Scip(c) => c.reset(),
            Codec::Cola(c) => c.reset(),
            Codec::Text(c) => c.reset(),
        }
    }
}

/// Samples and faults produced by one `push`
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodeBatch {
    /// Decoded samples, in stream order
    pub samples: Vec<RangeSample>,
    /// Non-`Incomplete` faults, in stream order
    pub faults: Vec<DecodeFault>,
}

/// Buffering decoder driving one codec
pub struct StreamDecoder {
    codec: Codec,
    buffer: Vec<u8>,
    max_buffer: usize,
}

impl StreamDecoder {
    /// Decoder for a device family
    pub fn new(kind: DeviceKind, options: &CodecOptions) -> Self {
        Self::with_codec(Codec::for_kind(kind, options), options.max_buffer)
    }

    /// Decoder around an explicit codec
    pub fn with_codec(codec: Codec, max_buffer: usize) -> Self {
        Self {
            codec,
            buffer: Vec::with_capacity(4096),
            max_buffer: max_buffer.max(1),
        }
    }

    /// Append stream bytes and decode everything complete
    pub fn push(&mut self, bytes: &[u8], now: f64) -> DecodeBatch {
        self.buffer.extend_from_slice(bytes);
        let mut batch = DecodeBatch::default();

        while !self.buffer.is_empty() {
            let out = self.codec.feed(&self.buffer, now);
            batch.samples.extend(out.samples);

            let mut consumed = out.consumed.min(self.buffer.len());
            let mut waiting = false;
            for fault in out.faults {
                if fault.kind == FaultKind::Incomplete {
                    waiting = true;
                } else {
                    // a fault must make progress
                    consumed = consumed.max(1);
                    batch.faults.push(fault);
                }
            }

            self.buffer.drain(..consumed);
            if waiting || consumed == 0 {
                break;
            }
        }

        if self.buffer.len() > self.max_buffer {
            let dropped = self.buffer.len();
            self.buffer.clear();
            self.codec.reset();
            batch.faults.push(DecodeFault::new(
                FaultKind::Overflow,
                format!("{} undecodable bytes discarded", dropped),
            ));
        }

        batch
    }

    /// Append one datagram; datagram boundaries are record boundaries
    pub fn push_datagram(&mut self, datagram: &[u8], now: f64) -> DecodeBatch {
        match self.codec.datagram_terminator() {
            Some(term) if datagram.last() != Some(&term) => {
                let mut owned = Vec::with_capacity(datagram.len() + 1);
                owned.extend_from_slice(datagram);
                owned.push(term);
                self.push(&owned, now)
            }
            _ => self.push(datagram, now),
        }
    }

    /// Bytes waiting for a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered bytes and codec state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.codec.reset();
    }
}


#[cfg(test)]
mod tests {
    use super::test_frames::*;
    use super::*;

    fn decode_in_chunks(kind: DeviceKind, stream: &[u8], chunk: usize) -> DecodeBatch {
        let mut decoder = StreamDecoder::new(kind, &CodecOptions::default());
        let mut total = DecodeBatch::default();
        for piece in stream.chunks(chunk) {
            let batch = decoder.push(piece, 1.0);
            total.samples.extend(batch.samples);
            total.faults.extend(batch.faults);
        }
        total
    }

    fn stream_for(kind: DeviceKind) -> Vec<u8> {
        match kind {
            DeviceKind::RPLidar => {
                let mut s = vec![0xA5, 0x5A, 0x54, 0x00, 0x00, 0x40, 0x82];
                for k in 0..4 {
                    s.extend(rplidar_capsule(10.0 + k as f64 * 10.0, 1000, k == 0));
                }
                s
            }
            DeviceKind::YDLidar => {
                let mut s = ydlidar_packet(0.0, 10.0, &[500, 600, 700]);
                s.extend(ydlidar_packet(10.0, 20.0, &[800, 0, 900]));
                s
            }
            DeviceKind::HokuyoURG => {
                let values: Vec<u32> = (0..100).map(|i| 1000 + i).collect();
                let mut s = b"QT\n00P\n\n".to_vec();
                s.extend(scip_gd_reply(44, &values));
                s
            }
            DeviceKind::SickTiM => {
                let mut s = b"\x02sEA LMDscandata 1\x03".to_vec();
                s.extend(cola_scan(-45.0, 1.0, &[1000, 2000, 3000], Some(&[10, 20, 30])));
                s
            }
            DeviceKind::GenericSerial | DeviceKind::GenericUDP => {
                b"10.0,1000,200\n20.0 2000\n30,3000,40,4000\n45.0,abc,255\n50,5000\n".to_vec()
            }
        }
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        for kind in DeviceKind::ALL {
            let stream = stream_for(kind);
            let whole = decode_in_chunks(kind, &stream, stream.len());
            assert!(!whole.samples.is_empty(), "{} produced no samples", kind);
            for chunk in [1, 2, 3, 7, 64] {
                let split = decode_in_chunks(kind, &stream, chunk);
                assert_eq!(split, whole, "{} differs at chunk size {}", kind, chunk);
            }
        }
    }

    #[test]
    fn test_datagram_gets_record_boundary() {
        let mut decoder = StreamDecoder::new(DeviceKind::GenericUDP, &CodecOptions::default());
        let batch = decoder.push_datagram(b"90,1500", 2.0);
        assert_eq!(batch.samples.len(), 1);
        assert_eq!(batch.samples[0].angle_deg, 90.0);
        assert_eq!(decoder.buffered(), 0);

        let batch = decoder.push_datagram(b"91,1501\n", 2.0);
        assert_eq!(batch.samples.len(), 1);
    }

    #[test]
    fn test_buffer_ceiling_discards_garbage() {
        let options = CodecOptions {
            max_buffer: 32,
            ..CodecOptions::default()
        };
        let mut decoder = StreamDecoder::new(DeviceKind::GenericSerial, &options);
        let batch = decoder.push(&[b'7'; 40], 0.0);
        assert_eq!(batch.faults.len(), 1);
        assert_eq!(batch.faults[0].kind, FaultKind::Overflow);
        assert_eq!(decoder.buffered(), 0);
    }
}
