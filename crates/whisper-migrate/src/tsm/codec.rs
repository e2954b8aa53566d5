//! Gorilla compression for block timestamps and values.
//!
//! # Timestamp Encoding (Delta-of-Delta)
//!
//! - First value: 64 bits raw
//! - Subsequent values, by delta-of-delta `d`:
//!   - `0`: `'0'`
//!   - `[-63, 64]`: `'10'` + 7 bits
//!   - `[-255, 256]`: `'110'` + 9 bits
//!   - `[-2047, 2048]`: `'1110'` + 12 bits
//!   - fits `i32`: `'11110'` + 32 bits
//!   - else: `'11111'` + 64 bits
//!
//! Nanosecond timestamps converted from second-resolution sources produce
//! deltas far outside `i32`, so the 64-bit escape is required.
//!
//! # Value Encoding (XOR)
//!
//! - First value: 64 bits raw (IEEE 754)
//! - Subsequent values:
//!   - XOR = 0: `'0'`
//!   - fits previous window: `'10'` + meaningful bits
//!   - new window: `'11'` + 5 bits leading + 6 bits (length - 1) + meaningful bits

use bitvec::prelude::*;

use crate::error::{MigrateError, Result};

/// Largest leading-zero count representable in the 5-bit field.
const MAX_LEADING: u32 = 31;

/// Append-only bit sink.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bits: BitVec<u8, Msb0>,
}

impl BitWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one bit.
    pub fn write_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Appends the low `n` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
    }

    /// Number of bits written.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns the bytes, zero-padded to a byte boundary.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bits.into_vec()
    }
}

/// Cursor over an encoded bit stream.
#[derive(Debug)]
pub struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a reader over `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bits: BitSlice::from_slice(bytes),
            pos: 0,
        }
    }

    /// Reads one bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        let bit = self
            .bits
            .get(self.pos)
            .map(|b| *b)
            .ok_or_else(|| MigrateError::Codec(format!("bit stream exhausted at {}", self.pos)))?;
        self.pos += 1;
        Ok(bit)
    }

    /// Reads `n` bits (at most 64) as an unsigned integer.
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        let end = self.pos + n as usize;
        if end > self.bits.len() {
            return Err(MigrateError::Codec(format!(
                "need {} bits at {}, stream has {}",
                n,
                self.pos,
                self.bits.len()
            )));
        }
        let value = self.bits[self.pos..end]
            .iter()
            .fold(0u64, |acc, bit| (acc << 1) | u64::from(*bit));
        self.pos = end;
        Ok(value)
    }

    /// Number of leading `1` bits before the first `0`, reading at most `max`.
    fn read_prefix(&mut self, max: u32) -> Result<u32> {
        let mut ones = 0;
        while ones < max && self.read_bit()? {
            ones += 1;
        }
        Ok(ones)
    }
}

/// Delta-of-delta timestamp encoder.
#[derive(Debug, Default)]
pub struct TimestampEncoder {
    prev: Option<(i64, i64)>,
}

impl TimestampEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one timestamp.
    pub fn encode(&mut self, timestamp: i64, out: &mut BitWriter) {
        let Some((prev_ts, prev_delta)) = self.prev else {
            out.write_bits(timestamp as u64, 64);
            self.prev = Some((timestamp, 0));
            return;
        };

        let delta = timestamp.wrapping_sub(prev_ts);
        let dod = delta.wrapping_sub(prev_delta);

        match dod {
            0 => out.write_bit(false),
            -63..=64 => {
                out.write_bits(0b10, 2);
                out.write_bits((dod + 63) as u64, 7);
            }
            -255..=256 => {
                out.write_bits(0b110, 3);
                out.write_bits((dod + 255) as u64, 9);
            }
            -2047..=2048 => {
                out.write_bits(0b1110, 4);
                out.write_bits((dod + 2047) as u64, 12);
            }
            _ if i32::try_from(dod).is_ok() => {
                out.write_bits(0b11110, 5);
                out.write_bits(u64::from(dod as i32 as u32), 32);
            }
            _ => {
                out.write_bits(0b11111, 5);
                out.write_bits(dod as u64, 64);
            }
        }

        self.prev = Some((timestamp, delta));
    }
}

/// Delta-of-delta timestamp decoder.
#[derive(Debug)]
pub struct TimestampDecoder<'a> {
    reader: BitReader<'a>,
    prev: Option<(i64, i64)>,
}

impl<'a> TimestampDecoder<'a> {
    /// Creates a decoder over `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(bytes),
            prev: None,
        }
    }

    /// Decodes the next timestamp.
    pub fn decode_next(&mut self) -> Result<i64> {
        let Some((prev_ts, prev_delta)) = self.prev else {
            let ts = self.reader.read_bits(64)? as i64;
            self.prev = Some((ts, 0));
            return Ok(ts);
        };

        let dod = match self.reader.read_prefix(5)? {
            0 => 0,
            1 => self.reader.read_bits(7)? as i64 - 63,
            2 => self.reader.read_bits(9)? as i64 - 255,
            3 => self.reader.read_bits(12)? as i64 - 2047,
            4 => i64::from(self.reader.read_bits(32)? as u32 as i32),
            _ => self.reader.read_bits(64)? as i64,
        };

        let delta = prev_delta.wrapping_add(dod);
        let ts = prev_ts.wrapping_add(delta);
        self.prev = Some((ts, delta));
        Ok(ts)
    }
}

/// XOR float encoder.
#[derive(Debug, Default)]
pub struct ValueEncoder {
    prev: Option<u64>,
    window: Option<(u32, u32)>,
}

impl ValueEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one value.
    pub fn encode(&mut self, value: f64, out: &mut BitWriter) {
        let bits = value.to_bits();
        let Some(prev) = self.prev else {
            out.write_bits(bits, 64);
            self.prev = Some(bits);
            return;
        };
        self.prev = Some(bits);

        let xor = bits ^ prev;
        if xor == 0 {
            out.write_bit(false);
            return;
        }

        let leading = xor.leading_zeros().min(MAX_LEADING);
        let trailing = xor.trailing_zeros();

        if let Some((prev_leading, prev_trailing)) = self.window {
            if leading >= prev_leading && trailing >= prev_trailing {
                let meaningful = 64 - prev_leading - prev_trailing;
                out.write_bits(0b10, 2);
                out.write_bits(xor >> prev_trailing, meaningful);
                return;
            }
        }

        // `leading` is capped so the window may start inside leading zeros.
        let meaningful = 64 - leading - trailing;
        out.write_bits(0b11, 2);
        out.write_bits(u64::from(leading), 5);
        out.write_bits(u64::from(meaningful - 1), 6);
        out.write_bits(xor >> trailing, meaningful);
        self.window = Some((leading, trailing));
    }
}

/// XOR float decoder.
#[derive(Debug)]
pub struct ValueDecoder<'a> {
    reader: BitReader<'a>,
    prev: Option<u64>,
    window: Option<(u32, u32)>,
}

impl<'a> ValueDecoder<'a> {
    /// Creates a decoder over `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(bytes),
            prev: None,
            window: None,
        }
    }

    /// Decodes the next value.
    pub fn decode_next(&mut self) -> Result<f64> {
        let Some(prev) = self.prev else {
            let bits = self.reader.read_bits(64)?;
            self.prev = Some(bits);
            return Ok(f64::from_bits(bits));
        };

        let xor = if !self.reader.read_bit()? {
            0
        } else if !self.reader.read_bit()? {
            let (leading, trailing) = self
                .window
                .ok_or_else(|| MigrateError::Codec("window reuse before any window".into()))?;
            self.reader.read_bits(64 - leading - trailing)? << trailing
        } else {
            let leading = self.reader.read_bits(5)? as u32;
            let meaningful = self.reader.read_bits(6)? as u32 + 1;
            if leading + meaningful > 64 {
                return Err(MigrateError::Codec(format!(
                    "window {}+{} exceeds 64 bits",
                    leading, meaningful
                )));
            }
            let trailing = 64 - leading - meaningful;
            self.window = Some((leading, trailing));
            self.reader.read_bits(meaningful)? << trailing
        };

        let bits = prev ^ xor;
        self.prev = Some(bits);
        Ok(f64::from_bits(bits))
    }
}

/// Encoded timestamps and values of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlock {
    /// Delta-of-delta timestamp stream.
    pub timestamps: Vec<u8>,
    /// XOR value stream.
    pub values: Vec<u8>,
    /// Number of points.
    pub count: u32,
}

/// Encodes points in the given order.
///
/// # Example
///
/// ```rust,ignore
/// let block = encode(&[(1_000_000_000, 1.0), (2_000_000_000, 1.5)]);
/// assert_eq!(decode(&block.timestamps, &block.values, block.count)?.len(), 2);
/// ```
pub fn encode(points: &[(i64, f64)]) -> EncodedBlock {
    let mut ts_out = BitWriter::new();
    let mut val_out = BitWriter::new();
    let mut ts_encoder = TimestampEncoder::new();
    let mut val_encoder = ValueEncoder::new();

    for &(ts, value) in points {
        ts_encoder.encode(ts, &mut ts_out);
        val_encoder.encode(value, &mut val_out);
    }

    EncodedBlock {
        timestamps: ts_out.into_bytes(),
        values: val_out.into_bytes(),
        count: points.len() as u32,
    }
}

/// Decodes `count` points.
///
/// # Errors
///
/// Returns [`MigrateError::Codec`] if either stream ends early or is malformed.
pub fn decode(timestamps: &[u8], values: &[u8], count: u32) -> Result<Vec<(i64, f64)>> {
    let mut ts_decoder = TimestampDecoder::new(timestamps);
    let mut val_decoder = ValueDecoder::new(values);
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        points.push((ts_decoder.decode_next()?, val_decoder.decode_next()?));
    }
    Ok(points)
}
