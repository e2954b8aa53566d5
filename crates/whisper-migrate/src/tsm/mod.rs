//! Native block file format of the destination engine.
//!
//! - [`codec`]: Gorilla timestamp/value compression
//! - [`file`]: block file writer and verifying reader

pub mod codec;
pub mod file;

pub use codec::{decode, encode, EncodedBlock};
pub use file::{BlockEntry, BloomFilter, KeyIndex, TsmDataBlock, TsmFooter, TsmHeader, TsmReader, TsmWriter};

use crate::error::{MigrateError, Result};

/// Nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Converts a Unix-seconds timestamp to engine-native nanoseconds.
///
/// # Errors
///
/// Returns [`MigrateError::Codec`] if the result overflows.
pub fn seconds_to_nanos(seconds: i64) -> Result<Timestamp> {
    seconds
        .checked_mul(NANOS_PER_SECOND)
        .ok_or_else(|| MigrateError::Codec(format!("timestamp {}s overflows nanoseconds", seconds)))
}
