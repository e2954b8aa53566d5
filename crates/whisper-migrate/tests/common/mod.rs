//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Writes a single-archive whisper file with `points` in consecutive slots.
///
/// The archive holds `capacity` slots of `step` seconds; unused slots stay zero.
pub fn write_whisper(path: &Path, step: u32, capacity: u32, points: &[(u32, f64)]) -> PathBuf {
    assert!(points.len() <= capacity as usize);
    let header_len = 16 + 12;
    let mut buf = Vec::new();
    buf.extend_from_slice(&1u32.to_be_bytes()); // average
    buf.extend_from_slice(&(step * capacity).to_be_bytes());
    buf.extend_from_slice(&0.5f32.to_be_bytes());
    buf.extend_from_slice(&1u32.to_be_bytes());

    buf.extend_from_slice(&(header_len as u32).to_be_bytes());
    buf.extend_from_slice(&step.to_be_bytes());
    buf.extend_from_slice(&capacity.to_be_bytes());

    for &(ts, value) in points {
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&value.to_be_bytes());
    }
    buf.resize(header_len + capacity as usize * 12, 0);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, buf).unwrap();
    path.to_path_buf()
}
