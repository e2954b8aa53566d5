//! Integration tests for the block file format.

use tempfile::TempDir;
use whisper_migrate::tsm::{seconds_to_nanos, TsmReader, TsmWriter, NANOS_PER_SECOND};
use whisper_migrate::MigrateError;

/// Helper function to generate test points.
fn generate_points(start: i64, interval: i64, count: usize, base_value: f64) -> Vec<(i64, f64)> {
    (0..count)
        .map(|i| (start + i as i64 * interval, base_value + i as f64 * 0.5))
        .collect()
}

#[test]
fn test_large_file_handling() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("000000001-000000002.tsm");

    const NUM_SERIES: usize = 100;
    const POINTS_PER_SERIES: usize = 1000;

    {
        let mut writer = TsmWriter::create(&file_path).unwrap();
        for i in 0..NUM_SERIES {
            let points = generate_points(
                1_577_836_800 * NANOS_PER_SECOND,
                60 * NANOS_PER_SECOND,
                POINTS_PER_SERIES,
                i as f64 * 10.0,
            );
            writer
                .write(&format!("metric,id={}#!~#value", i), &points)
                .unwrap();
        }
        writer.write_index().unwrap();
        writer.close().unwrap();
    }

    let reader = TsmReader::open(&file_path).unwrap();
    assert_eq!(reader.header().key_count, NUM_SERIES as u32);
    assert_eq!(
        reader.footer().total_point_count,
        (NUM_SERIES * POINTS_PER_SERIES) as u64
    );
    for i in 0..NUM_SERIES {
        let points = reader.read_key(&format!("metric,id={}#!~#value", i)).unwrap();
        assert_eq!(points.len(), POINTS_PER_SERIES);
    }
    assert!(reader
        .read_key("metric,id=1000#!~#value")
        .unwrap()
        .is_empty());
    assert_eq!(reader.verify().unwrap(), (NUM_SERIES * POINTS_PER_SERIES) as u64);
}

#[test]
fn test_various_data_patterns() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("patterns.tsm");
    let second = NANOS_PER_SECOND;

    let patterns: Vec<(&str, Vec<(i64, f64)>)> = vec![
        ("constant", (0..100).map(|i| (i * 60 * second, 42.0)).collect()),
        ("increasing", (0..100).map(|i| (i * 60 * second, i as f64)).collect()),
        (
            "oscillation",
            (0..100)
                .map(|i| (i * 10 * second, (i as f64 * 0.5).sin() * 100.0))
                .collect(),
        ),
        // Gaps of a day, well past 32-bit nanosecond deltas
        ("sparse", (0..10).map(|i| (i * 86_400 * second, i as f64 * 10.0)).collect()),
        ("small", (0..100).map(|i| (i * second, i as f64 * 1e-10)).collect()),
        ("large", (0..100).map(|i| (i * second, i as f64 * 1e10)).collect()),
        ("negative", (0..100).map(|i| (i * second, -(i as f64) - 0.25)).collect()),
        // Irregular, with a duplicate timestamp passed through as is
        ("irregular", vec![(0, 1.0), (7 * second, 2.0), (7 * second, 3.0), (1_000 * second, 4.0)]),
    ];

    {
        let mut writer = TsmWriter::create(&file_path).unwrap();
        for (name, points) in &patterns {
            writer.write(&format!("{}#!~#value", name), points).unwrap();
        }
        writer.write_index().unwrap();
        writer.close().unwrap();
    }

    let reader = TsmReader::open(&file_path).unwrap();
    for (name, original) in &patterns {
        let read = reader.read_key(&format!("{}#!~#value", name)).unwrap();
        assert_eq!(&read, original, "pattern {}", name);
    }
}

#[test]
fn test_legacy_seconds_scaled() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("scaled.tsm");
    let legacy = [(1_577_836_800i64, 1.0), (1_577_836_860, 2.0)];
    let values: Vec<(i64, f64)> = legacy
        .iter()
        .map(|&(ts, v)| (seconds_to_nanos(ts).unwrap(), v))
        .collect();

    let mut writer = TsmWriter::create(&file_path).unwrap();
    writer.write("load#!~#value", &values).unwrap();
    writer.write_index().unwrap();
    writer.close().unwrap();

    let reader = TsmReader::open(&file_path).unwrap();
    assert_eq!(reader.header().min_timestamp, 1_577_836_800_000_000_000);
    assert_eq!(reader.header().max_timestamp, 1_577_836_860_000_000_000);
}

#[test]
fn test_truncated_file_detection() {
    let temp_dir = TempDir::new().unwrap();
    let file_path = temp_dir.path().join("truncated.tsm");

    let mut writer = TsmWriter::create(&file_path).unwrap();
    writer
        .write("m#!~#value", &generate_points(0, NANOS_PER_SECOND, 100, 0.0))
        .unwrap();
    writer.write_index().unwrap();
    writer.close().unwrap();

    let contents = std::fs::read(&file_path).unwrap();
    std::fs::write(&file_path, &contents[..contents.len() - 10]).unwrap();

    assert!(matches!(
        TsmReader::open(&file_path),
        Err(MigrateError::InvalidMagic { .. }) | Err(MigrateError::Io(_)) | Err(MigrateError::ChecksumMismatch { .. })
    ));
}
