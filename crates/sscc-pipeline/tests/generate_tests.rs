//! Integration tests for the generation pipeline

#![allow(clippy::unwrap_used, clippy::expect_used)]

use indicatif::ProgressBar;
use sscc_common::sscc::{check_digit, SSCC_LEN};
use sscc_common::SerialRange;
use sscc_pipeline::config::GenerateConfig;
use sscc_pipeline::{generate, GenerateError};
use std::collections::HashSet;
use std::path::Path;

fn config(output: &Path, start: u64, end: u64, workers: usize, queue: usize) -> GenerateConfig {
    GenerateConfig {
        extension_digit: "1".to_string(),
        company_prefix: "1111110".to_string(),
        range: SerialRange::new(start, end).unwrap(),
        output_file: output.to_path_buf(),
        write_buffer_bytes: 64 * 1024,
        serial_queue: queue,
        code_queue: queue,
        workers,
    }
}

fn assert_complete(path: &Path, expected: u64) {
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.ends_with('\n'));

    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len() as u64, expected);

    let distinct: HashSet<&str> = lines.iter().copied().collect();
    assert_eq!(distinct.len(), lines.len());

    for line in lines {
        assert_eq!(line.len(), SSCC_LEN);
        assert!(line.bytes().all(|b| b.is_ascii_digit()));
        let check = u32::from(line.as_bytes()[17] - b'0');
        assert_eq!(u32::from(check_digit(&line[..17]).unwrap()), check, "bad check digit in {line}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generates_every_serial_once() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("sscc.txt");

    let summary = generate(&config(&output, 100_000_000, 100_004_999, 6, 256), ProgressBar::hidden())
        .await
        .unwrap();

    assert_eq!(summary.serials, 5_000);
    assert_eq!(summary.lines_written, 5_000);
    assert_complete(&output, 5_000);

    let contents = std::fs::read_to_string(&output).unwrap();
    assert!(contents.contains("111111101000000002\n"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_one_queues_do_not_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("sscc.txt");

    let config = config(&output, 0, 1_999, 8, 1);
    let run = generate(&config, ProgressBar::hidden());
    let summary = tokio::time::timeout(std::time::Duration::from_secs(60), run)
        .await
        .expect("pipeline deadlocked")
        .unwrap();

    assert_eq!(summary.lines_written, 2_000);
    assert_complete(&output, 2_000);
}

#[tokio::test]
async fn test_single_serial_range() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("sscc.txt");

    generate(&config(&output, 5, 5, 3, 4), ProgressBar::hidden())
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&output).unwrap(), "111111100000000050\n");
}

#[tokio::test]
async fn test_unwritable_output_is_fatal() {
    let config = config(Path::new("/nonexistent-dir/sscc.txt"), 0, 9, 2, 4);
    let err = generate(&config, ProgressBar::hidden()).await.unwrap_err();
    assert!(matches!(err, GenerateError::CreateOutput { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_encode_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("sscc.txt");

    // The tail of this range no longer fits the 9-digit serial field
    let config = config(&output, 999_999_000, 1_000_000_500, 4, 16);
    let err = generate(&config, ProgressBar::hidden()).await.unwrap_err();

    assert!(matches!(err, GenerateError::Encode { serial, .. } if serial > 999_999_999));
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_write_failure_cancels_pipeline() {
    let mut config = config(Path::new("/dev/full"), 0, 999_999, 4, 64);
    config.write_buffer_bytes = 64;

    let run = generate(&config, ProgressBar::hidden());
    let err = tokio::time::timeout(std::time::Duration::from_secs(60), run)
        .await
        .expect("pipeline did not stop after write failure")
        .unwrap_err();

    assert!(matches!(err, GenerateError::Write(_)));
}
