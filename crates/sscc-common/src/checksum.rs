//! Checksum utilities for file verification

use crate::error::{Result, SsccError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 digest and line count of a file, taken at one point in time.
///
/// A snapshot is never mutated; drift is detected by capturing a fresh one
/// and comparing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// Lowercase hex SHA-256 of the file contents
    pub hash: String,
    /// Number of lines; a trailing unterminated line counts
    pub line_count: u64,
}

impl FileSnapshot {
    /// Hash and count lines of a file in one streaming pass
    pub fn capture(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        Self::from_reader(&mut file)
    }

    /// Hash and count lines of any readable source
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut line_count = 0u64;
        let mut last_byte = None;

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            let chunk = &buffer[..bytes_read];
            hasher.update(chunk);
            line_count += chunk.iter().filter(|&&b| b == b'\n').count() as u64;
            last_byte = chunk.last().copied();
        }

        if matches!(last_byte, Some(b) if b != b'\n') {
            line_count += 1;
        }

        Ok(Self {
            hash: hex::encode(hasher.finalize()),
            line_count,
        })
    }

    /// Fail with [`SsccError::ChecksumMismatch`] unless `current` hashes the same
    pub fn ensure_unchanged(&self, current: &FileSnapshot) -> Result<()> {
        if self.hash == current.hash {
            Ok(())
        } else {
            Err(SsccError::ChecksumMismatch {
                expected: self.hash.clone(),
                actual: current.hash.clone(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_snapshot_sha256() {
        let mut cursor = Cursor::new(b"hello world");
        let snapshot = FileSnapshot::from_reader(&mut cursor).unwrap();
        assert_eq!(
            snapshot.hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(snapshot.line_count, 1);
    }

    #[test]
    fn test_snapshot_line_counting() {
        let count = |data: &[u8]| {
            FileSnapshot::from_reader(&mut Cursor::new(data))
                .unwrap()
                .line_count
        };
        assert_eq!(count(b""), 0);
        assert_eq!(count(b"a\n"), 1);
        assert_eq!(count(b"a\nb\n"), 2);
        assert_eq!(count(b"a\nb"), 2);
    }

    #[test]
    fn test_snapshot_detects_single_byte_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.txt");
        std::fs::write(&path, "111111101000000002\n111111101000000019\n").unwrap();

        let before = FileSnapshot::capture(&path).unwrap();
        assert!(before.ensure_unchanged(&FileSnapshot::capture(&path).unwrap()).is_ok());

        std::fs::write(&path, "111111101000000003\n111111101000000019\n").unwrap();
        let after = FileSnapshot::capture(&path).unwrap();
        assert_eq!(before.line_count, after.line_count);
        assert!(matches!(
            before.ensure_unchanged(&after),
            Err(SsccError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_snapshot_spans_read_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        for _ in 0..10_000 {
            writeln!(file, "111111101000000002").unwrap();
        }
        drop(file);

        let snapshot = FileSnapshot::capture(&path).unwrap();
        assert_eq!(snapshot.line_count, 10_000);
        assert_eq!(snapshot.hash.len(), 64);
    }
}
