use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::StreamError;
use crate::models::stream_result::EncodedStreamResult;
use crate::traits::byte_sink::ByteSink;

/// Streaming writer for an encoded frame stream.
///
/// The file is the plain concatenation of frame payloads in the order they
/// were written; there is no container header. The SHA-256 digest is
/// computed incrementally, so closing does not re-read the file.
///
/// ```text
/// [frame 1][frame 2][frame 3]...
/// ```
pub struct EncodedStreamWriter {
    file_path: PathBuf,
    file: Option<BufWriter<File>>,
    hasher: Sha256,
    total_bytes_written: u64,
}

impl EncodedStreamWriter {
    /// Create the file (and its directory) for writing.
    pub fn create(file_path: impl Into<PathBuf>) -> Result<Self, StreamError> {
        let file_path = file_path.into();
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StreamError::StorageError(format!("failed to create directory: {}", e)))?;
            }
        }

        let file = File::create(&file_path)
            .map_err(|e| StreamError::StorageError(format!("failed to create file: {}", e)))?;
        log::debug!("Encoded stream opened: {}", file_path.display());

        Ok(Self {
            file_path,
            file: Some(BufWriter::new(file)),
            hasher: Sha256::new(),
            total_bytes_written: 0,
        })
    }

    /// Flush, close the file and return its size and checksum.
    pub fn close(&mut self) -> Result<EncodedStreamResult, StreamError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| StreamError::StorageError("file is not open".into()))?;
        file.flush().map_err(|e| StreamError::StorageError(e.to_string()))?;

        let checksum = hex_encode(&std::mem::take(&mut self.hasher).finalize());
        log::debug!(
            "Encoded stream closed: {} ({} bytes)",
            self.file_path.display(),
            self.total_bytes_written
        );
        Ok(EncodedStreamResult {
            file_path: self.file_path.clone(),
            bytes_written: self.total_bytes_written,
            checksum,
        })
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl ByteSink for EncodedStreamWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StreamError::StorageError("file is not open for writing".into()))?;
        file.write_all(bytes)
            .map_err(|e| StreamError::StorageError(format!("write failed: {}", e)))?;
        self.hasher.update(bytes);
        self.total_bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        match self.file.as_mut() {
            Some(file) => file.flush().map_err(|e| StreamError::StorageError(e.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for EncodedStreamWriter {
    fn drop(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                log::warn!("Failed to flush {} on drop: {}", self.file_path.display(), e);
            }
        }
    }
}

/// SHA-256 hex digest of a file on disk.
pub fn sha256_file(path: &Path) -> Result<String, StreamError> {
    let data =
        fs::read(path).map_err(|e| StreamError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    Ok(hex_encode(&Sha256::digest(&data)))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ac3_live_test_{}_{}", std::process::id(), name))
    }

    #[test]
    fn frames_are_concatenated() {
        let path = temp_file_path("concat.ac3");
        let mut writer = EncodedStreamWriter::create(&path).unwrap();

        writer.write(&[1, 2, 3]).unwrap();
        writer.write(&[4, 5]).unwrap();
        writer.flush().unwrap();
        let result = writer.close().unwrap();

        assert_eq!(result.bytes_written, 5);
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn checksum_matches_file_contents() {
        let path = temp_file_path("checksum.ac3");
        let mut writer = EncodedStreamWriter::create(&path).unwrap();
        writer.write(&[0x42; 1000]).unwrap();
        let result = writer.close().unwrap();

        assert_eq!(result.checksum.len(), 64);
        assert_eq!(result.checksum, sha256_file(&path).unwrap());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_stream_has_empty_digest() {
        let path = temp_file_path("empty.ac3");
        let result = EncodedStreamWriter::create(&path).unwrap().close().unwrap();

        assert_eq!(result.bytes_written, 0);
        assert_eq!(
            result.checksum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        fs::remove_file(&path).ok();
    }

    #[test]
    fn write_after_close_fails() {
        let path = temp_file_path("closed.ac3");
        let mut writer = EncodedStreamWriter::create(&path).unwrap();
        writer.close().unwrap();

        assert!(!writer.is_open());
        assert!(matches!(writer.write(&[1]), Err(StreamError::StorageError(_))));
        assert!(writer.close().is_err());
        fs::remove_file(&path).ok();
    }
}
