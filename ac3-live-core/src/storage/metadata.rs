use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::StreamError;
use crate::models::stream_result::EncodedStreamMetadata;

/// Path of the JSON sidecar for an encoded stream.
pub fn metadata_path(stream_path: &Path) -> PathBuf {
    stream_path.with_extension("metadata.json")
}

/// Write stream metadata as a JSON sidecar file.
///
/// Creates `{stream}.metadata.json` alongside the stream.
pub fn write_metadata(metadata: &EncodedStreamMetadata, stream_path: &Path) -> Result<(), StreamError> {
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| StreamError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    fs::write(metadata_path(stream_path), json)
        .map_err(|e| StreamError::StorageError(format!("failed to write metadata: {}", e)))?;
    Ok(())
}

/// Read stream metadata from its JSON sidecar file.
pub fn read_metadata(stream_path: &Path) -> Result<EncodedStreamMetadata, StreamError> {
    let json = fs::read_to_string(metadata_path(stream_path))
        .map_err(|e| StreamError::StorageError(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| StreamError::StorageError(format!("failed to parse metadata: {}", e)))
}
