use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::codec::{AudioCodingMode, CodecContext};

/// Result returned when an encoded stream file is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStreamResult {
    pub file_path: PathBuf,
    pub bytes_written: u64,
    pub checksum: String,
}

/// Metadata stored alongside an encoded stream.
///
/// Serializable for a JSON sidecar next to the stream file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedStreamMetadata {
    pub id: String,
    pub created_at: String,
    pub file_path: String,
    pub checksum: String,
    pub bytes_written: u64,
    pub frames: u64,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub coding_mode: AudioCodingMode,
    pub has_lfe: bool,
    pub bitrate_kbps: u32,
}

impl EncodedStreamMetadata {
    /// Creates metadata for a finished stream produced with `context`.
    ///
    /// `samples_per_frame` is the codec frame length per channel, used to derive the duration.
    pub fn new(
        result: &EncodedStreamResult,
        context: &CodecContext,
        frames: u64,
        samples_per_frame: usize,
    ) -> Self {
        let duration_secs = frames as f64 * samples_per_frame as f64 / context.sample_rate as f64;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            file_path: result.file_path.to_string_lossy().into_owned(),
            checksum: result.checksum.clone(),
            bytes_written: result.bytes_written,
            frames,
            duration_secs,
            sample_rate: context.sample_rate,
            channels: context.channels,
            coding_mode: context.coding_mode,
            has_lfe: context.has_lfe,
            bitrate_kbps: context.bitrate_kbps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::codec::A52_SAMPLES_PER_FRAME;

    #[test]
    fn duration_follows_frame_count() {
        let result = EncodedStreamResult {
            file_path: PathBuf::from("out.ac3"),
            bytes_written: 1000,
            checksum: "abc".into(),
        };
        let context = CodecContext::surround_5_1(48000);
        let metadata = EncodedStreamMetadata::new(&result, &context, 125, A52_SAMPLES_PER_FRAME);

        approx::assert_relative_eq!(metadata.duration_secs, 4.0);
        assert_eq!(metadata.file_path, "out.ac3");
        assert_eq!(metadata.channels, 6);
        assert!(!metadata.id.is_empty());
    }
}
