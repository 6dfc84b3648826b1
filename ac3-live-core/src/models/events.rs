use super::codec::CodecStatus;
use super::error::StreamError;

/// Raised once per playback-thread lifetime when it exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStopped {
    /// The error that ended playback, or `None` for `stop()` / end of stream.
    pub error: Option<StreamError>,
}

impl PlaybackStopped {
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Raised once per frame the codec completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoded {
    /// 1-based, gap-free within one accumulator.
    pub frame_number: u64,
    /// Encoded size in bytes.
    pub size: usize,
    pub status: CodecStatus,
}

/// Counters kept by the capture bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeDiagnostics {
    pub callback_count: u64,
    pub frames_captured: u64,
    pub mismatched_blocks: u64,
    pub batches_enqueued: u64,
    pub batches_dropped: u64,
    pub batches_encoded: u64,
    pub frames_encoded: u64,
    pub bytes_encoded: u64,
}
