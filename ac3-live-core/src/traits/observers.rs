use crate::models::events::{FrameEncoded, PlaybackStopped};

/// Receives render engine notifications.
///
/// Called from the playback thread. Implementations must not call control
/// methods of the engine from inside the callback; doing so fails with
/// `StreamError::InvalidCallContext`.
pub trait PlaybackObserver: Send + Sync {
    /// Called exactly once each time the playback thread exits.
    fn on_stopped(&self, event: &PlaybackStopped);
}

/// Receives a notification for every frame a `FrameAccumulator` completes.
///
/// Called on the thread that drives the accumulator, after the frame bytes
/// were handed to the sink.
pub trait FrameObserver: Send + Sync {
    fn on_frame_encoded(&self, event: &FrameEncoded);
}
