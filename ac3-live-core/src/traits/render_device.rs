use std::sync::Arc;
use std::time::Duration;

use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, ShareMode};

/// Answer to a format support query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSupport {
    Supported,
    /// Not supported as requested, but the device proposes this format instead.
    ClosestMatch(AudioFormat),
    Unsupported,
}

impl FormatSupport {
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported)
    }
}

/// Parameters for opening the hardware stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub share_mode: ShareMode,
    pub format: AudioFormat,
    /// Requested buffer depth (zero lets the device choose).
    pub buffer_duration: Duration,
    /// Device period; only meaningful for exclusive event-driven streams.
    pub periodicity: Duration,
    /// Whether the device signals a [`BufferEvent`] when it wants more data.
    pub event_callback: bool,
}

/// A wait primitive signaled by the device each time buffer space frees up.
pub trait BufferEvent: Send + Sync {
    /// Blocks until the event is signaled or `timeout` elapses.
    ///
    /// Returns `true` if signaled, `false` on timeout.
    fn wait(&self, timeout: Duration) -> bool;
}

/// An output endpoint as seen by the render engine.
///
/// Method names follow the hardware contract: frames are interleaved sample
/// frames of the initialized format, padding is the number of frames still
/// queued in the hardware buffer.
pub trait RenderDevice: Send {
    /// Whether the device can open a stream in `format`.
    fn is_format_supported(&self, share_mode: ShareMode, format: &AudioFormat) -> FormatSupport;

    /// The shared-mode mixer format, if the device reports one.
    fn mix_format(&self) -> Option<AudioFormat>;

    /// The device's native format (used as the exclusive-mode search base).
    fn device_format(&self) -> Option<AudioFormat>;

    /// Open the hardware stream.
    ///
    /// Fails with [`StreamError::BufferSizeNotAligned`] when the requested
    /// duration does not fit the device period; [`RenderDevice::buffer_size`]
    /// then reports the aligned frame count.
    fn initialize(&mut self, params: &StreamParams) -> Result<(), StreamError>;

    /// Hardware buffer capacity in frames.
    fn buffer_size(&self) -> Result<u32, StreamError>;

    /// Frames queued in the hardware buffer and not yet played.
    fn current_padding(&self) -> Result<u32, StreamError>;

    /// Latency the device actually applies (zero if unknown).
    fn stream_latency(&self) -> Duration {
        Duration::ZERO
    }

    /// Create the buffer event and register it with the stream.
    fn create_event_handle(&mut self) -> Result<Arc<dyn BufferEvent>, StreamError>;

    /// Copy `frames` frames from `data` into the hardware buffer.
    fn write_frames(&mut self, data: &[u8], frames: u32) -> Result<(), StreamError>;

    fn start(&mut self) -> Result<(), StreamError>;

    fn stop(&mut self) -> Result<(), StreamError>;

    /// Flush queued frames; the stream must be stopped.
    fn reset(&mut self) -> Result<(), StreamError>;

    /// Release the stream. The device can be initialized again afterwards.
    fn release(&mut self);

    /// Called on the playback thread before the run loop (scheduling registration).
    fn enter_render_thread(&mut self, _latency: Duration) -> Result<(), StreamError> {
        Ok(())
    }

    /// Called on the playback thread after the run loop.
    fn leave_render_thread(&mut self) {}
}
