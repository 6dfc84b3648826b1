use std::sync::Arc;

use crate::models::device::DeviceInfo;
use crate::models::error::StreamError;

/// Callback invoked when a captured block is available.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples in the device's native channel order.
/// - `sample_rate`: The actual sample rate of the delivered audio.
/// - `channels`: Number of interleaved channels.
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], u32, u16) + Send + Sync + 'static>;

/// Interface for platform-specific capture sources.
///
/// Implemented by `WasapiCapture` on Windows and by test doubles.
pub trait CaptureProvider: Send {
    /// Whether this capture source is currently available.
    fn is_available(&self) -> bool;

    /// Start capturing audio, delivering blocks via `callback`.
    ///
    /// The callback fires on a dedicated audio thread and must return quickly.
    fn start(&mut self, callback: AudioBufferCallback) -> Result<(), StreamError>;

    /// Stop capturing and release resources.
    fn stop(&mut self) -> Result<(), StreamError>;

    /// Information about the endpoint backing this provider.
    fn device_info(&self) -> DeviceInfo;
}
