use thiserror::Error;

/// Errors raised by the render engine, the encoder and the capture bridge.
///
/// Payloads are plain strings so the error can be cloned into notifications
/// (see `PlaybackStopped`) and compared in tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("control method called from the playback thread")]
    InvalidCallContext,

    #[error("object disposed: {0}")]
    ObjectDisposed(&'static str),

    #[error("not initialized")]
    NotInitialized,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("codec initialization failed: {0}")]
    InitializationFailed(String),

    #[error("encoding error (codec returned {0})")]
    EncodingError(i32),

    #[error("encoding was already completed")]
    EncodingAlreadyComplete,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("hardware buffer size not aligned")]
    BufferSizeNotAligned,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("device error: {0}")]
    Device(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("thread error: {0}")]
    Thread(String),
}

impl StreamError {
    /// Creates a device error from anything displayable (HRESULTs, backend errors).
    pub fn device(reason: impl std::fmt::Display) -> Self {
        Self::Device(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            StreamError::EncodingError(-1).to_string(),
            "encoding error (codec returned -1)"
        );
        assert_eq!(
            StreamError::ObjectDisposed("RenderEngine").to_string(),
            "object disposed: RenderEngine"
        );
        assert_eq!(StreamError::device("E_FAIL").to_string(), "device error: E_FAIL");
    }
}
