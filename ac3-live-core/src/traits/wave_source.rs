use crate::models::error::StreamError;
use crate::models::format::AudioFormat;

/// A pull-based byte source the render engine plays from.
pub trait WaveSource: Send {
    /// Format of the bytes returned by [`WaveSource::read`].
    fn format(&self) -> AudioFormat;

    /// Fill `buffer` with up to `buffer.len()` bytes.
    ///
    /// Returns the number of bytes written; `0` means end of stream.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StreamError>;
}

impl<T: WaveSource + ?Sized> WaveSource for Box<T> {
    fn format(&self) -> AudioFormat {
        (**self).format()
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StreamError> {
        (**self).read(buffer)
    }
}
