use crate::models::codec::{CodecContext, CodecStatus, SampleFormat, A52_MAX_CODED_FRAME_SIZE, A52_SAMPLES_PER_FRAME};

/// A sample type the codec boundary accepts.
pub trait Sample: Copy + Default + PartialEq + Send + Sync + 'static {
    /// Tag the codec uses to interpret the sample buffer.
    const FORMAT: SampleFormat;

    /// Value of digital silence (the midpoint for unsigned types).
    const SILENCE: Self;

    /// Append the little-endian encoding of this sample.
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_sample {
    ($ty:ty, $format:expr, $silence:expr) => {
        impl Sample for $ty {
            const FORMAT: SampleFormat = $format;
            const SILENCE: Self = $silence;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_sample!(u8, SampleFormat::U8, 128);
impl_sample!(i8, SampleFormat::I8, 0);
impl_sample!(i16, SampleFormat::I16, 0);
impl_sample!(i32, SampleFormat::I32, 0);
impl_sample!(f32, SampleFormat::F32, 0.0);
impl_sample!(f64, SampleFormat::F64, 0.0);

/// Frame-oriented compression boundary.
///
/// Implementations are opened from a [`CodecContext`] by their own
/// constructor (failing with `StreamError::InitializationFailed`) and are
/// closed exactly once, either explicitly or on drop.
///
/// `encode_frame` result contract:
/// - `> 0`: a frame of that many bytes was written to `frame_buffer`
/// - `0`: the samples were buffered internally, no frame yet
/// - `< 0`: fatal encoding error
///
/// Passing `samples_per_channel == 0` asks the codec to emit a frame it still
/// holds internally (flush).
pub trait FrameCodec<S: Sample>: Send {
    fn context(&self) -> &CodecContext;

    /// Samples per channel the codec consumes per call.
    fn samples_per_frame(&self) -> usize {
        A52_SAMPLES_PER_FRAME
    }

    /// Capacity the frame buffer handed to `encode_frame` must have.
    fn max_frame_size(&self) -> usize {
        A52_MAX_CODED_FRAME_SIZE
    }

    fn encode_frame(&mut self, frame_buffer: &mut [u8], samples: &[S], samples_per_channel: usize) -> i32;

    /// Status of the most recently encoded frame.
    fn status(&self) -> CodecStatus {
        CodecStatus::default()
    }

    fn close(&mut self);
}
