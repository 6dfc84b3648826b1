use std::marker::PhantomData;

use crate::models::codec::{CodecContext, A52_SAMPLES_PER_FRAME};
use crate::models::error::StreamError;
use crate::traits::codec::{FrameCodec, Sample};

/// Pure-Rust [`FrameCodec`] that emits each frame's samples unchanged as
/// little-endian bytes.
///
/// Runs the pipeline end to end without the native encoder library; the
/// output is a headerless PCM stream, not an A/52 bitstream.
#[derive(Debug)]
pub struct RawFrameCodec<S> {
    context: CodecContext,
    samples_per_frame: usize,
    scratch: Vec<u8>,
    closed: bool,
    _sample: PhantomData<fn() -> S>,
}

impl<S: Sample> RawFrameCodec<S> {
    pub fn open(context: CodecContext) -> Result<Self, StreamError> {
        context.validate().map_err(StreamError::InitializationFailed)?;
        if context.sample_format != S::FORMAT {
            return Err(StreamError::InitializationFailed(format!(
                "context declares {:?} samples, codec takes {:?}",
                context.sample_format,
                S::FORMAT
            )));
        }
        Ok(Self {
            context,
            samples_per_frame: A52_SAMPLES_PER_FRAME,
            scratch: Vec::new(),
            closed: false,
            _sample: PhantomData,
        })
    }

    /// Override the frame length (samples per channel).
    pub fn with_samples_per_frame(mut self, samples_per_frame: usize) -> Self {
        self.samples_per_frame = samples_per_frame.max(1);
        self
    }
}

impl<S: Sample> FrameCodec<S> for RawFrameCodec<S> {
    fn context(&self) -> &CodecContext {
        &self.context
    }

    fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    fn max_frame_size(&self) -> usize {
        self.samples_per_frame * self.context.channels as usize * S::FORMAT.bytes_per_sample()
    }

    fn encode_frame(&mut self, frame_buffer: &mut [u8], samples: &[S], samples_per_channel: usize) -> i32 {
        if self.closed {
            return -1;
        }
        // Nothing is held back, so a flush has nothing to emit.
        if samples_per_channel == 0 {
            return 0;
        }

        let count = samples_per_channel * self.context.channels as usize;
        let Some(samples) = samples.get(..count) else {
            return -2;
        };
        self.scratch.clear();
        for &sample in samples {
            sample.write_le(&mut self.scratch);
        }
        let Some(target) = frame_buffer.get_mut(..self.scratch.len()) else {
            return -3;
        };
        target.copy_from_slice(&self.scratch);
        self.scratch.len() as i32
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::codec::SampleFormat;

    fn context(sample_format: SampleFormat) -> CodecContext {
        CodecContext {
            sample_format,
            ..CodecContext::stereo(48000)
        }
    }

    #[test]
    fn emits_samples_as_le_bytes() {
        let mut codec = RawFrameCodec::<i16>::open(context(SampleFormat::I16))
            .unwrap()
            .with_samples_per_frame(2);
        let mut frame = vec![0u8; FrameCodec::<i16>::max_frame_size(&codec)];

        let size = codec.encode_frame(&mut frame, &[1, -1, 256, 0], 2);

        assert_eq!(size, 8);
        assert_eq!(&frame[..8], &[1, 0, 0xFF, 0xFF, 0, 1, 0, 0]);
        assert_eq!(codec.encode_frame(&mut frame, &[], 0), 0);
    }

    #[test]
    fn open_validates_context() {
        assert!(matches!(
            RawFrameCodec::<f32>::open(context(SampleFormat::I16)),
            Err(StreamError::InitializationFailed(_))
        ));
        assert!(matches!(
            RawFrameCodec::<f32>::open(CodecContext::stereo(96000)),
            Err(StreamError::InitializationFailed(_))
        ));
    }

    #[test]
    fn closed_codec_reports_error() {
        let mut codec = RawFrameCodec::<f32>::open(context(SampleFormat::F32)).unwrap();
        FrameCodec::<f32>::close(&mut codec);
        let mut frame = vec![0u8; 16];
        assert!(codec.encode_frame(&mut frame, &[0.0; 2], 1) < 0);
    }
}
