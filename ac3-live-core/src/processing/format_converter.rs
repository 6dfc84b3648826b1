use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, SampleEncoding};
use crate::processing::resampler::StreamResampler;
use crate::processing::sample_convert::{adapt_channels, decode_to_f32, encode_from_f32};
use crate::traits::wave_source::WaveSource;

/// Wraps a [`WaveSource`] and converts its output to another PCM/float format.
///
/// Inserted by the render engine when negotiation settles on a format that
/// differs from the source's. Converts sample encoding, channel count and
/// sample rate. The resampler is stateful across reads.
pub struct ConvertingSource<S> {
    inner: S,
    source_format: AudioFormat,
    target_format: AudioFormat,
    /// Source bytes that did not make up a whole frame yet.
    partial: Vec<u8>,
    /// Converted bytes not yet handed out.
    pending: Vec<u8>,
    scratch: Vec<u8>,
    resampler: Option<StreamResampler>,
    exhausted: bool,
}

impl<S: WaveSource> ConvertingSource<S> {
    pub fn new(inner: S, target_format: AudioFormat) -> Result<Self, StreamError> {
        let source_format = inner.format();
        for format in [&source_format, &target_format] {
            if format.encoding == SampleEncoding::Compressed {
                return Err(StreamError::UnsupportedFormat(format!(
                    "cannot convert compressed stream {} to {}",
                    source_format, target_format
                )));
            }
            format.validate().map_err(StreamError::UnsupportedFormat)?;
        }

        let resampler = if source_format.sample_rate != target_format.sample_rate {
            Some(StreamResampler::new(
                source_format.sample_rate,
                target_format.sample_rate,
                target_format.channels as usize,
            )?)
        } else {
            None
        };

        Ok(Self {
            inner,
            source_format,
            target_format,
            partial: Vec::new(),
            pending: Vec::new(),
            scratch: Vec::new(),
            resampler,
            exhausted: false,
        })
    }

    pub fn source_format(&self) -> AudioFormat {
        self.source_format
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Source bytes to request for `target_frames` output frames.
    fn source_bytes_for(&self, target_frames: usize) -> usize {
        let frames = (target_frames as u64 * self.source_format.sample_rate as u64)
            .div_ceil(self.target_format.sample_rate as u64) as usize;
        let needed = self.resampler.as_ref().map_or(0, StreamResampler::input_needed);
        self.source_format.frames_to_bytes(frames.max(needed).max(1))
    }

    fn convert_chunk(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.partial.extend_from_slice(bytes);
        let whole = self.partial.len() - self.partial.len() % self.source_format.block_align();
        if whole == 0 {
            return Ok(());
        }

        let decoded = decode_to_f32(&self.partial[..whole], &self.source_format)?;
        self.partial.drain(..whole);

        let adapted = adapt_channels(
            &decoded,
            self.source_format.channels as usize,
            self.target_format.channels as usize,
        );
        match self.resampler.as_mut() {
            Some(resampler) => {
                let mut resampled = Vec::new();
                resampler.push(&adapted, &mut resampled)?;
                encode_from_f32(&resampled, &self.target_format, &mut self.pending)
            }
            None => encode_from_f32(&adapted, &self.target_format, &mut self.pending),
        }
    }

    /// Flush the resampler tail once the inner source is exhausted.
    fn finish(&mut self) -> Result<(), StreamError> {
        self.exhausted = true;
        if let Some(resampler) = self.resampler.as_mut() {
            let mut tail = Vec::new();
            resampler.finish(&mut tail)?;
            encode_from_f32(&tail, &self.target_format, &mut self.pending)?;
        }
        Ok(())
    }
}

impl<S: WaveSource> WaveSource for ConvertingSource<S> {
    fn format(&self) -> AudioFormat {
        self.target_format
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, StreamError> {
        let target_align = self.target_format.block_align();
        let wanted = buffer.len() - buffer.len() % target_align;
        if wanted == 0 {
            return Ok(0);
        }

        while self.pending.len() < wanted && !self.exhausted {
            let missing_frames = self.target_format.bytes_to_frames(wanted - self.pending.len()).max(1);
            let request = self.source_bytes_for(missing_frames);
            self.scratch.resize(request, 0);
            let read = self.inner.read(&mut self.scratch)?;
            if read == 0 {
                self.finish()?;
                break;
            }
            let chunk = std::mem::take(&mut self.scratch);
            let result = self.convert_chunk(&chunk[..read]);
            self.scratch = chunk;
            result?;
        }

        let available = self.pending.len().min(wanted);
        let available = available - available % target_align;
        buffer[..available].copy_from_slice(&self.pending[..available]);
        self.pending.drain(..available);
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::VecSource;
    use approx::assert_abs_diff_eq;

    fn float_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn converts_float_to_int16_same_rate() {
        let source = VecSource::new(AudioFormat::float(48000, 2), float_bytes(&[0.5, -0.5, 0.25, -0.25]));
        let mut converter = ConvertingSource::new(source, AudioFormat::pcm(48000, 16, 2)).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(converter.read(&mut out).unwrap(), 8);
        let first = i16::from_le_bytes([out[0], out[1]]);
        assert_eq!(first, (0.5 * i16::MAX as f32) as i16);
        assert_eq!(converter.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn downmixes_and_upsamples() {
        // constant stereo at 24 kHz → mono at 48 kHz
        let frames = 2400;
        let source = VecSource::new(AudioFormat::float(24000, 2), float_bytes(&vec![0.5; frames * 2]));
        let mut converter = ConvertingSource::new(source, AudioFormat::float(48000, 1)).unwrap();

        let mut out = vec![0u8; frames * 2 * 4 + 64];
        let read = converter.read(&mut out).unwrap();
        assert_eq!(read, frames * 2 * 4);
        let middle = f32::from_le_bytes([out[frames * 4], out[frames * 4 + 1], out[frames * 4 + 2], out[frames * 4 + 3]]);
        assert_abs_diff_eq!(middle, 0.5, epsilon = 1e-3);
        assert_eq!(converter.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn small_reads_keep_the_target_rate() {
        let source = VecSource::new(AudioFormat::float(44100, 1), float_bytes(&vec![0.1; 44100]));
        let mut converter = ConvertingSource::new(source, AudioFormat::float(48000, 1)).unwrap();

        let mut out = [0u8; 7 * 4];
        let mut total = 0;
        loop {
            let read = converter.read(&mut out).unwrap();
            if read == 0 {
                break;
            }
            total += read;
        }
        assert_eq!(total / 4, 48000);
    }

    #[test]
    fn output_is_frame_aligned() {
        let source = VecSource::new(AudioFormat::float(48000, 2), float_bytes(&[0.1; 8]));
        let mut converter = ConvertingSource::new(source, AudioFormat::pcm(48000, 16, 2)).unwrap();

        let mut out = [0u8; 7];
        assert_eq!(converter.read(&mut out).unwrap(), 4);
    }

    #[test]
    fn rejects_compressed_streams() {
        let source = VecSource::new(AudioFormat::new(48000, 16, 2, SampleEncoding::Compressed), vec![]);
        assert!(matches!(
            ConvertingSource::new(source, AudioFormat::pcm(48000, 16, 2)),
            Err(StreamError::UnsupportedFormat(_))
        ));
    }
}
