//! Streaming sample-rate conversion using rubato.
//!
//! Unlike a one-shot resample, [`StreamResampler`] keeps the interpolator
//! state and any unconsumed input between calls, so audio can be pushed in
//! chunks of any size without phase jumps. The filter delay is trimmed from
//! the front and [`StreamResampler::finish`] flushes the tail, so the total
//! output length is `input_frames * target_rate / source_rate` (rounded).

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

use crate::models::error::StreamError;

/// Input frames per rubato call.
const CHUNK_FRAMES: usize = 1024;

/// Upper bound on zero-padded flush calls at end of stream.
const MAX_FLUSH_CHUNKS: usize = 16;

pub struct StreamResampler {
    resampler: FastFixedIn<f32>,
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    /// Planar input not yet consumed by the resampler.
    input: Vec<Vec<f32>>,
    /// Output frames still to discard for the filter delay.
    delay: usize,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Result<Self, StreamError> {
        if source_rate == 0 || target_rate == 0 || channels == 0 {
            return Err(StreamError::UnsupportedFormat(format!(
                "cannot resample {}Hz to {}Hz with {} channels",
                source_rate, target_rate, channels
            )));
        }

        let resampler = FastFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| StreamError::UnsupportedFormat(format!("failed to create resampler: {}", e)))?;

        log::debug!(
            "Resampling {}Hz to {}Hz ({} channels), delay {} frames",
            source_rate,
            target_rate,
            channels,
            resampler.output_delay()
        );

        Ok(Self {
            delay: resampler.output_delay(),
            resampler,
            channels,
            source_rate,
            target_rate,
            input: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Input frames still needed before the next chunk can be processed.
    pub fn input_needed(&self) -> usize {
        self.resampler.input_frames_next().saturating_sub(self.buffered_frames())
    }

    fn buffered_frames(&self) -> usize {
        self.input.first().map_or(0, Vec::len)
    }

    /// Push interleaved samples; converted interleaved samples are appended to `out`.
    pub fn push(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<(), StreamError> {
        for frame in samples.chunks_exact(self.channels) {
            for (channel, &sample) in self.input.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        self.frames_in += (samples.len() / self.channels) as u64;

        loop {
            let needed = self.resampler.input_frames_next();
            if self.buffered_frames() < needed {
                return Ok(());
            }
            let chunk: Vec<&[f32]> = self.input.iter().map(|c| &c[..needed]).collect();
            let planar = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| StreamError::InvalidState(format!("resampling failed: {}", e)))?;
            for channel in &mut self.input {
                channel.drain(..needed);
            }
            self.emit(&planar, out, None);
        }
    }

    /// Flush buffered input and the filter tail at end of stream.
    pub fn finish(&mut self, out: &mut Vec<f32>) -> Result<(), StreamError> {
        let expected = self.expected_frames();

        if self.buffered_frames() > 0 {
            let planar = self
                .resampler
                .process_partial(Some(self.input.as_slice()), None)
                .map_err(|e| StreamError::InvalidState(format!("resampling failed: {}", e)))?;
            for channel in &mut self.input {
                channel.clear();
            }
            self.emit(&planar, out, Some(expected));
        }

        for _ in 0..MAX_FLUSH_CHUNKS {
            if self.frames_out >= expected {
                break;
            }
            let planar = self
                .resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| StreamError::InvalidState(format!("resampling failed: {}", e)))?;
            if planar.first().map_or(true, Vec::is_empty) {
                break;
            }
            self.emit(&planar, out, Some(expected));
        }
        Ok(())
    }

    fn expected_frames(&self) -> u64 {
        let source = self.source_rate as u64;
        (self.frames_in * self.target_rate as u64 + source / 2) / source
    }

    /// Interleave `planar` into `out`, dropping the delay and anything past `limit` total frames.
    fn emit(&mut self, planar: &[Vec<f32>], out: &mut Vec<f32>, limit: Option<u64>) {
        let frames = planar.first().map_or(0, Vec::len);
        let skip = self.delay.min(frames);
        self.delay -= skip;

        let mut end = frames;
        if let Some(limit) = limit {
            let room = limit.saturating_sub(self.frames_out) as usize;
            end = end.min(skip + room);
        }

        out.reserve((end - skip) * self.channels);
        for i in skip..end {
            for channel in planar {
                out.push(channel[i]);
            }
        }
        self.frames_out += (end - skip) as u64;
    }
}
