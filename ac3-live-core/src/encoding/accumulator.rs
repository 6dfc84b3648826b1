use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::codec::CodecContext;
use crate::models::error::StreamError;
use crate::models::events::FrameEncoded;
use crate::processing::channel_map::ChannelMap;
use crate::traits::byte_sink::ByteSink;
use crate::traits::codec::{FrameCodec, Sample};
use crate::traits::observers::FrameObserver;

/// Upper bound on frames drained from the codec by [`FrameAccumulator::finish`].
const MAX_FLUSH_FRAMES: usize = 16;

/// In-place channel correction applied to each full frame before encoding.
pub type RemapFn<S> = Box<dyn FnMut(&mut [S], &CodecContext) + Send>;

/// Requests an abort from any thread.
///
/// Observed by the accumulator at its next frame boundary.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Cuts an interleaved sample stream into fixed-length codec frames.
///
/// Each codec call receives exactly `samples_per_frame * channels` samples;
/// whatever is left over is carried into the next [`FrameAccumulator::feed`].
/// Splitting a stream across any number of `feed` calls therefore yields the
/// same frames as feeding it at once.
pub struct FrameAccumulator<S: Sample, C: FrameCodec<S>> {
    codec: C,
    channels: usize,
    frame_len: usize,
    /// Holds the carry-over in `[..carry]`, a full frame when encoding.
    work: Vec<S>,
    carry: usize,
    frame_buffer: Vec<u8>,
    frame_number: u64,
    remap: Option<RemapFn<S>>,
    abort: Arc<AtomicBool>,
    done: bool,
    closed: bool,
    observers: Vec<Arc<dyn FrameObserver>>,
}

impl<S: Sample, C: FrameCodec<S>> FrameAccumulator<S, C> {
    pub fn new(codec: C) -> Result<Self, StreamError> {
        let context = *codec.context();
        if context.sample_format != S::FORMAT {
            return Err(StreamError::InvalidArgument(format!(
                "codec expects {:?} samples, accumulator feeds {:?}",
                context.sample_format,
                S::FORMAT
            )));
        }
        let channels = context.channels as usize;
        let frame_len = codec.samples_per_frame() * channels;
        if frame_len == 0 {
            return Err(StreamError::InvalidArgument("codec frame length is zero".into()));
        }
        let frame_buffer = vec![0u8; codec.max_frame_size()];

        Ok(Self {
            codec,
            channels,
            frame_len,
            work: vec![S::default(); frame_len],
            carry: 0,
            frame_buffer,
            frame_number: 0,
            remap: None,
            abort: Arc::new(AtomicBool::new(false)),
            done: false,
            closed: false,
            observers: Vec::new(),
        })
    }

    /// Accumulator that applies `remap` to each full frame before encoding.
    pub fn with_remap(codec: C, remap: RemapFn<S>) -> Result<Self, StreamError> {
        let mut accumulator = Self::new(codec)?;
        accumulator.remap = Some(remap);
        Ok(accumulator)
    }

    /// Accumulator that permutes channels with `map` before encoding.
    pub fn with_channel_map(codec: C, map: ChannelMap) -> Result<Self, StreamError> {
        if map.channels() != codec.context().channels as usize {
            return Err(StreamError::InvalidArgument(format!(
                "channel map covers {} channels, codec has {}",
                map.channels(),
                codec.context().channels
            )));
        }
        Self::with_remap(codec, Box::new(move |samples, _| map.remap_in_place(samples)))
    }

    pub fn add_observer(&mut self, observer: Arc<dyn FrameObserver>) {
        self.observers.push(observer);
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.abort))
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn context(&self) -> &CodecContext {
        self.codec.context()
    }

    /// Interleaved samples per codec frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Samples waiting for the next frame.
    pub fn carry_len(&self) -> usize {
        self.carry
    }

    /// Number of the last emitted frame (0 before the first).
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Encode every full frame available from carry-over plus `samples`.
    ///
    /// `samples` must hold at least `samples_per_channel * channels` samples;
    /// anything beyond that is ignored. Returns the number of frames written
    /// to `sink`.
    pub fn feed(&mut self, samples: &[S], samples_per_channel: usize, sink: &mut dyn ByteSink) -> Result<usize, StreamError> {
        self.check_usable()?;
        let count = samples_per_channel * self.channels;
        if count > samples.len() {
            return Err(StreamError::InvalidArgument(format!(
                "{} samples per channel need {} samples, got {}",
                samples_per_channel,
                count,
                samples.len()
            )));
        }
        let input = &samples[..count];

        let mut produced = 0;
        let mut offset = 0;
        while self.carry + (count - offset) >= self.frame_len {
            if self.abort.swap(false, Ordering::SeqCst) {
                log::debug!("Encoding aborted after frame {}", self.frame_number);
                self.done = true;
                self.carry = 0;
                return Ok(produced);
            }

            let needed = self.frame_len - self.carry;
            self.work[self.carry..].copy_from_slice(&input[offset..offset + needed]);
            offset += needed;
            self.carry = 0;

            if self.encode_work(sink)? {
                produced += 1;
            }
        }

        let rest = count - offset;
        self.work[self.carry..self.carry + rest].copy_from_slice(&input[offset..]);
        self.carry += rest;
        Ok(produced)
    }

    /// Pad the carry-over with silence, encode it, and drain frames the
    /// codec still holds. The accumulator is done afterwards.
    pub fn finish(&mut self, sink: &mut dyn ByteSink) -> Result<usize, StreamError> {
        self.check_usable()?;
        if self.abort.swap(false, Ordering::SeqCst) {
            self.done = true;
            self.carry = 0;
            return Ok(0);
        }

        let mut produced = 0;
        if self.carry > 0 {
            self.work[self.carry..].fill(S::SILENCE);
            self.carry = 0;
            if self.encode_work(sink)? {
                produced += 1;
            }
        }

        for _ in 0..MAX_FLUSH_FRAMES {
            let result = self.codec.encode_frame(&mut self.frame_buffer, &[], 0);
            if !self.emit(result, sink)? {
                break;
            }
            produced += 1;
        }

        self.done = true;
        log::debug!("Encoder finished after {} frames", self.frame_number);
        Ok(produced)
    }

    /// Close the codec. Further calls fail with `ObjectDisposed`.
    pub fn close(&mut self) {
        if !self.closed {
            self.codec.close();
            self.closed = true;
            self.carry = 0;
        }
    }

    fn check_usable(&self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::ObjectDisposed("FrameAccumulator"));
        }
        if self.done {
            return Err(StreamError::EncodingAlreadyComplete);
        }
        Ok(())
    }

    fn encode_work(&mut self, sink: &mut dyn ByteSink) -> Result<bool, StreamError> {
        if let Some(remap) = self.remap.as_mut() {
            remap(&mut self.work, self.codec.context());
        }
        let samples_per_channel = self.frame_len / self.channels;
        let result = self
            .codec
            .encode_frame(&mut self.frame_buffer, &self.work, samples_per_channel);
        self.emit(result, sink)
    }

    /// Act on an `encode_frame` result. Returns whether a frame was emitted.
    fn emit(&mut self, result: i32, sink: &mut dyn ByteSink) -> Result<bool, StreamError> {
        if result == 0 {
            return Ok(false);
        }
        if result < 0 || result as usize > self.frame_buffer.len() {
            self.done = true;
            log::error!("Codec returned {} at frame {}", result, self.frame_number + 1);
            return Err(StreamError::EncodingError(result));
        }

        let size = result as usize;
        if let Err(e) = sink.write(&self.frame_buffer[..size]) {
            self.done = true;
            log::error!("Sink rejected frame {}: {}", self.frame_number + 1, e);
            return Err(e);
        }
        self.frame_number += 1;

        let event = FrameEncoded {
            frame_number: self.frame_number,
            size,
            status: self.codec.status(),
        };
        for observer in &self.observers {
            observer.on_frame_encoded(&event);
        }
        Ok(true)
    }
}

impl<S: Sample, C: FrameCodec<S>> Drop for FrameAccumulator<S, C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::raw_codec::RawFrameCodec;
    use crate::models::codec::{CodecStatus, SampleFormat};
    use crate::test_support::{MockCodec, RecordingFrameObserver, RecordingSink};

    fn stereo_mock(samples_per_frame: usize) -> MockCodec {
        MockCodec::new(CodecContext::stereo(48000)).with_samples_per_frame(samples_per_frame)
    }

    #[test]
    fn three_partial_feeds_make_one_frame() {
        let codec = MockCodec::new(CodecContext::surround_5_1(44100));
        let handle = codec.handle();
        let mut accumulator = FrameAccumulator::<f32, _>::new(codec).unwrap();
        let observer = Arc::new(RecordingFrameObserver::default());
        accumulator.add_observer(observer.clone());
        let mut sink = RecordingSink::new();
        let block = vec![0.25f32; 512 * 6];

        assert_eq!(accumulator.feed(&block, 512, &mut sink).unwrap(), 0);
        assert_eq!(accumulator.feed(&block, 512, &mut sink).unwrap(), 0);
        assert_eq!(handle.call_count(), 0);
        assert_eq!(accumulator.feed(&block, 512, &mut sink).unwrap(), 1);

        assert_eq!(observer.frame_numbers(), vec![1]);
        assert_eq!(handle.calls()[0].samples_per_channel, 1536);
        assert_eq!(accumulator.carry_len(), 0);
        assert_eq!(sink.writes().len(), 1);
    }

    #[test]
    fn split_feeds_match_single_feed() {
        let context = CodecContext {
            sample_format: SampleFormat::I16,
            ..CodecContext::stereo(48000)
        };
        let input: Vec<i16> = (0..2 * 1000).map(|i| i as i16).collect();

        let mut whole_sink = RecordingSink::new();
        let mut whole = FrameAccumulator::new(RawFrameCodec::<i16>::open(context).unwrap().with_samples_per_frame(64)).unwrap();
        whole.feed(&input, 1000, &mut whole_sink).unwrap();

        for split in [1usize, 7, 63, 64, 65, 333] {
            let mut sink = RecordingSink::new();
            let mut accumulator =
                FrameAccumulator::new(RawFrameCodec::<i16>::open(context).unwrap().with_samples_per_frame(64)).unwrap();
            for chunk in input.chunks(split * 2) {
                accumulator.feed(chunk, chunk.len() / 2, &mut sink).unwrap();
            }
            assert_eq!(sink.writes(), whole_sink.writes(), "split every {} frames", split);
            assert_eq!(accumulator.carry_len(), whole.carry_len());
        }
        assert_eq!(whole_sink.writes().len(), 1000 / 64);
    }

    #[test]
    fn frame_numbers_are_gap_free() {
        let mut accumulator = FrameAccumulator::<f32, _>::new(stereo_mock(4)).unwrap();
        let observer = Arc::new(RecordingFrameObserver::default());
        accumulator.add_observer(observer.clone());
        let mut sink = RecordingSink::new();

        accumulator.feed(&[0.0; 2 * 10], 10, &mut sink).unwrap();
        accumulator.feed(&[0.0; 2 * 7], 7, &mut sink).unwrap();

        assert_eq!(observer.frame_numbers(), vec![1, 2, 3, 4]);
        assert_eq!(accumulator.frame_number(), 4);
        assert_eq!(accumulator.carry_len(), 2);
    }

    #[test]
    fn buffered_result_emits_nothing() {
        let codec = stereo_mock(4).with_script([0, 0, 128]);
        let mut accumulator = FrameAccumulator::<f32, _>::new(codec).unwrap();
        let observer = Arc::new(RecordingFrameObserver::default());
        accumulator.add_observer(observer.clone());
        let mut sink = RecordingSink::new();

        let produced = accumulator.feed(&[0.0; 2 * 12], 12, &mut sink).unwrap();

        assert_eq!(produced, 1);
        assert_eq!(sink.writes().len(), 1);
        assert_eq!(observer.frame_numbers(), vec![1]);
        assert_eq!(
            observer.events()[0].status,
            CodecStatus {
                quality: 100,
                bit_rate: 448,
                bandwidth_code: 60
            }
        );
    }

    #[test]
    fn negative_result_is_fatal() {
        let codec = stereo_mock(4).with_script([-3]);
        let mut accumulator = FrameAccumulator::<f32, _>::new(codec).unwrap();
        let mut sink = RecordingSink::new();

        assert_eq!(
            accumulator.feed(&[0.0; 8], 4, &mut sink),
            Err(StreamError::EncodingError(-3))
        );
        assert!(accumulator.is_done());
        assert_eq!(
            accumulator.feed(&[0.0; 8], 4, &mut sink),
            Err(StreamError::EncodingAlreadyComplete)
        );
    }

    #[test]
    fn abort_stops_at_next_frame_boundary() {
        let codec = stereo_mock(4);
        let handle = codec.handle();
        let mut accumulator = FrameAccumulator::<f32, _>::new(codec).unwrap();
        let abort = accumulator.abort_handle();
        let mut sink = RecordingSink::new();

        accumulator.feed(&[0.0; 2 * 4], 4, &mut sink).unwrap();
        abort.abort();
        let produced = accumulator.feed(&[0.0; 2 * 12], 12, &mut sink).unwrap();

        assert_eq!(produced, 0);
        assert_eq!(handle.call_count(), 1);
        assert!(accumulator.is_done());
        assert_eq!(
            accumulator.feed(&[0.0; 8], 4, &mut sink),
            Err(StreamError::EncodingAlreadyComplete)
        );
        assert_eq!(sink.writes().len(), 1);
    }

    #[test]
    fn abort_is_not_observed_without_a_full_frame() {
        let mut accumulator = FrameAccumulator::<f32, _>::new(stereo_mock(4)).unwrap();
        let mut sink = RecordingSink::new();

        accumulator.abort();
        accumulator.feed(&[0.0; 2], 1, &mut sink).unwrap();

        assert!(!accumulator.is_done());
        assert_eq!(accumulator.carry_len(), 2);
    }

    #[test]
    fn short_input_is_rejected() {
        let mut accumulator = FrameAccumulator::<f32, _>::new(stereo_mock(4)).unwrap();
        let mut sink = RecordingSink::new();

        let result = accumulator.feed(&[0.0; 3], 2, &mut sink);

        assert!(matches!(result, Err(StreamError::InvalidArgument(_))));
        assert!(!accumulator.is_done());
    }

    #[test]
    fn sample_type_must_match_codec_context() {
        // contexts default to f32 samples
        let result = FrameAccumulator::<i16, _>::new(stereo_mock(4));
        assert!(matches!(result, Err(StreamError::InvalidArgument(_))));
    }

    #[test]
    fn channel_map_is_applied_before_encoding() {
        let context = CodecContext {
            sample_format: SampleFormat::I16,
            ..CodecContext::surround_5_1(44100)
        };
        let codec = MockCodec::new(context).with_samples_per_frame(1);
        let handle = codec.handle();
        let mut accumulator = FrameAccumulator::<i16, _>::with_channel_map(codec, ChannelMap::wav_5_1_to_a52()).unwrap();
        let mut sink = RecordingSink::new();

        accumulator.feed(&[0i16, 1, 2, 3, 4, 5], 1, &mut sink).unwrap();

        let sent: Vec<i16> = handle.calls()[0]
            .samples
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(sent, vec![0, 2, 1, 4, 5, 3]);
    }

    #[test]
    fn finish_pads_with_silence_and_drains_codec() {
        let codec = MockCodec::new(CodecContext {
            sample_format: SampleFormat::U8,
            ..CodecContext::stereo(48000)
        })
        .with_samples_per_frame(4)
        // padded frame buffered, then two delayed frames, then empty
        .with_script([0, 64, 64, 0]);
        let handle = codec.handle();
        let mut accumulator = FrameAccumulator::<u8, _>::new(codec).unwrap();
        let mut sink = RecordingSink::new();

        accumulator.feed(&[7u8; 2 * 3], 3, &mut sink).unwrap();
        let produced = accumulator.finish(&mut sink).unwrap();

        assert_eq!(produced, 2);
        let calls = handle.calls();
        assert_eq!(calls[0].samples, vec![7, 7, 7, 7, 7, 7, 128, 128]);
        assert_eq!(calls[1].samples_per_channel, 0);
        assert_eq!(calls.len(), 4);
        assert!(accumulator.is_done());
        assert_eq!(accumulator.frame_number(), 2);
    }

    #[test]
    fn close_is_idempotent_and_runs_on_drop() {
        let codec = stereo_mock(4);
        let handle = codec.handle();
        {
            let mut accumulator = FrameAccumulator::<f32, _>::new(codec).unwrap();
            accumulator.close();
            accumulator.close();
            let mut sink = RecordingSink::new();
            assert_eq!(
                accumulator.feed(&[0.0; 8], 4, &mut sink),
                Err(StreamError::ObjectDisposed("FrameAccumulator"))
            );
        }
        assert_eq!(handle.close_count(), 1);

        let codec = stereo_mock(4);
        let handle = codec.handle();
        drop(FrameAccumulator::<f32, _>::new(codec).unwrap());
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn sink_failure_is_fatal_and_leaves_no_gap() {
        let mut accumulator = FrameAccumulator::<f32, _>::new(stereo_mock(4)).unwrap();
        let observer = Arc::new(RecordingFrameObserver::default());
        accumulator.add_observer(observer.clone());
        let mut sink = RecordingSink::new();
        sink.fail_after(1);

        assert!(matches!(
            accumulator.feed(&[0.0; 2 * 12], 12, &mut sink),
            Err(StreamError::StorageError(_))
        ));
        assert!(accumulator.is_done());
        assert_eq!(accumulator.frame_number(), 1);
        assert_eq!(
            accumulator.feed(&[0.0; 8], 4, &mut sink),
            Err(StreamError::EncodingAlreadyComplete)
        );
        assert_eq!(observer.frame_numbers(), vec![1]);
        assert_eq!(sink.writes().len(), 1);
    }

    /// Aborts the accumulator from inside the encode loop.
    struct AbortAfterFirstFrame(AbortHandle);

    impl FrameObserver for AbortAfterFirstFrame {
        fn on_frame_encoded(&self, event: &FrameEncoded) {
            if event.frame_number == 1 {
                self.0.abort();
            }
        }
    }

    #[test]
    fn abort_during_feed_drops_remaining_frames() {
        let codec = stereo_mock(4);
        let handle = codec.handle();
        let mut accumulator = FrameAccumulator::<f32, _>::new(codec).unwrap();
        accumulator.add_observer(Arc::new(AbortAfterFirstFrame(accumulator.abort_handle())));
        let mut sink = RecordingSink::new();

        // three full frames plus a partial one
        let produced = accumulator.feed(&[0.5; 2 * 14], 14, &mut sink).unwrap();

        assert_eq!(produced, 1);
        assert_eq!(handle.call_count(), 1);
        assert_eq!(sink.writes().len(), 1);
        assert!(accumulator.is_done());
        assert_eq!(accumulator.carry_len(), 0);
        assert_eq!(
            accumulator.finish(&mut sink),
            Err(StreamError::EncodingAlreadyComplete)
        );
    }
}
