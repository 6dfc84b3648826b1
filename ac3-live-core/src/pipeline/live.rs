use std::sync::Arc;

use parking_lot::Mutex;

use crate::encoding::accumulator::FrameAccumulator;
use crate::models::codec::CodecContext;
use crate::models::config::LiveConfiguration;
use crate::models::error::StreamError;
use crate::models::events::BridgeDiagnostics;
use crate::models::stream_result::{EncodedStreamMetadata, EncodedStreamResult};
use crate::pipeline::bridge::StageBridge;
use crate::render::engine::RenderEngine;
use crate::render::feed_buffer::FeedBuffer;
use crate::storage::encoded_writer::EncodedStreamWriter;
use crate::storage::metadata;
use crate::traits::byte_sink::{ByteSink, TeeSink};
use crate::traits::capture_provider::CaptureProvider;
use crate::traits::clock::{Clock, SystemClock};
use crate::traits::codec::FrameCodec;
use crate::traits::render_device::RenderDevice;

/// What a finished live session produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSessionResult {
    pub diagnostics: BridgeDiagnostics,
    /// The persisted stream, when an output path was configured.
    pub stream: Option<EncodedStreamResult>,
}

/// Writer shared between the encode loop (through the tee) and the pipeline,
/// which closes it on stop.
#[derive(Clone)]
struct SharedWriter(Arc<Mutex<EncodedStreamWriter>>);

impl ByteSink for SharedWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.0.lock().write(bytes)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.0.lock().flush()
    }
}

struct ActiveSession {
    bridge: StageBridge,
    feed: FeedBuffer,
    writer: Option<SharedWriter>,
    context: CodecContext,
    samples_per_frame: usize,
}

/// Capture → encode → render, end to end.
///
/// ```text
/// [CaptureProvider] → StageBridge → FrameAccumulator ─┬→ FeedBuffer → RenderEngine → [RenderDevice]
///                                                     └→ EncodedStreamWriter (optional)
/// ```
pub struct LivePipeline<P: CaptureProvider, D: RenderDevice + 'static> {
    config: LiveConfiguration,
    capture: P,
    engine: RenderEngine<D>,
    clock: Arc<dyn Clock>,
    active: Option<ActiveSession>,
}

impl<P: CaptureProvider, D: RenderDevice + 'static> LivePipeline<P, D> {
    pub fn new(capture: P, device: D, config: LiveConfiguration) -> Result<Self, StreamError> {
        Self::with_clock(capture, device, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        capture: P,
        device: D,
        config: LiveConfiguration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StreamError> {
        config.validate().map_err(StreamError::ConfigurationFailed)?;
        let engine = RenderEngine::with_clock(device, config.render.clone(), Arc::clone(&clock))?;
        Ok(Self {
            config,
            capture,
            engine,
            clock,
            active: None,
        })
    }

    pub fn config(&self) -> &LiveConfiguration {
        &self.config
    }

    /// The render engine, e.g. to register a playback observer.
    pub fn engine(&self) -> &RenderEngine<D> {
        &self.engine
    }

    pub fn capture(&self) -> &P {
        &self.capture
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Bytes currently waiting between encoder and renderer.
    pub fn feed_len(&self) -> usize {
        self.active.as_ref().map_or(0, |active| active.feed.len())
    }

    pub fn diagnostics(&self) -> Option<BridgeDiagnostics> {
        self.active.as_ref().map(|active| active.bridge.diagnostics())
    }

    /// Start encoding with `accumulator` and play the result.
    pub fn start<C: FrameCodec<f32> + 'static>(&mut self, accumulator: FrameAccumulator<f32, C>) -> Result<(), StreamError> {
        if self.active.is_some() {
            return Err(StreamError::InvalidState("live pipeline already running".into()));
        }
        if !self.capture.is_available() {
            return Err(StreamError::DeviceNotAvailable);
        }

        let context = *accumulator.context();
        let samples_per_frame = accumulator.frame_len() / context.channels.max(1) as usize;

        let feed = FeedBuffer::with_duration(self.config.feed_format, self.config.feed_buffer);
        let mut tee = TeeSink::new().with(feed.clone());
        let writer = match &self.config.output_path {
            Some(path) => {
                let writer = SharedWriter(Arc::new(Mutex::new(EncodedStreamWriter::create(path)?)));
                tee.push(Box::new(writer.clone()));
                Some(writer)
            }
            None => None,
        };

        let mut bridge = StageBridge::start(
            self.config.bridge.clone(),
            accumulator,
            Box::new(tee),
            Arc::clone(&self.clock),
        )?;

        let started = self
            .engine
            .initialize(feed.clone())
            .and_then(|_| self.engine.play())
            .and_then(|_| self.capture.start(bridge.capture_callback()));
        if let Err(e) = started {
            log::error!("Live pipeline failed to start: {}", e);
            bridge.abort();
            feed.close();
            if let Err(stop_error) = self.engine.stop() {
                log::warn!("Render engine stop failed during unwind: {}", stop_error);
            }
            return Err(e);
        }

        log::debug!(
            "Live pipeline started: {:?} → {:?}",
            self.capture.device_info().name,
            self.engine.output_format()
        );
        self.active = Some(ActiveSession {
            bridge,
            feed,
            writer,
            context,
            samples_per_frame,
        });
        Ok(())
    }

    /// Stop capture, encode what is pending, stop playback and finalize the
    /// output file. Idempotent: returns `InvalidState` when not running.
    pub fn stop(&mut self) -> Result<LiveSessionResult, StreamError> {
        let Some(mut active) = self.active.take() else {
            return Err(StreamError::InvalidState("live pipeline is not running".into()));
        };

        if let Err(e) = self.capture.stop() {
            log::warn!("Capture stop failed: {}", e);
        }
        let bridge_result = active.bridge.stop();
        active.feed.close();
        let engine_result = self.engine.stop();

        let stream = match active.writer.take() {
            Some(writer) => Some(writer.0.lock().close()?),
            None => None,
        };
        let diagnostics = bridge_result?;
        engine_result?;

        if let (Some(stream), true) = (&stream, self.config.write_metadata) {
            let meta = EncodedStreamMetadata::new(
                stream,
                &active.context,
                diagnostics.frames_encoded,
                active.samples_per_frame,
            );
            metadata::write_metadata(&meta, &stream.file_path)?;
        }

        log::debug!("Live pipeline stopped after {} frames", diagnostics.frames_encoded);
        Ok(LiveSessionResult { diagnostics, stream })
    }
}

impl<P: CaptureProvider, D: RenderDevice + 'static> Drop for LivePipeline<P, D> {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = self.capture.stop() {
                log::warn!("Capture stop failed on drop: {}", e);
            }
            active.bridge.abort();
            active.feed.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::models::config::{BridgeConfiguration, RenderConfiguration};
    use crate::models::format::AudioFormat;
    use crate::processing::channel_map::ChannelMap;
    use crate::test_support::{ManualClock, MockCaptureProvider, MockCodec, MockRenderDevice};

    fn feed_format() -> AudioFormat {
        AudioFormat::pcm(48000, 16, 2)
    }

    fn config() -> LiveConfiguration {
        LiveConfiguration {
            bridge: BridgeConfiguration {
                channels: 2,
                sample_rate: 48000,
                batch_duration: Duration::from_micros(209),
                channel_map: ChannelMap::identity(2),
                poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
            render: RenderConfiguration {
                latency: Duration::from_millis(8),
                ..Default::default()
            },
            feed_format: feed_format(),
            feed_buffer: Duration::from_millis(100),
            output_path: None,
            write_metadata: false,
        }
    }

    fn accumulator() -> FrameAccumulator<f32, MockCodec> {
        FrameAccumulator::new(MockCodec::new(CodecContext::stereo(48000)).with_samples_per_frame(4)).unwrap()
    }

    fn pipeline(
        capture: MockCaptureProvider,
        device: MockRenderDevice,
        config: LiveConfiguration,
    ) -> LivePipeline<MockCaptureProvider, MockRenderDevice> {
        LivePipeline::with_clock(capture, device, config, Arc::new(ManualClock::new())).unwrap()
    }

    #[test]
    fn captured_audio_reaches_device_and_file() {
        let path = std::env::temp_dir().join(format!("ac3_live_pipeline_{}.ac3", std::process::id()));
        let capture = MockCaptureProvider::new(48000, 2);
        let device = MockRenderDevice::supporting(feed_format());
        let mut live = pipeline(
            capture.clone(),
            device.clone(),
            LiveConfiguration {
                output_path: Some(path.clone()),
                write_metadata: true,
                ..config()
            },
        );

        live.start(accumulator()).unwrap();
        assert!(live.is_running());
        assert!(live.engine().state().is_playing());
        assert!(capture.is_running());

        assert!(capture.emit(&[0.5; 2 * 10]));
        let result = live.stop().unwrap();

        assert!(!capture.is_running());
        assert!(live.engine().state().is_stopped());
        assert_eq!(result.diagnostics.frames_captured, 10);
        // two full frames plus the padded tail, 128 bytes each
        assert_eq!(result.diagnostics.frames_encoded, 3);
        let stream = result.stream.unwrap();
        assert_eq!(stream.bytes_written, 3 * 128);
        assert_eq!(std::fs::read(&path).unwrap().len(), 3 * 128);
        assert!(device.state().start_count >= 1);

        let meta = metadata::read_metadata(&path).unwrap();
        assert_eq!(meta.frames, 3);
        assert_eq!(meta.checksum, stream.checksum);

        std::fs::remove_file(metadata::metadata_path(&path)).ok();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unavailable_capture_fails_start() {
        let mut live = pipeline(
            MockCaptureProvider::new(48000, 2).unavailable(),
            MockRenderDevice::supporting(feed_format()),
            config(),
        );

        assert_eq!(live.start(accumulator()), Err(StreamError::DeviceNotAvailable));
        assert!(!live.is_running());
        assert!(live.engine().state().is_stopped());
    }

    #[test]
    fn render_failure_unwinds_bridge() {
        let capture = MockCaptureProvider::new(48000, 2);
        let mut live = pipeline(capture.clone(), MockRenderDevice::new(), config());

        let result = live.start(accumulator());

        assert!(matches!(result, Err(StreamError::UnsupportedFormat(_))));
        assert!(!live.is_running());
        assert!(!capture.is_running());
    }

    #[test]
    fn stop_without_start_is_invalid_state() {
        let mut live = pipeline(
            MockCaptureProvider::new(48000, 2),
            MockRenderDevice::supporting(feed_format()),
            config(),
        );
        assert!(matches!(live.stop(), Err(StreamError::InvalidState(_))));
    }

    #[test]
    fn restart_after_stop() {
        let capture = MockCaptureProvider::new(48000, 2);
        let mut live = pipeline(capture.clone(), MockRenderDevice::supporting(feed_format()), config());

        live.start(accumulator()).unwrap();
        assert!(matches!(live.start(accumulator()), Err(StreamError::InvalidState(_))));
        live.stop().unwrap();

        live.start(accumulator()).unwrap();
        capture.emit(&[0.0; 2 * 4]);
        let result = live.stop().unwrap();
        assert_eq!(result.diagnostics.frames_captured, 4);
        assert!(result.stream.is_none());
    }
}
