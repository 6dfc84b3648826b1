//! # ac3-live-core
//!
//! Platform-agnostic core of the live encode pipeline.
//!
//! Captured multichannel PCM is reordered into the encoder's channel layout,
//! batched off the capture thread, cut into fixed-length codec frames, and
//! played back through a render device whose format is negotiated at
//! initialization. Platform backends (Windows WASAPI) implement the
//! `RenderDevice` and `CaptureProvider` traits.
//!
//! ## Architecture
//!
//! ```text
//! ac3-live-core (this crate)
//! ├── traits/       ← RenderDevice, WaveSource, ByteSink, FrameCodec, CaptureProvider, Clock, observers
//! ├── models/       ← StreamError, AudioFormat, PlaybackState, configurations, CodecContext, events
//! ├── processing/   ← ChannelMap, RingBuffer, sample conversion, StreamResampler, ConvertingSource
//! ├── render/       ← format negotiation, RenderEngine, FeedBuffer
//! ├── encoding/     ← FrameAccumulator, RawFrameCodec, NativeFrameCodec (feature `native-codec`)
//! ├── pipeline/     ← StageBridge (capture → encode), LivePipeline
//! └── storage/      ← EncodedStreamWriter, metadata sidecar
//! ```

pub mod encoding;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod render;
pub mod storage;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-export key types at crate root for convenience.
pub use encoding::accumulator::{AbortHandle, FrameAccumulator};
#[cfg(feature = "native-codec")]
pub use encoding::native::NativeFrameCodec;
pub use encoding::raw_codec::RawFrameCodec;
pub use models::codec::{AudioCodingMode, CodecContext, CodecStatus, SampleFormat};
pub use models::config::{BridgeConfiguration, LiveConfiguration, QueuePolicy, RenderConfiguration, TimingMode};
pub use models::device::{AudioTransportType, DeviceFlow, DeviceInfo};
pub use models::error::StreamError;
pub use models::events::{BridgeDiagnostics, FrameEncoded, PlaybackStopped};
pub use models::format::{AudioFormat, SampleEncoding, ShareMode};
pub use models::state::PlaybackState;
pub use models::stream_result::{EncodedStreamMetadata, EncodedStreamResult};
pub use pipeline::bridge::StageBridge;
pub use pipeline::live::{LivePipeline, LiveSessionResult};
pub use processing::channel_map::ChannelMap;
pub use render::engine::RenderEngine;
pub use render::feed_buffer::FeedBuffer;
pub use storage::encoded_writer::EncodedStreamWriter;
pub use traits::byte_sink::{ByteSink, TeeSink};
pub use traits::capture_provider::{AudioBufferCallback, CaptureProvider};
pub use traits::clock::{Clock, SystemClock};
pub use traits::codec::{FrameCodec, Sample};
pub use traits::observers::{FrameObserver, PlaybackObserver};
pub use traits::render_device::{BufferEvent, FormatSupport, RenderDevice, StreamParams};
pub use traits::wave_source::WaveSource;
