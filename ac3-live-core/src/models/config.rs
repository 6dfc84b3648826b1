use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::format::{AudioFormat, SampleEncoding, ShareMode};
use crate::processing::channel_map::ChannelMap;

/// How the playback thread paces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingMode {
    /// Sleep `latency / 8` between buffer refills.
    #[default]
    Polling,
    /// Wait for the device's buffer event, timing out after `3 * latency`.
    EventDriven,
}

/// Configuration for a [`RenderEngine`](crate::render::RenderEngine).
///
/// Applied when the engine is constructed; later changes require a new engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfiguration {
    /// Target buffering depth (default: 100 ms).
    pub latency: Duration,

    /// Shared or exclusive device access (default: shared).
    pub share_mode: ShareMode,

    /// Polling or event-driven refills (default: polling).
    pub timing: TimingMode,

    /// Name given to the playback thread.
    pub thread_name: String,
}

impl RenderConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.latency.is_zero() {
            return Err("latency must be positive".into());
        }
        if self.latency < Duration::from_millis(1) {
            return Err(format!("latency below 1 ms: {:?}", self.latency));
        }
        Ok(())
    }

    pub fn is_event_driven(&self) -> bool {
        self.timing == TimingMode::EventDriven
    }

    pub fn is_exclusive(&self) -> bool {
        self.share_mode == ShareMode::Exclusive
    }
}

impl Default for RenderConfiguration {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
            share_mode: ShareMode::Shared,
            timing: TimingMode::Polling,
            thread_name: "render-playback".into(),
        }
    }
}

/// What the capture callback does when the batch queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueuePolicy {
    /// Never drop; memory grows if encoding falls behind capture.
    #[default]
    Unbounded,
    /// Keep at most `max_batches` queued; newly completed batches beyond that are dropped.
    Bounded { max_batches: usize },
}

/// Configuration for a [`StageBridge`](crate::pipeline::StageBridge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfiguration {
    /// Interleaved channel count delivered by capture and expected by the encoder.
    pub channels: u16,

    /// Capture sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Real-time span of one queued batch (default: 1 s).
    pub batch_duration: Duration,

    /// Capture-native → target channel permutation.
    pub channel_map: ChannelMap,

    /// Sleep between encode-loop queue checks (default: 10 ms).
    pub poll_interval: Duration,

    /// Backpressure policy for the batch queue.
    pub queue_policy: QueuePolicy,

    /// Flush the sink after this many encoded batches (0 = never).
    pub flush_every: u32,
}

impl BridgeConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.channels == 0 {
            return Err("channel count must be at least 1".into());
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.channel_map.channels() != self.channels as usize {
            return Err(format!(
                "channel map covers {} channels, stream has {}",
                self.channel_map.channels(),
                self.channels
            ));
        }
        if self.frames_per_batch() == 0 {
            return Err(format!("batch duration too short: {:?}", self.batch_duration));
        }
        if let QueuePolicy::Bounded { max_batches: 0 } = self.queue_policy {
            return Err("bounded queue needs room for at least one batch".into());
        }
        Ok(())
    }

    /// Frames (samples per channel) in one batch.
    pub fn frames_per_batch(&self) -> usize {
        (self.sample_rate as u128 * self.batch_duration.as_micros() / 1_000_000) as usize
    }

    /// Interleaved samples in one batch.
    pub fn samples_per_batch(&self) -> usize {
        self.frames_per_batch() * self.channels as usize
    }
}

impl Default for BridgeConfiguration {
    fn default() -> Self {
        Self {
            channels: 6,
            sample_rate: 44100,
            batch_duration: Duration::from_secs(1),
            channel_map: ChannelMap::wav_5_1_to_a52(),
            poll_interval: Duration::from_millis(10),
            queue_policy: QueuePolicy::Unbounded,
            flush_every: 10,
        }
    }
}

/// Configuration for a [`LivePipeline`](crate::pipeline::LivePipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfiguration {
    pub bridge: BridgeConfiguration,
    pub render: RenderConfiguration,

    /// Format of the encoded bytes handed to the render device
    /// (default: 48 kHz 16-bit stereo compressed carrier).
    pub feed_format: AudioFormat,

    /// Depth of the buffer between encoder and renderer (default: 500 ms).
    pub feed_buffer: Duration,

    /// Also persist the encoded stream to this file.
    pub output_path: Option<PathBuf>,

    /// Write a JSON sidecar next to `output_path` when the pipeline stops.
    pub write_metadata: bool,
}

impl LiveConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        self.bridge.validate()?;
        self.render.validate()?;
        self.feed_format.validate()?;
        if self.feed_buffer.is_zero() {
            return Err("feed buffer must hold some audio".into());
        }
        if self.write_metadata && self.output_path.is_none() {
            return Err("metadata requires an output path".into());
        }
        Ok(())
    }
}

impl Default for LiveConfiguration {
    fn default() -> Self {
        Self {
            bridge: BridgeConfiguration::default(),
            render: RenderConfiguration::default(),
            feed_format: AudioFormat::new(48000, 16, 2, SampleEncoding::Compressed),
            feed_buffer: Duration::from_millis(500),
            output_path: None,
            write_metadata: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_defaults_are_valid() {
        let config = RenderConfiguration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.latency, Duration::from_millis(100));
        assert!(!config.is_event_driven());
        assert!(!config.is_exclusive());
    }

    #[test]
    fn render_rejects_zero_latency() {
        let config = RenderConfiguration {
            latency: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bridge_defaults_match_one_second_of_5_1() {
        let config = BridgeConfiguration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_per_batch(), 44100);
        assert_eq!(config.samples_per_batch(), 44100 * 6);
    }

    #[test]
    fn bridge_rejects_map_channel_mismatch() {
        let config = BridgeConfiguration {
            channels: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bridge_rejects_empty_bounded_queue() {
        let config = BridgeConfiguration {
            queue_policy: QueuePolicy::Bounded { max_batches: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn live_metadata_needs_output_path() {
        let mut config = LiveConfiguration {
            write_metadata: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.output_path = Some(PathBuf::from("live.ac3"));
        assert!(config.validate().is_ok());
    }
}
