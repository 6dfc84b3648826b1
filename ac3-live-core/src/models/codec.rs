use serde::{Deserialize, Serialize};

/// Samples per channel in one A/52 (AC-3) frame.
pub const A52_SAMPLES_PER_FRAME: usize = 1536;

/// Upper bound on the size of one coded A/52 frame in bytes.
pub const A52_MAX_CODED_FRAME_SIZE: usize = 3840;

/// Sample rates an A/52 encoder accepts.
pub const A52_SAMPLE_RATES: [u32; 3] = [32000, 44100, 48000];

/// A/52 audio coding mode (`acmod`): the full-bandwidth channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioCodingMode {
    DualMono,
    Mono,
    Stereo,
    Front3Rear0,
    Front2Rear1,
    Front3Rear1,
    Front2Rear2,
    Front3Rear2,
}

impl AudioCodingMode {
    /// Bitstream code of this mode.
    pub fn acmod(&self) -> i32 {
        match self {
            Self::DualMono => 0,
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Front3Rear0 => 3,
            Self::Front2Rear1 => 4,
            Self::Front3Rear1 => 5,
            Self::Front2Rear2 => 6,
            Self::Front3Rear2 => 7,
        }
    }

    /// Full-bandwidth channels (LFE excluded).
    pub fn full_bandwidth_channels(&self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::DualMono | Self::Stereo => 2,
            Self::Front3Rear0 | Self::Front2Rear1 => 3,
            Self::Front3Rear1 | Self::Front2Rear2 => 4,
            Self::Front3Rear2 => 5,
        }
    }
}

/// Sample format tag handed to the codec so it can interpret the sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Codec-defined status reported alongside each encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodecStatus {
    pub quality: i32,
    pub bit_rate: i32,
    pub bandwidth_code: i32,
}

/// Parameters a frame codec is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecContext {
    /// Interleaved channels per sample frame, LFE included.
    pub channels: u16,
    pub sample_rate: u32,
    pub coding_mode: AudioCodingMode,
    pub has_lfe: bool,
    pub sample_format: SampleFormat,
    /// Constant bitrate in kbit/s (0 = codec default).
    pub bitrate_kbps: u32,
}

impl CodecContext {
    /// 5.1 float context at the given rate (the live capture layout).
    pub fn surround_5_1(sample_rate: u32) -> Self {
        Self {
            channels: 6,
            sample_rate,
            coding_mode: AudioCodingMode::Front3Rear2,
            has_lfe: true,
            sample_format: SampleFormat::F32,
            bitrate_kbps: 0,
        }
    }

    /// Stereo float context at the given rate.
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            channels: 2,
            sample_rate,
            coding_mode: AudioCodingMode::Stereo,
            has_lfe: false,
            sample_format: SampleFormat::F32,
            bitrate_kbps: 0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let expected = self.coding_mode.full_bandwidth_channels() + u16::from(self.has_lfe);
        if self.channels != expected {
            return Err(format!(
                "{:?}{} needs {} channels, context has {}",
                self.coding_mode,
                if self.has_lfe { "+LFE" } else { "" },
                expected,
                self.channels
            ));
        }
        if !A52_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if self.bitrate_kbps > 640 {
            return Err(format!("bitrate above 640 kbit/s: {}", self.bitrate_kbps));
        }
        Ok(())
    }
}
