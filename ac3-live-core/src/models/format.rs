use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How samples are encoded in a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleEncoding {
    /// Signed little-endian integers (unsigned for 8-bit).
    Pcm,
    /// IEEE 754 floating point, normalized to [-1, 1].
    IeeeFloat,
    /// An already-compressed bitstream passed through to the device.
    Compressed,
}

/// Hardware access mode for an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    #[default]
    Shared,
    Exclusive,
}

/// Bit depths a stream format may carry.
pub const VALID_BIT_DEPTHS: [u16; 4] = [8, 16, 24, 32];

/// Wave format of a source or a device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16, encoding: SampleEncoding) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
            encoding,
        }
    }

    /// Integer PCM at the given rate, depth and channel count.
    pub fn pcm(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self::new(sample_rate, bits_per_sample, channels, SampleEncoding::Pcm)
    }

    /// 32-bit float at the given rate and channel count.
    pub fn float(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, 32, channels, SampleEncoding::IeeeFloat)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.channels == 0 {
            return Err("channel count must be at least 1".into());
        }
        if !VALID_BIT_DEPTHS.contains(&self.bits_per_sample) {
            return Err(format!("unsupported bit depth: {}", self.bits_per_sample));
        }
        if self.encoding == SampleEncoding::IeeeFloat && self.bits_per_sample != 32 {
            return Err(format!(
                "float samples must be 32 bits wide, got {}",
                self.bits_per_sample
            ));
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        Ok(())
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Size of one interleaved frame (all channels) in bytes.
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.block_align()
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        match self.block_align() {
            0 => 0,
            align => bytes / align,
        }
    }

    /// Number of frames that cover `duration` at this rate (rounded down).
    pub fn frames_for(&self, duration: Duration) -> usize {
        (self.sample_rate as u128 * duration.as_micros() / 1_000_000) as usize
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoding = match self.encoding {
            SampleEncoding::Pcm => "pcm",
            SampleEncoding::IeeeFloat => "float",
            SampleEncoding::Compressed => "compressed",
        };
        write!(
            f,
            "{}Hz {}ch {}bit {}",
            self.sample_rate, self.channels, self.bits_per_sample, encoding
        )
    }
}
