use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, ShareMode};
use crate::traits::render_device::{FormatSupport, RenderDevice};

/// Rates swept in exclusive mode when the device's own rate yields nothing.
pub const EXCLUSIVE_SWEEP_RATES: [u32; 4] = [44100, 48000, 96000, 192000];

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatResolution {
    pub format: AudioFormat,
    /// The source must be converted before it reaches the device.
    pub requires_conversion: bool,
}

impl FormatResolution {
    fn resolved(requested: &AudioFormat, format: AudioFormat) -> Self {
        Self {
            format,
            requires_conversion: format != *requested,
        }
    }
}

/// Candidate grid for one sample rate: 32-bit float, then 24/16/8-bit PCM,
/// for `channels`, then stereo, then mono. Duplicates are removed.
pub fn candidate_formats(sample_rate: u32, channels: u16) -> Vec<AudioFormat> {
    let mut formats = Vec::with_capacity(12);
    for channel_count in [channels, 2, 1] {
        let row = [
            AudioFormat::float(sample_rate, channel_count),
            AudioFormat::pcm(sample_rate, 24, channel_count),
            AudioFormat::pcm(sample_rate, 16, channel_count),
            AudioFormat::pcm(sample_rate, 8, channel_count),
        ];
        for format in row {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
    }
    formats
}

/// Resolve a format the device will accept for `requested`.
///
/// First success wins:
/// 1. `requested` itself
/// 2. the device's closest match for `requested`
/// 3. the mix format
/// 4. the candidate grid (exclusive mode: at the device's native rate and
///    channel count, then across [`EXCLUSIVE_SWEEP_RATES`])
pub fn negotiate<D>(requested: &AudioFormat, device: &D, share_mode: ShareMode) -> Result<FormatResolution, StreamError>
where
    D: RenderDevice + ?Sized,
{
    match device.is_format_supported(share_mode, requested) {
        FormatSupport::Supported => return Ok(FormatResolution::resolved(requested, *requested)),
        FormatSupport::ClosestMatch(closest) => {
            log::debug!("Device proposes {} instead of {}", closest, requested);
            return Ok(FormatResolution::resolved(requested, closest));
        }
        FormatSupport::Unsupported => {}
    }

    if let Some(mix) = device.mix_format() {
        if device.is_format_supported(share_mode, &mix).is_supported() {
            log::debug!("Falling back to mix format {}", mix);
            return Ok(FormatResolution::resolved(requested, mix));
        }
    }

    let found = match share_mode {
        ShareMode::Shared => first_supported(device, share_mode, candidate_formats(requested.sample_rate, requested.channels)),
        ShareMode::Exclusive => {
            let base = device.device_format().unwrap_or(*requested);
            first_supported(device, share_mode, candidate_formats(base.sample_rate, base.channels)).or_else(|| {
                let swept = EXCLUSIVE_SWEEP_RATES
                    .iter()
                    .flat_map(|&rate| candidate_formats(rate, base.channels));
                first_supported(device, share_mode, swept)
            })
        }
    };

    match found {
        Some(format) => {
            log::debug!("Negotiated {} for requested {}", format, requested);
            Ok(FormatResolution::resolved(requested, format))
        }
        None => Err(StreamError::UnsupportedFormat(format!(
            "no supported {:?} format found for {}",
            share_mode, requested
        ))),
    }
}

fn first_supported<D>(device: &D, share_mode: ShareMode, candidates: impl IntoIterator<Item = AudioFormat>) -> Option<AudioFormat>
where
    D: RenderDevice + ?Sized,
{
    candidates
        .into_iter()
        .find(|format| device.is_format_supported(share_mode, format).is_supported())
}
