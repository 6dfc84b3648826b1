//! Conversion between [`AudioFormat`] and `WAVEFORMATEX(TENSIBLE)`.

use windows::core::GUID;
use windows::Win32::Media::Audio::*;

use ac3_live_core::models::format::{AudioFormat, SampleEncoding};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_DOLBY_AC3_SPDIF: u16 = 0x0092;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Bytes following `WAVEFORMATEX` in the extensible layout.
const EXTENSIBLE_EXTRA_SIZE: u16 = 22;

const SUBTYPE_PCM: GUID = GUID::from_u128(0x00000001_0000_0010_8000_00aa00389b71);
const SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);
const SUBTYPE_IEC61937_DOLBY_DIGITAL: GUID = GUID::from_u128(0x00000092_0000_0010_8000_00aa00389b71);

/// Speaker mask for a channel count (WAV order), 0 when there is no standard layout.
pub fn channel_mask(channels: u16) -> u32 {
    match channels {
        1 => 0x4,
        2 => 0x3,
        4 => 0x33,
        6 => 0x3F,
        8 => 0x63F,
        _ => 0,
    }
}

pub fn to_extensible(format: &AudioFormat) -> WAVEFORMATEXTENSIBLE {
    let block_align = format.block_align() as u16;
    let sub_format = match format.encoding {
        SampleEncoding::Pcm => SUBTYPE_PCM,
        SampleEncoding::IeeeFloat => SUBTYPE_IEEE_FLOAT,
        SampleEncoding::Compressed => SUBTYPE_IEC61937_DOLBY_DIGITAL,
    };

    WAVEFORMATEXTENSIBLE {
        Format: WAVEFORMATEX {
            wFormatTag: WAVE_FORMAT_EXTENSIBLE,
            nChannels: format.channels,
            nSamplesPerSec: format.sample_rate,
            nAvgBytesPerSec: format.sample_rate * block_align as u32,
            nBlockAlign: block_align,
            wBitsPerSample: format.bits_per_sample,
            cbSize: EXTENSIBLE_EXTRA_SIZE,
        },
        Samples: WAVEFORMATEXTENSIBLE_0 {
            wValidBitsPerSample: format.bits_per_sample,
        },
        dwChannelMask: channel_mask(format.channels),
        SubFormat: sub_format,
    }
}

/// Read a format the audio engine handed back.
///
/// # Safety
/// `format` must point to a valid `WAVEFORMATEX`, followed by the extensible
/// fields when its tag says so.
pub unsafe fn from_raw(format: *const WAVEFORMATEX) -> Option<AudioFormat> {
    if format.is_null() {
        return None;
    }
    let base = std::ptr::read_unaligned(format);
    let tag = base.wFormatTag;

    let encoding = match tag {
        WAVE_FORMAT_PCM => SampleEncoding::Pcm,
        WAVE_FORMAT_IEEE_FLOAT => SampleEncoding::IeeeFloat,
        WAVE_FORMAT_DOLBY_AC3_SPDIF => SampleEncoding::Compressed,
        WAVE_FORMAT_EXTENSIBLE if base.cbSize >= EXTENSIBLE_EXTRA_SIZE => {
            let extensible = std::ptr::read_unaligned(format as *const WAVEFORMATEXTENSIBLE);
            let sub_format = extensible.SubFormat;
            if sub_format == SUBTYPE_PCM {
                SampleEncoding::Pcm
            } else if sub_format == SUBTYPE_IEEE_FLOAT {
                SampleEncoding::IeeeFloat
            } else if sub_format == SUBTYPE_IEC61937_DOLBY_DIGITAL {
                SampleEncoding::Compressed
            } else {
                return None;
            }
        }
        _ => return None,
    };

    Some(AudioFormat::new(
        base.nSamplesPerSec,
        base.wBitsPerSample,
        base.nChannels,
        encoding,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensible_round_trips_through_raw() {
        let format = AudioFormat::new(48000, 24, 6, SampleEncoding::Pcm);
        let extensible = to_extensible(&format);
        assert_eq!({ extensible.Format.nBlockAlign }, 18);
        assert_eq!({ extensible.dwChannelMask }, 0x3F);

        let read = unsafe { from_raw(&extensible as *const WAVEFORMATEXTENSIBLE as *const WAVEFORMATEX) };
        assert_eq!(read, Some(format));
    }

    #[test]
    fn compressed_uses_iec61937_subtype() {
        let format = AudioFormat::new(48000, 16, 2, SampleEncoding::Compressed);
        let extensible = to_extensible(&format);
        assert_eq!({ extensible.SubFormat }, SUBTYPE_IEC61937_DOLBY_DIGITAL);
    }

    #[test]
    fn plain_tags_are_recognized() {
        let base = WAVEFORMATEX {
            wFormatTag: WAVE_FORMAT_IEEE_FLOAT,
            nChannels: 2,
            nSamplesPerSec: 44100,
            nAvgBytesPerSec: 44100 * 8,
            nBlockAlign: 8,
            wBitsPerSample: 32,
            cbSize: 0,
        };
        let read = unsafe { from_raw(&base) };
        assert_eq!(read, Some(AudioFormat::new(44100, 32, 2, SampleEncoding::IeeeFloat)));
        assert_eq!(unsafe { from_raw(std::ptr::null()) }, None);
    }

    #[test]
    fn unknown_layouts_have_no_mask() {
        assert_eq!(channel_mask(3), 0);
        assert_eq!(channel_mask(2), 0x3);
    }
}
