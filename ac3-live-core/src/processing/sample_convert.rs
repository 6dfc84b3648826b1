use crate::models::error::StreamError;
use crate::models::format::{AudioFormat, SampleEncoding};

/// Decode interleaved bytes in `format` to normalized f32 samples.
///
/// A trailing partial sample is ignored. Compressed input cannot be decoded.
pub fn decode_to_f32(bytes: &[u8], format: &AudioFormat) -> Result<Vec<f32>, StreamError> {
    let width = format.bytes_per_sample();
    let mut samples = Vec::with_capacity(bytes.len() / width.max(1));
    match (format.encoding, format.bits_per_sample) {
        (SampleEncoding::IeeeFloat, 32) => {
            for chunk in bytes.chunks_exact(4) {
                samples.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
        (SampleEncoding::Pcm, 8) => {
            samples.extend(bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0));
        }
        (SampleEncoding::Pcm, 16) => {
            for chunk in bytes.chunks_exact(2) {
                samples.push(i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0);
            }
        }
        (SampleEncoding::Pcm, 24) => {
            for chunk in bytes.chunks_exact(3) {
                let value = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
                samples.push(value as f32 / 8_388_608.0);
            }
        }
        (SampleEncoding::Pcm, 32) => {
            for chunk in bytes.chunks_exact(4) {
                let value = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                samples.push(value as f32 / 2_147_483_648.0);
            }
        }
        _ => return Err(StreamError::UnsupportedFormat(format!("cannot decode {}", format))),
    }
    Ok(samples)
}

/// Encode normalized f32 samples as interleaved bytes in `format`.
///
/// Clamps out-of-range values.
pub fn encode_from_f32(samples: &[f32], format: &AudioFormat, out: &mut Vec<u8>) -> Result<(), StreamError> {
    out.reserve(samples.len() * format.bytes_per_sample());
    match (format.encoding, format.bits_per_sample) {
        (SampleEncoding::IeeeFloat, 32) => {
            for &sample in samples {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        (SampleEncoding::Pcm, 8) => {
            out.extend(
                samples
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * 127.0 + 128.0).round() as u8),
            );
        }
        (SampleEncoding::Pcm, 16) => {
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        (SampleEncoding::Pcm, 24) => {
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) * 8_388_607.0) as i32;
                out.extend_from_slice(&value.to_le_bytes()[..3]);
            }
        }
        (SampleEncoding::Pcm, 32) => {
            for &sample in samples {
                let value = (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        _ => return Err(StreamError::UnsupportedFormat(format!("cannot encode {}", format))),
    }
    Ok(())
}

/// Change the channel count of interleaved samples.
///
/// Down-mixing to mono averages all channels; otherwise surplus channels are
/// dropped and missing ones repeat the last source channel.
pub fn adapt_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            output.extend((0..to).map(|ch| frame[ch.min(from - 1)]));
        }
    }
    output
}
