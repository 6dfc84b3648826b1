//! Binding to the Aften A/52 encoder (`libaften`).
//!
//! Aften is driven through its encoding context:
//!
//! ```c
//! void aften_set_defaults(AftenContext *s);
//! int  aften_encode_init(AftenContext *s);   /* 0 on success */
//! int  aften_encode_frame(AftenContext *s, uint8_t *frame_buffer, const void *samples, int count);
//! void aften_encode_close(AftenContext *s);
//! ```
//!
//! The context layout mirrors `aften-types.h` (0.0.8). The context is boxed so
//! its address stays fixed between `aften_encode_init` and `aften_encode_close`.
//! `aften_encode_frame` already follows the [`FrameCodec`] result contract.

use std::ffi::c_void;
use std::marker::PhantomData;

use crate::models::codec::{CodecContext, CodecStatus, SampleFormat};
use crate::models::error::StreamError;
use crate::traits::codec::{FrameCodec, Sample};

#[repr(C)]
#[derive(Default)]
struct AftenEncParams {
    encoding_mode: i32,
    use_rematrixing: i32,
    use_block_switching: i32,
    use_dc_filter: i32,
    use_bw_filter: i32,
    use_lfe_filter: i32,
    bitrate: i32,
    quality: i32,
    bwcode: i32,
    bitalloc_fast: i32,
    expstr_search: i32,
    dynrng_profile: i32,
    min_bwcode: i32,
    max_bwcode: i32,
}

#[repr(C)]
#[derive(Default)]
struct AftenMetadata {
    cmixlev: i32,
    surmixlev: i32,
    dsurmod: i32,
    dialnorm: i32,
    xbsi1e: i32,
    dmixmod: i32,
    ltrtcmixlev: i32,
    ltrtsurmixlev: i32,
    lorocmixlev: i32,
    lorosurmixlev: i32,
    xbsi2e: i32,
    dsurexmod: i32,
    dheadphonmod: i32,
    adconvtyp: i32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct AftenStatus {
    quality: i32,
    bit_rate: i32,
    bwcode: i32,
}

#[repr(C)]
#[derive(Default)]
struct AftenSimdInstructions {
    mmx: i32,
    sse: i32,
    sse2: i32,
    sse3: i32,
    ssse3: i32,
    amd_3dnow: i32,
    amd_3dnowext: i32,
    amd_sse_mmx: i32,
    altivec: i32,
}

#[repr(C)]
#[derive(Default)]
struct AftenSystemParams {
    n_threads: i32,
    wanted_simd_instructions: AftenSimdInstructions,
    available_simd_instructions: AftenSimdInstructions,
}

#[repr(C)]
struct AftenContext {
    params: AftenEncParams,
    meta: AftenMetadata,
    status: AftenStatus,
    system: AftenSystemParams,
    verbose: i32,
    channels: i32,
    acmod: i32,
    lfe: i32,
    samplerate: i32,
    sample_format: i32,
    initial_samples: *mut c_void,
    private_context: *mut c_void,
}

impl Default for AftenContext {
    fn default() -> Self {
        Self {
            params: AftenEncParams::default(),
            meta: AftenMetadata::default(),
            status: AftenStatus::default(),
            system: AftenSystemParams::default(),
            verbose: 0,
            channels: 0,
            acmod: 0,
            lfe: 0,
            samplerate: 0,
            sample_format: 0,
            initial_samples: std::ptr::null_mut(),
            private_context: std::ptr::null_mut(),
        }
    }
}

#[link(name = "aften")]
extern "C" {
    fn aften_set_defaults(s: *mut AftenContext);
    fn aften_encode_init(s: *mut AftenContext) -> i32;
    fn aften_encode_frame(s: *mut AftenContext, frame_buffer: *mut u8, samples: *const c_void, count: i32) -> i32;
    fn aften_encode_close(s: *mut AftenContext);
}

/// `A52SampleFormat` codes.
fn aften_sample_format(format: SampleFormat) -> i32 {
    match format {
        SampleFormat::U8 => 0,
        SampleFormat::I16 => 1,
        SampleFormat::I32 => 4,
        SampleFormat::F32 => 5,
        SampleFormat::F64 => 6,
        SampleFormat::I8 => 7,
    }
}

/// [`FrameCodec`] backed by Aften.
pub struct NativeFrameCodec<S> {
    encoder: Box<AftenContext>,
    open: bool,
    context: CodecContext,
    _sample: PhantomData<fn() -> S>,
}

// SAFETY: the Aften context is owned exclusively by this value and only used through &mut self.
unsafe impl<S> Send for NativeFrameCodec<S> {}

impl<S: Sample> NativeFrameCodec<S> {
    pub fn open(context: CodecContext) -> Result<Self, StreamError> {
        context.validate().map_err(StreamError::InitializationFailed)?;
        if context.sample_format != S::FORMAT {
            return Err(StreamError::InitializationFailed(format!(
                "context declares {:?} samples, codec takes {:?}",
                context.sample_format,
                S::FORMAT
            )));
        }

        let mut encoder = Box::<AftenContext>::default();
        // SAFETY: encoder is a valid, exclusively owned context.
        unsafe { aften_set_defaults(encoder.as_mut()) };
        encoder.channels = i32::from(context.channels);
        encoder.acmod = context.coding_mode.acmod();
        encoder.lfe = i32::from(context.has_lfe);
        encoder.samplerate = context.sample_rate as i32;
        encoder.params.bitrate = context.bitrate_kbps as i32;

        // SAFETY: as above; the box keeps the address fixed until close.
        if unsafe { aften_encode_init(encoder.as_mut()) } != 0 {
            return Err(StreamError::InitializationFailed("Initialization failed".into()));
        }
        encoder.sample_format = aften_sample_format(context.sample_format);
        log::debug!("Aften encoder opened: {:?}", context);

        Ok(Self {
            encoder,
            open: true,
            context,
            _sample: PhantomData,
        })
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.open) {
            // SAFETY: the context was initialized and is closed exactly once.
            unsafe { aften_encode_close(self.encoder.as_mut()) };
        }
    }
}

impl<S: Sample> FrameCodec<S> for NativeFrameCodec<S> {
    fn context(&self) -> &CodecContext {
        &self.context
    }

    fn encode_frame(&mut self, frame_buffer: &mut [u8], samples: &[S], samples_per_channel: usize) -> i32 {
        if !self.open
            || frame_buffer.len() < FrameCodec::<S>::max_frame_size(self)
            || samples.len() < samples_per_channel * self.context.channels as usize
        {
            return -1;
        }
        // A null sample pointer asks Aften to flush its delayed frames.
        let samples_ptr = if samples_per_channel == 0 {
            std::ptr::null()
        } else {
            samples.as_ptr() as *const c_void
        };
        // SAFETY: buffer sizes were checked above and the context is initialized.
        unsafe {
            aften_encode_frame(
                self.encoder.as_mut(),
                frame_buffer.as_mut_ptr(),
                samples_ptr,
                samples_per_channel as i32,
            )
        }
    }

    fn status(&self) -> CodecStatus {
        let status = self.encoder.status;
        CodecStatus {
            quality: status.quality,
            bit_rate: status.bit_rate,
            bandwidth_code: status.bwcode,
        }
    }

    fn close(&mut self) {
        self.release();
    }
}

impl<S> Drop for NativeFrameCodec<S> {
    fn drop(&mut self) {
        if std::mem::take(&mut self.open) {
            // SAFETY: see `release`.
            unsafe { aften_encode_close(self.encoder.as_mut()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_format_codes_match_aften() {
        assert_eq!(aften_sample_format(SampleFormat::U8), 0);
        assert_eq!(aften_sample_format(SampleFormat::I16), 1);
        assert_eq!(aften_sample_format(SampleFormat::I32), 4);
        assert_eq!(aften_sample_format(SampleFormat::F32), 5);
        assert_eq!(aften_sample_format(SampleFormat::F64), 6);
        assert_eq!(aften_sample_format(SampleFormat::I8), 7);
    }

    #[test]
    fn mismatched_sample_type_fails_before_init() {
        let mut context = CodecContext::stereo(48000);
        context.sample_format = SampleFormat::I16;
        assert!(matches!(
            NativeFrameCodec::<f32>::open(context),
            Err(StreamError::InitializationFailed(_))
        ));
    }

    #[test]
    fn invalid_layout_fails_before_init() {
        let mut context = CodecContext::surround_5_1(48000);
        context.channels = 2;
        assert!(matches!(
            NativeFrameCodec::<f32>::open(context),
            Err(StreamError::InitializationFailed(_))
        ));
    }
}
