//! WASAPI render endpoint as a [`RenderDevice`].
//!
//! Opens an `IAudioClient` on a render endpoint in shared or exclusive mode,
//! optionally event-driven, and writes frames through `IAudioRenderClient`.
//! Compressed formats are declared as IEC 61937 Dolby Digital so an S/PDIF or
//! HDMI receiver decodes the bitstream.

use std::sync::Arc;
use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::StructuredStorage::PROPVARIANT;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;
use windows::Win32::System::Variant::VT_BLOB;

use ac3_live_core::models::device::{DeviceFlow, DeviceInfo};
use ac3_live_core::models::error::StreamError;
use ac3_live_core::models::format::{AudioFormat, ShareMode};
use ac3_live_core::traits::render_device::{BufferEvent, FormatSupport, RenderDevice, StreamParams};

use crate::com::ComApartment;
use crate::device_enumerator::DeviceEnumerator;
use crate::wave_format;

/// Format stored as a `VT_BLOB` holding a WAVEFORMATEX(TENSIBLE); any other variant type is ignored.
fn format_from_property(value: &PROPVARIANT) -> Option<AudioFormat> {
    let raw = value.as_raw();
    // SAFETY: the blob arm is only read once the variant type says it is active.
    unsafe {
        if raw.Anonymous.Anonymous.vt != VT_BLOB.0 {
            return None;
        }
        let blob = raw.Anonymous.Anonymous.Anonymous.blob;
        if blob.pBlobData.is_null() || blob.cbSize < std::mem::size_of::<WAVEFORMATEX>() as u32 {
            return None;
        }
        wave_format::from_raw(blob.pBlobData as *const WAVEFORMATEX)
    }
}

/// MMCSS switches from "Pro Audio" to "Audio" above this latency.
const PRO_AUDIO_MAX_LATENCY: Duration = Duration::from_millis(25);

fn share_mode(mode: ShareMode) -> AUDCLNT_SHAREMODE {
    match mode {
        ShareMode::Shared => AUDCLNT_SHAREMODE_SHARED,
        ShareMode::Exclusive => AUDCLNT_SHAREMODE_EXCLUSIVE,
    }
}

/// Duration in 100 ns units.
fn reference_time(duration: Duration) -> i64 {
    (duration.as_nanos() / 100) as i64
}

/// Auto-reset Win32 event the audio engine signals when it wants data.
struct Win32Event(HANDLE);

// SAFETY: event handles are kernel objects usable from any thread.
unsafe impl Send for Win32Event {}
unsafe impl Sync for Win32Event {}

impl BufferEvent for Win32Event {
    fn wait(&self, timeout: Duration) -> bool {
        let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
        unsafe { WaitForSingleObject(self.0, millis) == WAIT_OBJECT_0 }
    }
}

impl Drop for Win32Event {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Open stream state, present between `initialize` and `release`.
struct Stream {
    client: IAudioClient,
    render_client: Option<IAudioRenderClient>,
    format: AudioFormat,
}

/// WASAPI render endpoint.
///
/// Create it on a thread that joined the multithreaded COM apartment; the
/// playback thread joins it in [`RenderDevice::enter_render_thread`].
pub struct WasapiRenderDevice {
    device: IMMDevice,
    info: DeviceInfo,
    /// Uninitialized client used for format queries.
    query_client: IAudioClient,
    stream: Option<Stream>,
    event: Option<Arc<Win32Event>>,
    mmcss: Option<HANDLE>,
    render_thread_com: Option<ComApartment>,
}

// SAFETY: COM objects are created in the multithreaded apartment and every
// thread that touches them joins it first; HANDLE fields are plain kernel handles.
unsafe impl Send for WasapiRenderDevice {}

impl WasapiRenderDevice {
    /// The default console render endpoint.
    pub fn default_device() -> Result<Self, StreamError> {
        let enumerator = DeviceEnumerator::new()?;
        let device = enumerator.default_render_device()?;
        Self::from_device(device, true)
    }

    /// A render endpoint by ID (see [`DeviceEnumerator::list_render_devices`]).
    pub fn with_device_id(id: &str) -> Result<Self, StreamError> {
        let enumerator = DeviceEnumerator::new()?;
        let device = enumerator.device_by_id(id)?;
        Self::from_device(device, false)
    }

    fn from_device(device: IMMDevice, is_default: bool) -> Result<Self, StreamError> {
        let query_client = activate(&device)?;
        let info = DeviceEnumerator::describe(&device, DeviceFlow::Render, is_default);
        log::debug!("Render device: {} ({:?})", info.name, info.transport_type);
        Ok(Self {
            device,
            info,
            query_client,
            stream: None,
            event: None,
            mmcss: None,
            render_thread_com: None,
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn stream(&self) -> Result<&Stream, StreamError> {
        self.stream.as_ref().ok_or(StreamError::NotInitialized)
    }
}

fn activate(device: &IMMDevice) -> Result<IAudioClient, StreamError> {
    unsafe { device.Activate(CLSCTX_ALL, None) }
        .map_err(|e| StreamError::device(format!("Activate failed: {}", e)))
}

impl RenderDevice for WasapiRenderDevice {
    fn is_format_supported(&self, mode: ShareMode, format: &AudioFormat) -> FormatSupport {
        let wfx = wave_format::to_extensible(format);
        let format_ptr = &wfx as *const WAVEFORMATEXTENSIBLE as *const WAVEFORMATEX;

        unsafe {
            if mode == ShareMode::Exclusive {
                let hr = self
                    .query_client
                    .IsFormatSupported(AUDCLNT_SHAREMODE_EXCLUSIVE, format_ptr, None);
                return if hr.is_ok() {
                    FormatSupport::Supported
                } else {
                    FormatSupport::Unsupported
                };
            }

            let mut closest: *mut WAVEFORMATEX = std::ptr::null_mut();
            let hr = self
                .query_client
                .IsFormatSupported(AUDCLNT_SHAREMODE_SHARED, format_ptr, Some(&mut closest));
            let proposal = wave_format::from_raw(closest);
            if !closest.is_null() {
                CoTaskMemFree(Some(closest as *const _));
            }

            if hr.is_err() {
                FormatSupport::Unsupported
            } else if hr == windows::Win32::Foundation::S_OK {
                FormatSupport::Supported
            } else {
                // S_FALSE: not as requested, the engine proposes something else.
                proposal.map_or(FormatSupport::Unsupported, FormatSupport::ClosestMatch)
            }
        }
    }

    fn mix_format(&self) -> Option<AudioFormat> {
        unsafe {
            let ptr = self.query_client.GetMixFormat().ok()?;
            let format = wave_format::from_raw(ptr);
            CoTaskMemFree(Some(ptr as *const _));
            format
        }
    }

    fn device_format(&self) -> Option<AudioFormat> {
        let store = unsafe { self.device.OpenPropertyStore(STGM_READ) }.ok()?;
        let value = unsafe { store.GetValue(&PKEY_AudioEngine_DeviceFormat) }.ok()?;
        format_from_property(&value)
    }

    fn initialize(&mut self, params: &StreamParams) -> Result<(), StreamError> {
        // A client can only be initialized once; retries need a fresh one.
        self.release();
        let client = activate(&self.device)?;

        let mut flags = AUDCLNT_STREAMFLAGS_NOPERSIST;
        if params.event_callback {
            flags |= AUDCLNT_STREAMFLAGS_EVENTCALLBACK;
        }
        let wfx = wave_format::to_extensible(&params.format);
        let format_ptr = &wfx as *const WAVEFORMATEXTENSIBLE as *const WAVEFORMATEX;

        let result = unsafe {
            client.Initialize(
                share_mode(params.share_mode),
                flags,
                reference_time(params.buffer_duration),
                reference_time(params.periodicity),
                format_ptr,
                None,
            )
        };
        if let Err(e) = result {
            if e.code() == AUDCLNT_E_BUFFER_SIZE_NOT_ALIGNED {
                // Keep the client: GetBufferSize reports the aligned size.
                self.stream = Some(Stream {
                    client,
                    render_client: None,
                    format: params.format,
                });
                return Err(StreamError::BufferSizeNotAligned);
            }
            if e.code() == AUDCLNT_E_UNSUPPORTED_FORMAT {
                return Err(StreamError::UnsupportedFormat(format!("{}", params.format)));
            }
            return Err(StreamError::device(format!("IAudioClient::Initialize failed: {}", e)));
        }

        let render_client: IAudioRenderClient = unsafe { client.GetService() }
            .map_err(|e| StreamError::device(format!("GetService failed: {}", e)))?;
        log::debug!(
            "Render stream initialized: {} {:?}, buffer {:?}",
            params.format,
            params.share_mode,
            params.buffer_duration
        );
        self.stream = Some(Stream {
            client,
            render_client: Some(render_client),
            format: params.format,
        });
        Ok(())
    }

    fn buffer_size(&self) -> Result<u32, StreamError> {
        unsafe { self.stream()?.client.GetBufferSize() }
            .map_err(|e| StreamError::device(format!("GetBufferSize failed: {}", e)))
    }

    fn current_padding(&self) -> Result<u32, StreamError> {
        unsafe { self.stream()?.client.GetCurrentPadding() }
            .map_err(|e| StreamError::device(format!("GetCurrentPadding failed: {}", e)))
    }

    fn stream_latency(&self) -> Duration {
        let Ok(stream) = self.stream() else {
            return Duration::ZERO;
        };
        match unsafe { stream.client.GetStreamLatency() } {
            Ok(ticks) if ticks > 0 => Duration::from_nanos(ticks as u64 * 100),
            _ => Duration::ZERO,
        }
    }

    fn create_event_handle(&mut self) -> Result<Arc<dyn BufferEvent>, StreamError> {
        let stream = self.stream.as_ref().ok_or(StreamError::NotInitialized)?;
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(|e| StreamError::device(format!("CreateEventW failed: {}", e)))?;
        let event = Arc::new(Win32Event(handle));
        unsafe { stream.client.SetEventHandle(handle) }
            .map_err(|e| StreamError::device(format!("SetEventHandle failed: {}", e)))?;
        self.event = Some(Arc::clone(&event));
        Ok(event)
    }

    fn write_frames(&mut self, data: &[u8], frames: u32) -> Result<(), StreamError> {
        let stream = self.stream()?;
        let render_client = stream.render_client.as_ref().ok_or(StreamError::NotInitialized)?;
        let bytes = stream.format.frames_to_bytes(frames as usize);
        if data.len() < bytes {
            return Err(StreamError::InvalidArgument(format!(
                "{} frames need {} bytes, got {}",
                frames,
                bytes,
                data.len()
            )));
        }

        unsafe {
            let buffer = render_client
                .GetBuffer(frames)
                .map_err(|e| StreamError::device(format!("GetBuffer failed: {}", e)))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, bytes);
            render_client
                .ReleaseBuffer(frames, 0)
                .map_err(|e| StreamError::device(format!("ReleaseBuffer failed: {}", e)))
        }
    }

    fn start(&mut self) -> Result<(), StreamError> {
        unsafe { self.stream()?.client.Start() }
            .map_err(|e| StreamError::device(format!("IAudioClient::Start failed: {}", e)))
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        unsafe { self.stream()?.client.Stop() }
            .map_err(|e| StreamError::device(format!("IAudioClient::Stop failed: {}", e)))
    }

    fn reset(&mut self) -> Result<(), StreamError> {
        unsafe { self.stream()?.client.Reset() }
            .map_err(|e| StreamError::device(format!("IAudioClient::Reset failed: {}", e)))
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("Render stream released");
        }
        self.event = None;
    }

    fn enter_render_thread(&mut self, latency: Duration) -> Result<(), StreamError> {
        self.render_thread_com = Some(ComApartment::enter()?);

        let task = if latency > PRO_AUDIO_MAX_LATENCY {
            "Audio"
        } else {
            "Pro Audio"
        };
        let task_name: Vec<u16> = task.encode_utf16().chain(std::iter::once(0)).collect();
        let mut task_index: u32 = 0;
        match unsafe { AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) } {
            Ok(handle) => self.mmcss = Some(handle),
            Err(e) => log::warn!("MMCSS registration as {:?} failed: {}", task, e),
        }
        Ok(())
    }

    fn leave_render_thread(&mut self) {
        if let Some(handle) = self.mmcss.take() {
            unsafe {
                let _ = AvRevertMmThreadCharacteristics(handle);
            }
        }
        self.render_thread_com = None;
    }
}

impl Drop for WasapiRenderDevice {
    fn drop(&mut self) {
        self.release();
    }
}
