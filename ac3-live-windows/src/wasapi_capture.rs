//! WASAPI capture provider.
//!
//! Captures either the mix going to a render endpoint (loopback, e.g. a
//! virtual 5.1 device the player outputs to) or a capture endpoint, in shared
//! mode, and delivers interleaved f32 blocks in the device's channel order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use windows::core::PCWSTR;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use ac3_live_core::models::device::{DeviceFlow, DeviceInfo};
use ac3_live_core::models::error::StreamError;
use ac3_live_core::models::format::SampleEncoding;
use ac3_live_core::processing::sample_convert;
use ac3_live_core::traits::capture_provider::{AudioBufferCallback, CaptureProvider};

use crate::com::ComApartment;
use crate::device_enumerator::DeviceEnumerator;
use crate::wave_format;

/// Shared-mode buffer depth: 100 ms in 100 ns units.
const BUFFER_DURATION: i64 = 1_000_000;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which endpoint to capture from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Loopback on a render endpoint (`None` = default render device).
    Loopback(Option<String>),
    /// A capture endpoint (`None` = default capture device).
    Input(Option<String>),
}

impl CaptureSource {
    fn flow(&self) -> DeviceFlow {
        match self {
            Self::Loopback(_) => DeviceFlow::Loopback,
            Self::Input(_) => DeviceFlow::Capture,
        }
    }

    fn device_id(&self) -> Option<&str> {
        match self {
            Self::Loopback(id) | Self::Input(id) => id.as_deref(),
        }
    }

    fn open(&self, enumerator: &DeviceEnumerator) -> Result<IMMDevice, StreamError> {
        match (self, self.device_id()) {
            (_, Some(id)) => enumerator.device_by_id(id),
            (Self::Loopback(_), None) => enumerator.default_render_device(),
            (Self::Input(_), None) => enumerator.default_capture_device(),
        }
    }
}

/// WASAPI capture running on a dedicated thread registered with MMCSS.
pub struct WasapiCapture {
    source: CaptureSource,
    info: DeviceInfo,
    running: Arc<AtomicBool>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

// SAFETY: COM objects are confined to the capture thread.
unsafe impl Send for WasapiCapture {}
unsafe impl Sync for WasapiCapture {}

impl WasapiCapture {
    /// Loopback capture of a render endpoint (`None` = default device).
    pub fn loopback(device_id: Option<String>) -> Self {
        Self::new(CaptureSource::Loopback(device_id))
    }

    /// Capture from an input endpoint (`None` = default device).
    pub fn input(device_id: Option<String>) -> Self {
        Self::new(CaptureSource::Input(device_id))
    }

    fn new(source: CaptureSource) -> Self {
        let info = DeviceInfo {
            id: source.device_id().unwrap_or("default").to_string(),
            name: match source {
                CaptureSource::Loopback(_) => "System Audio (Loopback)".into(),
                CaptureSource::Input(_) => "Audio Input".into(),
            },
            flow: source.flow(),
            is_default: source.device_id().is_none(),
            transport_type: None,
        };
        Self {
            source,
            info,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        }
    }

    /// Refresh name and transport type from the endpoint.
    ///
    /// Requires COM to be initialized on the calling thread.
    pub fn describe(mut self) -> Result<Self, StreamError> {
        let enumerator = DeviceEnumerator::new()?;
        let device = self.source.open(&enumerator)?;
        let is_default = self.info.is_default;
        self.info = DeviceEnumerator::describe(&device, self.source.flow(), is_default);
        Ok(self)
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }
}

impl CaptureProvider for WasapiCapture {
    fn is_available(&self) -> bool {
        let Ok(_com) = ComApartment::enter() else {
            return false;
        };
        DeviceEnumerator::new()
            .and_then(|enumerator| self.source.open(&enumerator))
            .is_ok()
    }

    fn start(&mut self, callback: AudioBufferCallback) -> Result<(), StreamError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::InvalidState("capture already running".into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let source = self.source.clone();

        let handle = thread::Builder::new()
            .name("wasapi-capture".into())
            .spawn(move || {
                if let Err(e) = capture_loop(&running, &source, callback) {
                    log::error!("Capture error: {}", e);
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| StreamError::Thread(format!("failed to spawn capture thread: {}", e)))?;

        *self.capture_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.lock().take() {
            if handle.join().is_err() {
                return Err(StreamError::Thread("capture thread panicked".into()));
            }
        }
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }
}

/// Capture loop running on a dedicated thread.
///
/// Sequence:
/// 1. Join the MTA
/// 2. Resolve the endpoint and activate IAudioClient
/// 3. Initialize in shared mode with the mix format (LOOPBACK for render endpoints)
/// 4. Get IAudioCaptureClient, register with MMCSS
/// 5. Start, poll for packets
fn capture_loop(
    running: &AtomicBool,
    source: &CaptureSource,
    callback: AudioBufferCallback,
) -> Result<(), StreamError> {
    let _com = ComApartment::enter()?;
    let enumerator = DeviceEnumerator::new()?;
    let device = source.open(&enumerator)?;

    unsafe {
        let audio_client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| StreamError::device(format!("Activate failed: {}", e)))?;

        let mix_format_ptr = audio_client
            .GetMixFormat()
            .map_err(|e| StreamError::device(format!("GetMixFormat failed: {}", e)))?;
        let mix_format = wave_format::from_raw(mix_format_ptr);

        let mut flags = AUDCLNT_STREAMFLAGS_NOPERSIST;
        if matches!(source, CaptureSource::Loopback(_)) {
            flags |= AUDCLNT_STREAMFLAGS_LOOPBACK;
        }
        let initialized = audio_client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            flags,
            BUFFER_DURATION,
            0,
            mix_format_ptr,
            None,
        );
        CoTaskMemFree(Some(mix_format_ptr as *const _));

        let format = mix_format.ok_or_else(|| StreamError::UnsupportedFormat("unreadable mix format".into()))?;
        initialized.map_err(|e| StreamError::device(format!("IAudioClient::Initialize failed: {}", e)))?;
        if format.encoding == SampleEncoding::Compressed {
            return Err(StreamError::UnsupportedFormat(format.to_string()));
        }
        log::debug!("Capturing {:?} at {}", source, format);

        let capture_client: IAudioCaptureClient = audio_client
            .GetService()
            .map_err(|e| StreamError::device(format!("GetService failed: {}", e)))?;

        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        let mmcss = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

        audio_client
            .Start()
            .map_err(|e| StreamError::device(format!("IAudioClient::Start failed: {}", e)))?;

        let mut converted: Vec<f32> = Vec::new();
        let result = (|| -> Result<(), StreamError> {
            while running.load(Ordering::SeqCst) {
                thread::sleep(POLL_INTERVAL);

                let mut packet_length = capture_client
                    .GetNextPacketSize()
                    .map_err(|e| StreamError::device(format!("GetNextPacketSize failed: {}", e)))?;

                while packet_length > 0 {
                    let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                    let mut num_frames: u32 = 0;
                    let mut buffer_flags: u32 = 0;

                    capture_client
                        .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut buffer_flags, None, None)
                        .map_err(|e| StreamError::device(format!("GetBuffer failed: {}", e)))?;

                    if num_frames > 0 && !buffer_ptr.is_null() {
                        let total_samples = num_frames as usize * format.channels as usize;
                        converted.clear();
                        if buffer_flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                            converted.resize(total_samples, 0.0);
                        } else if format.encoding == SampleEncoding::IeeeFloat && format.bits_per_sample == 32 {
                            let samples = std::slice::from_raw_parts(buffer_ptr as *const f32, total_samples);
                            converted.extend_from_slice(samples);
                        } else {
                            let bytes = std::slice::from_raw_parts(buffer_ptr, format.frames_to_bytes(num_frames as usize));
                            converted = sample_convert::decode_to_f32(bytes, &format)?;
                        }
                        callback(&converted, format.sample_rate, format.channels);
                    }

                    capture_client
                        .ReleaseBuffer(num_frames)
                        .map_err(|e| StreamError::device(format!("ReleaseBuffer failed: {}", e)))?;

                    packet_length = capture_client
                        .GetNextPacketSize()
                        .map_err(|e| StreamError::device(format!("GetNextPacketSize failed: {}", e)))?;
                }
            }
            Ok(())
        })();

        let _ = audio_client.Stop();
        if let Ok(handle) = mmcss {
            let _ = AvRevertMmThreadCharacteristics(handle);
        }
        result
    }
}
