//! # ac3-live-windows
//!
//! Windows WASAPI backend for the live encode pipeline.
//!
//! Provides:
//! - `WasapiRenderDevice`: render endpoint (shared/exclusive, polling/event-driven) for `RenderEngine`
//! - `WasapiCapture`: loopback or input capture as a `CaptureProvider`
//! - `DeviceEnumerator`: endpoint lookup via the MMDevice API
//!
//! ## Platform Requirements
//! - Windows 10 1703+ (build 15063) for event-driven loopback
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//! - An S/PDIF or HDMI endpoint for compressed passthrough
//!
//! ## Usage
//! ```ignore
//! use ac3_live_core::{FrameAccumulator, LiveConfiguration, LivePipeline, RawFrameCodec};
//! use ac3_live_windows::{ComApartment, WasapiCapture, WasapiRenderDevice};
//!
//! let _com = ComApartment::enter()?;
//! let capture = WasapiCapture::loopback(Some(virtual_5_1_id)).describe()?;
//! let device = WasapiRenderDevice::with_device_id(&spdif_id)?;
//! let mut live = LivePipeline::new(capture, device, LiveConfiguration::default())?;
//! live.start(FrameAccumulator::with_channel_map(codec, ChannelMap::wav_5_1_to_a52())?)?;
//! ```

#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod wasapi_capture;
#[cfg(target_os = "windows")]
pub mod wasapi_render;
#[cfg(target_os = "windows")]
pub mod wave_format;

#[cfg(target_os = "windows")]
pub use com::ComApartment;
#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_capture::{CaptureSource, WasapiCapture};
#[cfg(target_os = "windows")]
pub use wasapi_render::WasapiRenderDevice;
