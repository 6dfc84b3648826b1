//! Windows audio endpoint lookup via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list render and capture endpoints with
//! friendly names and transport types, and to resolve endpoint IDs for the
//! render device and the capture providers.

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::UI::Shell::PropertiesSystem::IPropertyStore;

use ac3_live_core::models::device::{AudioTransportType, DeviceFlow, DeviceInfo};
use ac3_live_core::models::error::StreamError;

/// `EndpointFormFactor` values for digital outputs.
const FORM_FACTOR_SPDIF: u32 = 8;
const FORM_FACTOR_DIGITAL_DISPLAY: u32 = 9;

/// Audio endpoint enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Create a new device enumerator.
    ///
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, StreamError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| StreamError::device(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// List active render (output) endpoints.
    pub fn list_render_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        self.list_devices(eRender, DeviceFlow::Render)
    }

    /// List active capture (input) endpoints.
    pub fn list_capture_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        self.list_devices(eCapture, DeviceFlow::Capture)
    }

    /// Render endpoints able to pass a compressed bitstream to a receiver.
    pub fn list_passthrough_devices(&self) -> Result<Vec<DeviceInfo>, StreamError> {
        Ok(self
            .list_render_devices()?
            .into_iter()
            .filter(DeviceInfo::is_digital_passthrough)
            .collect())
    }

    pub fn default_render_device(&self) -> Result<IMMDevice, StreamError> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(|_| StreamError::DeviceNotAvailable)
        }
    }

    pub fn default_capture_device(&self) -> Result<IMMDevice, StreamError> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(eCapture, eConsole)
                .map_err(|_| StreamError::DeviceNotAvailable)
        }
    }

    /// Resolve an endpoint by its ID.
    pub fn device_by_id(&self, id: &str) -> Result<IMMDevice, StreamError> {
        let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR(wide_id.as_ptr()))
                .map_err(|_| StreamError::DeviceNotAvailable)
        }
    }

    /// Describe an endpoint.
    pub fn describe(device: &IMMDevice, flow: DeviceFlow, is_default: bool) -> DeviceInfo {
        let id = unsafe { device.GetId() }
            .ok()
            .and_then(|id| unsafe { id.to_string() }.ok())
            .unwrap_or_default();
        let store = unsafe { device.OpenPropertyStore(STGM_READ) }.ok();
        let name = store
            .as_ref()
            .and_then(|s| read_string(s, &PKEY_Device_FriendlyName))
            .unwrap_or_else(|| "Unknown device".into());
        let transport_type = store.as_ref().map(detect_transport_type);

        DeviceInfo {
            id,
            name,
            flow,
            is_default,
            transport_type,
        }
    }

    fn list_devices(&self, data_flow: EDataFlow, flow: DeviceFlow) -> Result<Vec<DeviceInfo>, StreamError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow, DEVICE_STATE_ACTIVE)
                .map_err(|e| StreamError::device(format!("EnumAudioEndpoints failed: {}", e)))?;

            let count = collection
                .GetCount()
                .map_err(|e| StreamError::device(format!("GetCount failed: {}", e)))?;

            let default_id = self
                .enumerator
                .GetDefaultAudioEndpoint(data_flow, eConsole)
                .ok()
                .and_then(|d| d.GetId().ok())
                .and_then(|id| id.to_string().ok());

            let mut devices = Vec::new();
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let mut info = Self::describe(&device, flow, false);
                if info.id.is_empty() {
                    continue;
                }
                info.is_default = default_id.as_deref() == Some(info.id.as_str());
                devices.push(info);
            }
            Ok(devices)
        }
    }
}

fn read_string(store: &IPropertyStore, key: &PROPERTYKEY) -> Option<String> {
    let value = unsafe { store.GetValue(key) }.ok()?;
    let text = value.to_string();
    (!text.is_empty()).then_some(text)
}

fn read_u32(store: &IPropertyStore, key: &PROPERTYKEY) -> Option<u32> {
    let value = unsafe { store.GetValue(key) }.ok()?;
    u32::try_from(&value).ok()
}

/// Transport type from the endpoint form factor and enumerator name.
fn detect_transport_type(store: &IPropertyStore) -> AudioTransportType {
    match read_u32(store, &PKEY_AudioEndpoint_FormFactor) {
        Some(FORM_FACTOR_SPDIF) => return AudioTransportType::Spdif,
        Some(FORM_FACTOR_DIGITAL_DISPLAY) => return AudioTransportType::Hdmi,
        _ => {}
    }

    match read_string(store, &PKEY_Device_EnumeratorName) {
        Some(name) if name.contains("BTHLEENUM") => AudioTransportType::BluetoothLE,
        Some(name) if name.contains("BTHENUM") => AudioTransportType::Bluetooth,
        Some(name) if name.contains("USB") => AudioTransportType::Usb,
        Some(name) if name.contains("HDAUDIO") => AudioTransportType::BuiltIn,
        Some(_) => AudioTransportType::Virtual,
        None => AudioTransportType::Unknown,
    }
}
