use serde::{Deserialize, Serialize};

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFlow {
    /// A capture endpoint (microphone, line in).
    Capture,
    /// A render endpoint (speakers, S/PDIF, HDMI).
    Render,
    /// The mix going to a render endpoint, captured back.
    Loopback,
}

/// Transport type for an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioTransportType {
    BuiltIn,
    Bluetooth,
    BluetoothLE,
    Usb,
    Hdmi,
    Spdif,
    Virtual,
    Unknown,
}

/// An audio endpoint used for capture or playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub flow: DeviceFlow,
    pub is_default: bool,
    pub transport_type: Option<AudioTransportType>,
}

impl DeviceInfo {
    /// Whether the endpoint can carry a compressed bitstream to a receiver.
    pub fn is_digital_passthrough(&self) -> bool {
        matches!(
            self.transport_type,
            Some(AudioTransportType::Hdmi) | Some(AudioTransportType::Spdif)
        )
    }
}
