//! Device listing (`/wm/device/`) decoding

use labgate_controller_api::{AttachmentPoint, ControllerError, ControllerResult};
use serde::Deserialize;
use std::net::Ipv4Addr;

/// Floodlight answers with either a bare array or `{"devices": [...]}`
/// depending on version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeviceListing {
    Bare(Vec<Device>),
    Wrapped { devices: Vec<Device> },
}

impl DeviceListing {
    fn into_devices(self) -> Vec<Device> {
        match self {
            DeviceListing::Bare(devices) => devices,
            DeviceListing::Wrapped { devices } => devices,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Device {
    #[serde(default)]
    ipv4: Vec<String>,
    #[serde(default, rename = "attachmentPoint")]
    attachment_point: Vec<RawAttachmentPoint>,
}

#[derive(Debug, Deserialize)]
struct RawAttachmentPoint {
    #[serde(rename = "switchDPID")]
    switch_dpid: String,
    port: PortValue,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u32),
    Text(String),
}

impl PortValue {
    fn to_port(&self) -> ControllerResult<u32> {
        match self {
            PortValue::Number(port) => Ok(*port),
            PortValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| ControllerError::Protocol(format!("invalid port '{}'", text))),
        }
    }
}

/// Find the first attachment point of the device that owns `address`.
///
/// Devices that list the address without any attachment point are skipped.
pub fn attachment_from_devices(body: &[u8], address: Ipv4Addr) -> ControllerResult<AttachmentPoint> {
    let listing: DeviceListing = serde_json::from_slice(body)
        .map_err(|e| ControllerError::Protocol(format!("device listing: {}", e)))?;

    let wanted = address.to_string();
    for device in listing.into_devices() {
        if !device.ipv4.iter().any(|ip| ip.trim() == wanted) {
            continue;
        }
        if let Some(point) = device.attachment_point.first() {
            return Ok(AttachmentPoint::new(point.switch_dpid.clone(), point.port.to_port()?));
        }
    }

    Err(ControllerError::NotFound(address))
}
