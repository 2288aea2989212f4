//! Capture device resolution
//!
//! The selection surface hands the core an opaque device id plus a loopback
//! hint; this module turns that into a cpal device. Ids follow the
//! `input:<name>` / `output:<name>` convention, an `output:` id meaning
//! loopback capture of that playback device.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Which device to capture from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSelection {
    /// Device id; `None` selects the host default
    pub id: Option<String>,
    /// Capture system output instead of an input device
    pub loopback: bool,
}

impl DeviceSelection {
    /// Host default input device
    pub fn default_input() -> Self {
        Self::default()
    }

    /// Host default output device, captured via loopback
    pub fn default_loopback() -> Self {
        Self {
            id: None,
            loopback: true,
        }
    }

    /// Select a device by id
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            loopback: false,
        }
    }

    /// Whether this selection captures a playback device
    pub fn is_loopback(&self) -> bool {
        self.loopback || self.parsed_id().map(|(is_output, _)| is_output).unwrap_or(false)
    }

    /// Split the id into (is_output, name)
    fn parsed_id(&self) -> Option<(bool, &str)> {
        let id = self.id.as_deref()?;
        Some(if let Some(name) = id.strip_prefix("output:") {
            (true, name)
        } else if let Some(name) = id.strip_prefix("input:") {
            (false, name)
        } else {
            // Bare names refer to input devices unless loopback is requested
            (self.loopback, id)
        })
    }
}

/// Resolve a selection against the default cpal host
pub fn resolve_device(selection: &DeviceSelection) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some((is_output, name)) = selection.parsed_id() else {
        let device = if selection.loopback {
            host.default_output_device()
        } else {
            host.default_input_device()
        };
        return device.ok_or_else(|| {
            AudioError::DeviceNotFound(
                if selection.loopback {
                    "No default output device"
                } else {
                    "No default input device"
                }
                .to_string(),
            )
        });
    };

    let devices = if is_output {
        host.output_devices()
    } else {
        host.input_devices()
    };
    let devices = devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(device);
            }
        }
    }

    Err(AudioError::DeviceNotFound(
        selection.id.clone().unwrap_or_default(),
    ))
}
