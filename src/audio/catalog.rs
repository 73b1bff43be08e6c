// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{fmt, sync::Arc};

use tracing::{debug, warn};

use super::{AudioBackend, AudioError};

/// Rates above this are treated as bogus device reports.
const MAX_SANE_SAMPLE_RATE: u32 = 192_000;

/// A device as reported by the platform audio subsystem.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
    pub host_api: String,
}

impl DeviceInfo {
    /// The label users pick devices by, e.g. "3: Speakers (ALSA)".
    pub fn label(&self) -> String {
        format!("{}: {} ({})", self.index, self.name, self.host_api)
    }

    fn supports(&self, kind: DeviceKind) -> bool {
        match kind {
            DeviceKind::Output => self.max_output_channels > 0,
            DeviceKind::Input => self.max_input_channels > 0,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (in={}, out={}, {}Hz)",
            self.label(),
            self.max_input_channels,
            self.max_output_channels,
            self.default_sample_rate
        )
    }
}

/// Which direction a device is used in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Output,
    Input,
}

/// Returns the rate if it is plausible, otherwise the fallback.
pub fn sane_sample_rate(rate: u32, fallback: u32) -> u32 {
    if rate == 0 || rate > MAX_SANE_SAMPLE_RATE {
        fallback
    } else {
        rate
    }
}

/// Enumerates devices and resolves user selections against what is currently present.
#[derive(Clone)]
pub struct DeviceCatalog {
    backend: Arc<dyn AudioBackend>,
}

impl DeviceCatalog {
    pub fn new(backend: Arc<dyn AudioBackend>) -> DeviceCatalog {
        DeviceCatalog { backend }
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    /// Every device the backend knows about.
    pub fn devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        self.backend.devices()
    }

    /// Devices with at least one output channel.
    pub fn outputs(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        self.of_kind(DeviceKind::Output)
    }

    /// Devices with at least one input channel.
    pub fn inputs(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        self.of_kind(DeviceKind::Input)
    }

    fn of_kind(&self, kind: DeviceKind) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|device| device.supports(kind))
            .collect())
    }

    /// Looks up a device by index.
    pub fn device(&self, index: usize) -> Option<DeviceInfo> {
        match self.devices() {
            Ok(devices) => devices.into_iter().find(|device| device.index == index),
            Err(e) => {
                warn!(err = %e, "Unable to enumerate devices");
                None
            }
        }
    }

    /// Resolves a label (or bare device name) back to a device index. Unknown labels resolve
    /// to None, meaning the system default.
    pub fn resolve(&self, label: Option<&str>, kind: DeviceKind) -> Option<usize> {
        let label = label.map(str::trim).filter(|label| !label.is_empty())?;
        let devices = match self.of_kind(kind) {
            Ok(devices) => devices,
            Err(e) => {
                warn!(err = %e, label, "Unable to enumerate devices");
                return None;
            }
        };

        let found = devices
            .iter()
            .find(|device| device.label() == label)
            .or_else(|| devices.iter().find(|device| device.name.trim() == label))
            .map(|device| device.index);
        if found.is_none() {
            debug!(label, ?kind, "Device not found, using default");
        }
        found
    }

    /// Returns true if the index still names a device usable in the given direction.
    pub fn is_valid(&self, index: usize, kind: DeviceKind) -> bool {
        self.device(index)
            .map(|device| device.supports(kind))
            .unwrap_or(false)
    }

    /// Returns the index if it is still valid, otherwise None (the system default).
    pub fn validate(&self, index: Option<usize>, kind: DeviceKind) -> Option<usize> {
        index.filter(|index| {
            let valid = self.is_valid(*index, kind);
            if !valid {
                warn!(index, ?kind, "Selected device is no longer valid, using default");
            }
            valid
        })
    }

    /// The native sample rate of an output device (None is the default device). Missing
    /// devices and implausible rates yield the fallback.
    pub fn output_sample_rate(&self, device: Option<usize>, fallback: u32) -> u32 {
        let index = match device.or_else(|| self.backend.default_output()) {
            Some(index) => index,
            None => return fallback,
        };

        match self.device(index) {
            Some(info) => sane_sample_rate(info.default_sample_rate, fallback),
            None => fallback,
        }
    }
}
