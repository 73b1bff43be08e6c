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
use std::{sync::Arc, time::Duration};

pub mod catalog;
pub mod cpal;
pub mod engine;
pub mod mock;
pub mod resample;
pub mod stem;
mod thread_priority;

pub use catalog::{DeviceCatalog, DeviceInfo, DeviceKind};
pub use engine::{BlockStatus, MicIngest, MixEngine};
pub use stem::{StemBuffer, StemPair};

/// Errors raised by the audio layer.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio device {device} is unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("no usable output device found")]
    NoOutputDevice,

    #[error("unable to open stream: {0}")]
    StreamOpen(String),

    #[error("unable to start stream: {0}")]
    StreamStart(String),

    #[error("unable to enumerate audio devices: {0}")]
    Enumeration(String),

    #[error("invalid stems: {0}")]
    InvalidStems(String),

    #[error("player has already been stopped")]
    PlayerStopped,

    #[error(transparent)]
    Resample(#[from] resample::ResampleError),
}

/// The parameters a stream is opened with.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSpec {
    /// Device index in the backend's enumeration, or None for the system default.
    pub device: Option<usize>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per callback block.
    pub block_size: u32,
    /// Requested latency. Backends that can't honor it exactly pick the closest they can.
    pub latency: Duration,
}

impl StreamSpec {
    /// Human readable device description for logging.
    pub fn device_name(&self) -> String {
        match self.device {
            Some(index) => index.to_string(),
            None => "default".to_string(),
        }
    }
}

/// An open platform stream. Dropping the handle closes the stream.
pub trait StreamHandle: Send {
    /// Stops the stream abruptly, discarding anything still buffered.
    fn abort(&mut self);
}

/// A platform audio subsystem.
pub trait AudioBackend: Send + Sync {
    /// Enumerates every device the backend knows about, inputs and outputs alike.
    fn devices(&self) -> Result<Vec<DeviceInfo>, AudioError>;

    /// Index of the system default output device, if there is one.
    fn default_output(&self) -> Option<usize>;

    /// Index of the system default input device, if there is one.
    fn default_input(&self) -> Option<usize>;

    /// Verifies that an output stream could be opened with the given parameters without
    /// actually opening it.
    fn check_output(&self, spec: &StreamSpec) -> Result<(), AudioError>;

    /// Opens and starts an output stream that pulls its blocks from the engine.
    fn open_output(
        &self,
        spec: &StreamSpec,
        engine: Arc<MixEngine>,
    ) -> Result<Box<dyn StreamHandle>, AudioError>;

    /// Opens and starts an input stream that pushes its blocks into the ingest.
    fn open_input(
        &self,
        spec: &StreamSpec,
        ingest: MicIngest,
    ) -> Result<Box<dyn StreamHandle>, AudioError>;
}

/// Gets the backend with the given name. Names starting with "mock" produce the in-memory
/// backend, everything else uses the platform's audio subsystem.
pub fn get_backend(name: &str) -> Arc<dyn AudioBackend> {
    if name.starts_with("mock") {
        return Arc::new(mock::Backend::clocked(Duration::from_millis(5)));
    }

    Arc::new(cpal::Backend::new())
}
