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
use std::{sync::Arc, thread, time::Duration};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SizedSample,
};
use crossbeam_channel::RecvTimeoutError;
use tracing::{error, info, span, warn, Level};

use super::{
    thread_priority::CallbackPriority, AudioBackend, AudioError, DeviceInfo, MicIngest,
    MixEngine, StreamHandle, StreamSpec,
};

/// How often a stream thread checks whether it should shut down.
const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A device found during enumeration.
struct Enumerated {
    info: DeviceInfo,
    device: cpal::Device,
}

/// The platform audio backend.
pub struct Backend {}

impl Backend {
    pub fn new() -> Backend {
        Backend {}
    }

    /// Enumerates devices across every available host. Indices are assigned in host order,
    /// then device order within each host.
    fn enumerate(&self) -> Result<Vec<Enumerated>, AudioError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout().ok();
        let _shh_stderr = shh::stderr().ok();

        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(err = e.to_string(), host = host_id.name(), "Unable to open host");
                    continue;
                }
            };
            let host_devices = match host.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let name = match device.name() {
                    Ok(name) => name,
                    Err(_e) => continue,
                };

                let max_output_channels = device
                    .supported_output_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                let max_input_channels = device
                    .supported_input_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                if max_output_channels == 0 && max_input_channels == 0 {
                    continue;
                }

                let default_sample_rate = if max_output_channels > 0 {
                    device.default_output_config().map(|c| c.sample_rate().0)
                } else {
                    device.default_input_config().map(|c| c.sample_rate().0)
                }
                .unwrap_or(0);

                devices.push(Enumerated {
                    info: DeviceInfo {
                        index: devices.len(),
                        name,
                        max_input_channels,
                        max_output_channels,
                        default_sample_rate,
                        host_api: host_id.name().to_string(),
                    },
                    device,
                });
            }
        }

        if devices.is_empty() {
            warn!("No audio devices found");
        }
        Ok(devices)
    }

    /// Finds the index of the default host's default device.
    fn default_index(&self, output: bool) -> Option<usize> {
        let host = cpal::default_host();
        let device = if output {
            host.default_output_device()
        } else {
            host.default_input_device()
        }?;
        let name = device.name().ok()?;
        let host_name = host.id().name();

        self.enumerate()
            .ok()?
            .into_iter()
            .find(|e| {
                e.info.name == name
                    && e.info.host_api == host_name
                    && if output {
                        e.info.max_output_channels > 0
                    } else {
                        e.info.max_input_channels > 0
                    }
            })
            .map(|e| e.info.index)
    }

    /// Resolves the spec's device to a live cpal device.
    fn resolve(&self, spec: &StreamSpec, output: bool) -> Result<cpal::Device, AudioError> {
        let unavailable = |reason: &str| AudioError::DeviceUnavailable {
            device: spec.device_name(),
            reason: reason.to_string(),
        };

        match spec.device {
            Some(index) => self
                .enumerate()?
                .into_iter()
                .find(|e| e.info.index == index)
                .map(|e| e.device)
                .ok_or_else(|| unavailable("no such device")),
            None => {
                let host = cpal::default_host();
                if output {
                    host.default_output_device()
                } else {
                    host.default_input_device()
                }
                .ok_or_else(|| unavailable("no default device"))
            }
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::new()
    }
}

impl AudioBackend for Backend {
    fn devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(self.enumerate()?.into_iter().map(|e| e.info).collect())
    }

    fn default_output(&self) -> Option<usize> {
        self.default_index(true)
    }

    fn default_input(&self) -> Option<usize> {
        self.default_index(false)
    }

    fn check_output(&self, spec: &StreamSpec) -> Result<(), AudioError> {
        let device = self.resolve(spec, true)?;
        let configs =
            device
                .supported_output_configs()
                .map_err(|e| AudioError::DeviceUnavailable {
                    device: spec.device_name(),
                    reason: e.to_string(),
                })?;

        let rate = cpal::SampleRate(spec.sample_rate);
        let supported = configs.into_iter().any(|c| {
            c.channels() == spec.channels
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        });
        if supported {
            Ok(())
        } else {
            Err(AudioError::DeviceUnavailable {
                device: spec.device_name(),
                reason: format!(
                    "{} channels at {}Hz is not supported",
                    spec.channels, spec.sample_rate
                ),
            })
        }
    }

    fn open_output(
        &self,
        spec: &StreamSpec,
        engine: Arc<MixEngine>,
    ) -> Result<Box<dyn StreamHandle>, AudioError> {
        let device = self.resolve(spec, true)?;
        let spec = spec.clone();

        spawn_stream_thread("stemplayer-output", move || {
            let span = span!(Level::INFO, "output stream (cpal)");
            let _enter = span.enter();

            let stream = build_output_stream(&device, &spec, engine.clone())?;
            stream
                .play()
                .map_err(|e| AudioError::StreamStart(e.to_string()))?;
            info!(
                device = spec.device_name(),
                sample_rate = spec.sample_rate,
                channels = spec.channels,
                latency = ?spec.latency,
                "Output stream started."
            );

            let finished_check = engine.clone();
            Ok(ActiveStream {
                stream,
                finished: Some(Box::new(move || finished_check.is_finished())),
            })
        })
    }

    fn open_input(
        &self,
        spec: &StreamSpec,
        ingest: MicIngest,
    ) -> Result<Box<dyn StreamHandle>, AudioError> {
        let device = self.resolve(spec, false)?;
        let spec = spec.clone();

        spawn_stream_thread("stemplayer-input", move || {
            let span = span!(Level::INFO, "input stream (cpal)");
            let _enter = span.enter();

            let stream = build_input_stream(&device, &spec, ingest)?;
            stream
                .play()
                .map_err(|e| AudioError::StreamStart(e.to_string()))?;
            info!(
                device = spec.device_name(),
                sample_rate = spec.sample_rate,
                channels = spec.channels,
                "Input stream started."
            );

            Ok(ActiveStream {
                stream,
                finished: None,
            })
        })
    }
}

/// A started stream living on its own thread.
struct ActiveStream {
    stream: cpal::Stream,
    /// Returns true once the stream has nothing left to play.
    finished: Option<Box<dyn Fn() -> bool>>,
}

enum Control {
    Abort,
}

/// Handle to a stream thread. cpal streams can't move between threads, so each stream is
/// created, driven and dropped by a dedicated thread that this handle controls.
struct ThreadStream {
    control: Option<crossbeam_channel::Sender<Control>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamHandle for ThreadStream {
    fn abort(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Abort);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ThreadStream {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Spawns a thread that builds a stream with the given function and keeps it alive until the
/// returned handle aborts it. Build errors are reported back to the caller.
fn spawn_stream_thread<F>(name: &str, build: F) -> Result<Box<dyn StreamHandle>, AudioError>
where
    F: FnOnce() -> Result<ActiveStream, AudioError> + Send + 'static,
{
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);
    let (control_tx, control_rx) = crossbeam_channel::bounded::<Control>(1);

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let active = match build() {
                Ok(active) => active,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            let mut paused_at_end = false;
            loop {
                match control_rx.recv_timeout(CONTROL_POLL_INTERVAL) {
                    Ok(Control::Abort) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let finished = active.finished.as_ref().map(|f| f()).unwrap_or(false);
                        if finished && !paused_at_end {
                            // No more callbacks are needed once the track has ended.
                            let _ = active.stream.pause();
                            paused_at_end = true;
                        }
                    }
                }
            }

            // Abrupt stop: pause and drop without draining.
            let _ = active.stream.pause();
            drop(active);
        })
        .map_err(|e| AudioError::StreamOpen(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(Box::new(ThreadStream {
            control: Some(control_tx),
            thread: Some(thread),
        })),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(AudioError::StreamOpen("stream thread exited".to_string()))
        }
    }
}

/// Buffer sizes to try, in order: the pinned block size, a size derived from the requested
/// latency, then whatever the host picks.
fn buffer_sizes(spec: &StreamSpec) -> Vec<cpal::BufferSize> {
    let mut sizes = vec![cpal::BufferSize::Fixed(spec.block_size)];
    let latency_frames = (spec.latency.as_secs_f64() * spec.sample_rate as f64).round() as u32;
    if latency_frames > 0 && latency_frames != spec.block_size {
        sizes.push(cpal::BufferSize::Fixed(latency_frames));
    }
    sizes.push(cpal::BufferSize::Default);
    sizes
}

fn stream_config(spec: &StreamSpec, buffer_size: cpal::BufferSize) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: spec.channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size,
    }
}

/// f32 callback: render directly into the cpal buffer.
fn create_f32_output_callback(
    engine: Arc<MixEngine>,
    mut priority: CallbackPriority,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        priority.apply_once();
        engine.render(data);
    }
}

/// Integer callback: render into scratch space and convert.
fn create_converting_output_callback<T>(
    engine: Arc<MixEngine>,
    mut priority: CallbackPriority,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        priority.apply_once();
        // Only reallocates if the host changes its buffer size.
        if scratch.len() != data.len() {
            scratch.resize(data.len(), 0.0);
        }
        engine.render(&mut scratch);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

fn create_input_callback<T>(
    mut ingest: MicIngest,
    mut priority: CallbackPriority,
) -> impl FnMut(&[T], &cpal::InputCallbackInfo) + Send + 'static
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &[T], _: &cpal::InputCallbackInfo| {
        priority.apply_once();
        scratch.clear();
        scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
        ingest.ingest(&scratch);
    }
}

fn build_output_stream(
    device: &cpal::Device,
    spec: &StreamSpec,
    engine: Arc<MixEngine>,
) -> Result<cpal::Stream, AudioError> {
    let sample_format = device
        .default_output_config()
        .map(|c| c.sample_format())
        .unwrap_or(cpal::SampleFormat::F32);
    let err_fn = |err: cpal::StreamError| error!(err = %err, "Output stream error");

    // A fixed block size is preferred, but not every host supports it.
    let mut last_err = None;
    for buffer_size in buffer_sizes(spec) {
        let config = stream_config(spec, buffer_size);
        let priority = CallbackPriority::from_env();
        let result = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                create_f32_output_callback(engine.clone(), priority),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                create_converting_output_callback::<i16>(engine.clone(), priority),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I32 => device.build_output_stream(
                &config,
                create_converting_output_callback::<i32>(engine.clone(), priority),
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_output_stream(
                &config,
                create_converting_output_callback::<u16>(engine.clone(), priority),
                err_fn,
                None,
            ),
            other => {
                return Err(AudioError::StreamOpen(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };

        match result {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e.to_string()),
        }
    }

    Err(AudioError::StreamOpen(
        last_err.unwrap_or_else(|| "unknown error".to_string()),
    ))
}

fn build_input_stream(
    device: &cpal::Device,
    spec: &StreamSpec,
    ingest: MicIngest,
) -> Result<cpal::Stream, AudioError> {
    let sample_format = device
        .default_input_config()
        .map(|c| c.sample_format())
        .unwrap_or(cpal::SampleFormat::F32);
    let err_fn = |err: cpal::StreamError| error!(err = %err, "Input stream error");
    let config = stream_config(spec, cpal::BufferSize::Default);
    let priority = CallbackPriority::from_env();

    let result = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            create_input_callback::<f32>(ingest, priority),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            create_input_callback::<i16>(ingest, priority),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I32 => device.build_input_stream(
            &config,
            create_input_callback::<i32>(ingest, priority),
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config,
            create_input_callback::<u16>(ingest, priority),
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::StreamOpen(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };

    result.map_err(|e| AudioError::StreamOpen(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(block_size: u32, latency: Duration) -> StreamSpec {
        StreamSpec {
            device: None,
            sample_rate: 48000,
            channels: 2,
            block_size,
            latency,
        }
    }

    #[test]
    fn test_buffer_sizes_follow_latency() {
        assert_eq!(
            buffer_sizes(&spec(1024, Duration::from_millis(30))),
            vec![
                cpal::BufferSize::Fixed(1024),
                cpal::BufferSize::Fixed(1440),
                cpal::BufferSize::Default
            ]
        );

        // Nothing extra to try when the latency matches the block size or is zero.
        assert_eq!(
            buffer_sizes(&spec(480, Duration::from_millis(10))),
            vec![cpal::BufferSize::Fixed(480), cpal::BufferSize::Default]
        );
        assert_eq!(
            buffer_sizes(&spec(1024, Duration::ZERO)),
            vec![cpal::BufferSize::Fixed(1024), cpal::BufferSize::Default]
        );
    }
}
