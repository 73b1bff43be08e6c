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
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{
    AudioBackend, AudioError, BlockStatus, DeviceInfo, MicIngest, MixEngine, StreamHandle,
    StreamSpec,
};

type SharedIngest = Arc<Mutex<Option<MicIngest>>>;

#[derive(Default)]
struct MockState {
    /// Devices that refuse to open. None is the default device.
    failing: HashSet<Option<usize>>,
    /// Every output open attempt that succeeded, in order.
    opened_outputs: Vec<Option<usize>>,
    outputs: Vec<Arc<AtomicBool>>,
    inputs: Vec<SharedIngest>,
}

/// A mock backend. Doesn't actually play anything. When clocked, output streams render a
/// block from their engine on every tick; otherwise tests drive the engine themselves.
pub struct Backend {
    devices: Vec<DeviceInfo>,
    clock: Option<Duration>,
    state: Arc<Mutex<MockState>>,
}

impl Backend {
    fn new(clock: Option<Duration>) -> Backend {
        let device = |index: usize, name: &str, inputs: u16, outputs: u16, rate: u32| DeviceInfo {
            index,
            name: name.to_string(),
            max_input_channels: inputs,
            max_output_channels: outputs,
            default_sample_rate: rate,
            host_api: "Mock".to_string(),
        };

        Backend {
            devices: vec![
                device(0, "Mock Output", 0, 2, 48000),
                device(1, "Mock Microphone", 1, 0, 44100),
                device(2, "Mock Secondary Output", 0, 2, 44100),
            ],
            clock,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// A backend whose streams never pull blocks on their own.
    pub fn manual() -> Backend {
        Backend::new(None)
    }

    /// A backend whose output streams render one block per interval.
    pub fn clocked(interval: Duration) -> Backend {
        Backend::new(Some(interval))
    }

    /// Makes every subsequent open of the given device fail.
    pub fn fail_device(&self, device: Option<usize>) {
        self.state.lock().failing.insert(device);
    }

    /// Lets a previously failed device open again.
    pub fn restore_device(&self, device: Option<usize>) {
        self.state.lock().failing.remove(&device);
    }

    /// Devices successfully opened for output, in order.
    pub fn opened_outputs(&self) -> Vec<Option<usize>> {
        self.state.lock().opened_outputs.clone()
    }

    /// Number of output streams that haven't been closed.
    pub fn active_outputs(&self) -> usize {
        self.state
            .lock()
            .outputs
            .iter()
            .filter(|active| active.load(Ordering::Relaxed))
            .count()
    }

    /// Number of input streams that haven't been closed.
    pub fn active_inputs(&self) -> usize {
        self.state
            .lock()
            .inputs
            .iter()
            .filter(|ingest| ingest.lock().is_some())
            .count()
    }

    /// Delivers a captured block to every open input stream.
    pub fn inject_input(&self, block: &[f32]) {
        let inputs = self.state.lock().inputs.clone();
        for input in inputs {
            if let Some(ingest) = input.lock().as_mut() {
                ingest.ingest(block);
            }
        }
    }

    fn check(&self, spec: &StreamSpec, output: bool) -> Result<(), AudioError> {
        let unavailable = |reason: &str| AudioError::DeviceUnavailable {
            device: spec.device_name(),
            reason: reason.to_string(),
        };

        if self.state.lock().failing.contains(&spec.device) {
            return Err(unavailable("device failed to open"));
        }

        let index = match spec.device {
            Some(index) => index,
            None if output => 0,
            None => 1,
        };
        let info = self
            .devices
            .get(index)
            .ok_or_else(|| unavailable("no such device"))?;
        let max_channels = if output {
            info.max_output_channels
        } else {
            info.max_input_channels
        };
        if max_channels == 0 || spec.channels > max_channels {
            return Err(unavailable("unsupported channel count"));
        }
        if spec.sample_rate == 0 {
            return Err(unavailable("unsupported sample rate"));
        }
        Ok(())
    }
}

impl AudioBackend for Backend {
    fn devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(self.devices.clone())
    }

    fn default_output(&self) -> Option<usize> {
        Some(0)
    }

    fn default_input(&self) -> Option<usize> {
        Some(1)
    }

    fn check_output(&self, spec: &StreamSpec) -> Result<(), AudioError> {
        self.check(spec, true)
    }

    fn open_output(
        &self,
        spec: &StreamSpec,
        engine: Arc<MixEngine>,
    ) -> Result<Box<dyn StreamHandle>, AudioError> {
        let span = span!(Level::INFO, "output stream (mock)");
        let _enter = span.enter();

        self.check(spec, true)?;
        info!(
            device = spec.device_name(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            "Opened output stream."
        );

        let active = Arc::new(AtomicBool::new(true));
        {
            let mut state = self.state.lock();
            state.opened_outputs.push(spec.device);
            state.outputs.push(active.clone());
        }

        let thread = self.clock.map(|interval| {
            let active = active.clone();
            let block_len = spec.block_size.max(1) as usize * spec.channels.max(1) as usize;
            thread::spawn(move || {
                let mut block = vec![0.0f32; block_len];
                while active.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if !active.load(Ordering::Relaxed) {
                        break;
                    }
                    if engine.render(&mut block) == BlockStatus::Finished {
                        break;
                    }
                }
            })
        });

        Ok(Box::new(Stream {
            active,
            thread,
            input: None,
        }))
    }

    fn open_input(
        &self,
        spec: &StreamSpec,
        ingest: MicIngest,
    ) -> Result<Box<dyn StreamHandle>, AudioError> {
        self.check(spec, false)?;
        info!(
            device = spec.device_name(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            "Opened input stream."
        );

        let input = Arc::new(Mutex::new(Some(ingest)));
        self.state.lock().inputs.push(input.clone());
        Ok(Box::new(Stream {
            active: Arc::new(AtomicBool::new(true)),
            thread: None,
            input: Some(input),
        }))
    }
}

/// A mock stream handle.
struct Stream {
    active: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    input: Option<SharedIngest>,
}

impl StreamHandle for Stream {
    fn abort(&mut self) {
        self.active.store(false, Ordering::Relaxed);
        if let Some(input) = self.input.take() {
            *input.lock() = None;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        audio::stem::{StemBuffer, StemPair},
        testutil::eventually,
    };

    fn spec(device: Option<usize>) -> StreamSpec {
        StreamSpec {
            device,
            sample_rate: 48000,
            channels: 2,
            block_size: 256,
            latency: Duration::from_millis(30),
        }
    }

    fn engine(num_frames: usize) -> Arc<MixEngine> {
        let pair = StemPair::new(
            StemBuffer::silence(num_frames, 48000, 2),
            StemBuffer::silence(num_frames, 48000, 2),
        )
        .expect("valid pair");
        Arc::new(MixEngine::new(Arc::new(pair), 5))
    }

    #[test]
    fn test_failures_and_checks() {
        let backend = Backend::manual();
        assert!(backend.check_output(&spec(None)).is_ok());
        assert!(backend.check_output(&spec(Some(1))).is_err());
        assert!(backend.check_output(&spec(Some(7))).is_err());

        backend.fail_device(Some(2));
        assert!(backend.open_output(&spec(Some(2)), engine(10)).is_err());
        backend.restore_device(Some(2));
        assert!(backend.open_output(&spec(Some(2)), engine(10)).is_ok());
        assert_eq!(backend.opened_outputs(), vec![Some(2)]);
    }

    #[test]
    fn test_clocked_stream_plays_to_the_end() {
        let backend = Backend::clocked(Duration::from_millis(1));
        let engine = engine(2048);
        engine.start();
        let mut stream = backend
            .open_output(&spec(None), engine.clone())
            .expect("open");
        assert_eq!(backend.active_outputs(), 1);

        eventually(|| engine.is_finished(), "Engine never finished");
        stream.abort();
        assert_eq!(backend.active_outputs(), 0);
    }

    #[test]
    fn test_injected_input_reaches_engine() {
        let backend = Backend::manual();
        let engine = engine(2048);
        engine.attach_mic(true);
        let ingest = MicIngest::new(engine.clone(), 1, 48000).expect("ingest");
        // The microphone only has one channel.
        assert!(backend.open_input(&spec(Some(1)), ingest).is_err());

        let ingest = MicIngest::new(engine.clone(), 1, 48000).expect("ingest");
        let mut input_spec = spec(Some(1));
        input_spec.channels = 1;
        let stream = backend.open_input(&input_spec, ingest).expect("open");
        assert_eq!(backend.active_inputs(), 1);

        backend.inject_input(&[0.5; 64]);
        assert_eq!(engine.mic_queue_len(), 1);

        drop(stream);
        assert_eq!(backend.active_inputs(), 0);
        backend.inject_input(&[0.5; 64]);
        assert_eq!(engine.mic_queue_len(), 1);
    }
}
