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

use tracing::{debug, info, span, warn, Level, Span};

use crate::audio::{
    catalog::sane_sample_rate, engine::DEFAULT_MIC_QUEUE_DEPTH, AudioError, DeviceCatalog,
    DeviceKind, MicIngest, MixEngine, StemPair, StreamHandle, StreamSpec,
};

/// Lifecycle of a single player. Stopped is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

/// Device and stream settings for a player.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerOptions {
    /// Output device index, None for the system default.
    pub output_device: Option<usize>,
    /// Microphone device index, None for the system default input.
    pub mic_device: Option<usize>,
    pub mic_enabled: bool,
    /// Frames per callback block.
    pub block_size: u32,
    pub latency: Duration,
    pub mic_queue_depth: usize,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        PlayerOptions {
            output_device: None,
            mic_device: None,
            mic_enabled: false,
            block_size: 1024,
            latency: Duration::from_millis(30),
            mic_queue_depth: DEFAULT_MIC_QUEUE_DEPTH,
        }
    }
}

/// Clamps a volume into [0, 1].
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 1.0)
}

/// Plays one track's stems through an output device, optionally mixing in a microphone.
/// A player is used for a single track; once stopped it can't be restarted.
pub struct AudioPlayer {
    engine: Arc<MixEngine>,
    catalog: DeviceCatalog,
    options: PlayerOptions,
    output: Option<Box<dyn StreamHandle>>,
    mic: Option<Box<dyn StreamHandle>>,
    state: PlayerState,
    /// Set when the requested output device couldn't be used and another one was.
    fell_back: bool,
    span: Span,
}

impl AudioPlayer {
    /// Creates a new player over the given stems. Nothing is opened until play.
    pub fn new(stems: Arc<StemPair>, catalog: DeviceCatalog, options: PlayerOptions) -> AudioPlayer {
        let engine = Arc::new(MixEngine::new(stems, options.mic_queue_depth));
        AudioPlayer {
            engine,
            catalog,
            options,
            output: None,
            mic: None,
            state: PlayerState::Idle,
            fell_back: false,
            span: span!(Level::INFO, "audio player"),
        }
    }

    fn output_spec(&self, device: Option<usize>) -> StreamSpec {
        StreamSpec {
            device,
            sample_rate: self.engine.sample_rate(),
            channels: self.engine.channels(),
            block_size: self.options.block_size,
            latency: self.options.latency,
        }
    }

    /// The devices to try, in order: the requested device, the system default, then every
    /// enumerated device with outputs.
    fn output_candidates(&self) -> Vec<Option<usize>> {
        let requested = self.options.output_device;
        // The stored index may have gone away since it was chosen.
        let mut candidates = match self.catalog.validate(requested, DeviceKind::Output) {
            Some(index) => vec![Some(index), None],
            None => vec![None],
        };
        match self.catalog.outputs() {
            Ok(outputs) => candidates.extend(
                outputs
                    .into_iter()
                    .map(|device| Some(device.index))
                    .filter(|index| *index != requested),
            ),
            Err(e) => warn!(err = %e, "Unable to enumerate fallback devices"),
        }
        candidates
    }

    /// Starts playback from the beginning. The microphone is opened first if enabled; a
    /// microphone failure disables it but doesn't stop playback. If the requested output device
    /// can't be opened, the system default and then every other output device is tried.
    pub fn play(&mut self) -> Result<(), AudioError> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.state == PlayerState::Stopped {
            return Err(AudioError::PlayerStopped);
        }

        self.close_output();
        self.engine.start();

        if self.options.mic_enabled && self.mic.is_none() {
            if let Err(e) = self.start_mic(self.options.mic_device) {
                warn!(err = %e, "Unable to open microphone, continuing without it");
            }
        }

        let requested = self.options.output_device;
        let mut last_err = None;
        for candidate in self.output_candidates() {
            let spec = self.output_spec(candidate);
            if candidate != requested {
                if let Err(e) = self.catalog.backend().check_output(&spec) {
                    debug!(device = spec.device_name(), err = %e, "Fallback device rejected");
                    continue;
                }
            }

            match self.catalog.backend().open_output(&spec, self.engine.clone()) {
                Ok(handle) => {
                    self.output = Some(handle);
                    self.fell_back = candidate != requested;
                    self.options.output_device = candidate;
                    self.state = PlayerState::Playing;
                    info!(
                        device = spec.device_name(),
                        fell_back = self.fell_back,
                        sample_rate = spec.sample_rate,
                        channels = spec.channels,
                        duration = self.duration_secs(),
                        "Playing."
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(device = spec.device_name(), err = %e, "Unable to open output device");
                    last_err = Some(e);
                }
            }
        }

        // Nothing worked, so undo everything this attempt opened.
        self.engine.halt();
        self.stop_mic();
        self.state = PlayerState::Idle;
        Err(match last_err {
            Some(AudioError::DeviceUnavailable { .. }) | None => AudioError::NoOutputDevice,
            Some(e) => e,
        })
    }

    /// Pauses playback. The stream stays open.
    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.engine.set_paused(true);
            self.state = PlayerState::Paused;
        }
    }

    /// Resumes paused playback.
    pub fn resume(&mut self) {
        if self.state == PlayerState::Paused {
            self.engine.set_paused(false);
            self.state = PlayerState::Playing;
        }
    }

    /// Stops playback abruptly and closes every stream. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.state == PlayerState::Stopped {
            return;
        }
        let span = self.span.clone();
        let _enter = span.enter();

        self.engine.halt();
        self.close_output();
        self.stop_mic();
        self.state = PlayerState::Stopped;
        debug!("Stopped.");
    }

    fn close_output(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.abort();
        }
    }

    /// Seeks to the given fraction of the track, clamped into [0, 1].
    pub fn seek_to(&self, fraction: f64) {
        self.engine.seek_fraction(fraction);
    }

    pub fn set_vocal_volume(&self, volume: f32) {
        self.engine.set_vocal_volume(clamp_volume(volume));
    }

    pub fn set_accompaniment_volume(&self, volume: f32) {
        self.engine.set_accompaniment_volume(clamp_volume(volume));
    }

    pub fn set_mic_volume(&self, volume: f32) {
        self.engine.set_mic_volume(clamp_volume(volume));
    }

    /// Moves playback to another output device. If streaming, the stream is reopened on the
    /// new device with position and pause state intact. On failure the selection is cleared,
    /// playback halts and the error is returned.
    pub fn change_output_device(&mut self, device: Option<usize>) -> Result<(), AudioError> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.output.is_none() {
            self.options.output_device = device;
            return Ok(());
        }

        self.close_output();
        let spec = self.output_spec(device);
        match self.catalog.backend().open_output(&spec, self.engine.clone()) {
            Ok(handle) => {
                self.output = Some(handle);
                self.options.output_device = device;
                self.fell_back = false;
                info!(device = spec.device_name(), "Changed output device.");
                Ok(())
            }
            Err(e) => {
                warn!(device = spec.device_name(), err = %e, "Unable to change output device");
                self.options.output_device = None;
                self.engine.halt();
                self.state = PlayerState::Idle;
                Err(e)
            }
        }
    }

    /// Opens the microphone on the given device (None for the default input). The capture
    /// stream uses at most as many channels as the output and never a higher rate than the
    /// output. On failure the microphone is disabled.
    pub fn start_mic(&mut self, device: Option<usize>) -> Result<(), AudioError> {
        let span = self.span.clone();
        let _enter = span.enter();

        self.stop_mic();
        self.options.mic_device = device;
        match self.open_mic(device) {
            Ok(handle) => {
                self.mic = Some(handle);
                self.options.mic_enabled = true;
                Ok(())
            }
            Err(e) => {
                self.engine.attach_mic(false);
                self.options.mic_enabled = false;
                Err(e)
            }
        }
    }

    fn open_mic(&self, device: Option<usize>) -> Result<Box<dyn StreamHandle>, AudioError> {
        let unavailable = |reason: &str| AudioError::DeviceUnavailable {
            device: device
                .map(|index| index.to_string())
                .unwrap_or_else(|| "default input".to_string()),
            reason: reason.to_string(),
        };

        let info = device
            .or_else(|| self.catalog.backend().default_input())
            .and_then(|index| self.catalog.device(index))
            .ok_or_else(|| unavailable("no such device"))?;
        if info.max_input_channels == 0 {
            return Err(unavailable("device has no inputs"));
        }

        let output_rate = self.engine.sample_rate();
        let channels = info.max_input_channels.min(self.engine.channels()).max(1);
        let sample_rate = sane_sample_rate(info.default_sample_rate, output_rate).min(output_rate);
        let spec = StreamSpec {
            device,
            sample_rate,
            channels,
            block_size: self.options.block_size,
            latency: self.options.latency,
        };

        let ingest = MicIngest::new(self.engine.clone(), channels, sample_rate)?;
        self.engine.attach_mic(true);
        let handle = self.catalog.backend().open_input(&spec, ingest)?;
        info!(
            device = info.label(),
            sample_rate, channels, "Microphone started."
        );
        Ok(handle)
    }

    /// Closes the microphone stream and drops anything it had queued.
    pub fn stop_mic(&mut self) {
        self.engine.attach_mic(false);
        if let Some(mut mic) = self.mic.take() {
            mic.abort();
            debug!("Microphone stopped.");
        }
    }

    /// Enables or disables the microphone. While streaming, enabling opens the capture stream
    /// right away.
    pub fn set_mic_enabled(&mut self, enabled: bool, device: Option<usize>) -> Result<(), AudioError> {
        self.options.mic_device = device;
        if !enabled {
            self.stop_mic();
            self.options.mic_enabled = false;
            return Ok(());
        }

        if self.output.is_some() {
            self.start_mic(device)
        } else {
            self.options.mic_enabled = true;
            Ok(())
        }
    }

    /// Playback progress in [0, 1].
    pub fn get_progress(&self) -> f64 {
        self.engine.progress()
    }

    /// Elapsed time in seconds.
    pub fn get_current_time(&self) -> f64 {
        self.engine.current_time()
    }

    /// Track duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.engine.num_frames() as f64 / self.engine.sample_rate() as f64
    }

    /// The player state. A track that has played to its end reports Stopped.
    pub fn state(&self) -> PlayerState {
        match self.state {
            PlayerState::Playing | PlayerState::Paused if self.engine.is_finished() => {
                PlayerState::Stopped
            }
            state => state,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlayerState::Paused
    }

    /// The engine, for observers that must not hold the player.
    pub fn engine(&self) -> Arc<MixEngine> {
        self.engine.clone()
    }

    /// The output device in use (or last requested).
    pub fn output_device(&self) -> Option<usize> {
        self.options.output_device
    }

    /// True if playback ended up on a different device than the one requested.
    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    pub fn mic_enabled(&self) -> bool {
        self.options.mic_enabled
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::{mock, StemBuffer};

    fn stems(num_frames: usize, sample_rate: u32) -> Arc<StemPair> {
        Arc::new(
            StemPair::new(
                StemBuffer::new(vec![0.1; num_frames * 2], sample_rate, 2),
                StemBuffer::new(vec![0.2; num_frames * 2], sample_rate, 2),
            )
            .expect("valid pair"),
        )
    }

    fn player(
        backend: &Arc<mock::Backend>,
        sample_rate: u32,
        options: PlayerOptions,
    ) -> AudioPlayer {
        let catalog = DeviceCatalog::new(backend.clone());
        AudioPlayer::new(stems(sample_rate as usize, sample_rate), catalog, options)
    }

    #[test]
    fn test_play_and_progress() {
        let backend = Arc::new(mock::Backend::manual());
        let mut player = player(&backend, 48000, PlayerOptions::default());
        assert_eq!(player.state(), PlayerState::Idle);

        player.play().expect("play");
        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(backend.opened_outputs(), vec![None]);
        assert!(!player.fell_back());

        let mut block = vec![0.0; 2048];
        player.engine().render(&mut block);
        assert_eq!(player.get_progress(), 1024.0 / 48000.0);
        assert_eq!(player.get_current_time(), 1024.0 / 48000.0);
        assert_eq!(player.duration_secs(), 1.0);
    }

    #[test]
    fn test_fallback_to_default() {
        let backend = Arc::new(mock::Backend::manual());
        backend.fail_device(Some(2));
        let mut player = player(
            &backend,
            48000,
            PlayerOptions {
                output_device: Some(2),
                ..Default::default()
            },
        );

        player.play().expect("play");
        assert_eq!(backend.opened_outputs(), vec![None]);
        assert!(player.fell_back());
        assert_eq!(player.output_device(), None);
    }

    #[test]
    fn test_invalid_device_is_skipped() {
        let backend = Arc::new(mock::Backend::manual());
        // Device 1 only has inputs.
        let mut player = player(
            &backend,
            48000,
            PlayerOptions {
                output_device: Some(1),
                ..Default::default()
            },
        );

        player.play().expect("play");
        assert_eq!(backend.opened_outputs(), vec![None]);
        assert!(player.fell_back());
        assert_eq!(player.output_device(), None);
    }

    #[test]
    fn test_fallback_to_enumerated() {
        let backend = Arc::new(mock::Backend::manual());
        backend.fail_device(Some(2));
        backend.fail_device(None);
        let mut player = player(
            &backend,
            48000,
            PlayerOptions {
                output_device: Some(2),
                ..Default::default()
            },
        );

        player.play().expect("play");
        assert_eq!(backend.opened_outputs(), vec![Some(0)]);
        assert_eq!(player.output_device(), Some(0));
    }

    #[test]
    fn test_no_device_tears_down_mic() {
        let backend = Arc::new(mock::Backend::manual());
        backend.fail_device(None);
        backend.fail_device(Some(0));
        backend.fail_device(Some(2));
        let mut player = player(
            &backend,
            48000,
            PlayerOptions {
                mic_device: Some(1),
                mic_enabled: true,
                ..Default::default()
            },
        );

        assert!(matches!(player.play(), Err(AudioError::NoOutputDevice)));
        assert_eq!(backend.active_inputs(), 0);
        assert_eq!(backend.active_outputs(), 0);
        assert!(!player.is_playing());
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[test]
    fn test_pause_resume_stop_idempotent() {
        let backend = Arc::new(mock::Backend::manual());
        let mut player = player(&backend, 48000, PlayerOptions::default());
        player.play().expect("play");

        player.pause();
        player.pause();
        assert_eq!(player.state(), PlayerState::Paused);
        assert!(player.engine().is_paused());

        player.resume();
        player.resume();
        assert_eq!(player.state(), PlayerState::Playing);
        assert!(!player.engine().is_paused());

        player.stop();
        player.stop();
        assert_eq!(player.state(), PlayerState::Stopped);
        assert_eq!(backend.active_outputs(), 0);
        assert!(!player.is_playing());
        assert!(matches!(player.play(), Err(AudioError::PlayerStopped)));
    }

    #[test]
    fn test_seek_round_trip_and_clamping() {
        let backend = Arc::new(mock::Backend::manual());
        let mut player = player(&backend, 44100, PlayerOptions::default());
        player.play().expect("play");

        for fraction in [0.0, 0.1, 0.5, 0.77, 1.0] {
            player.seek_to(fraction);
            assert!((player.get_progress() - fraction).abs() <= 1.0 / 44100.0);
        }
        player.seek_to(3.0);
        assert_eq!(player.get_progress(), 1.0);
        player.seek_to(-1.0);
        assert_eq!(player.get_progress(), 0.0);
    }

    #[test]
    fn test_volumes_are_clamped() {
        let backend = Arc::new(mock::Backend::manual());
        let player = player(&backend, 44100, PlayerOptions::default());
        player.set_vocal_volume(1.5);
        player.set_accompaniment_volume(-0.5);
        player.set_mic_volume(0.3);
        assert_eq!(player.engine().volumes(), (1.0, 0.0, 0.3));
    }

    #[test]
    fn test_mic_rate_and_channels() {
        let backend = Arc::new(mock::Backend::manual());
        // The mock microphone runs at 44100, above this track's rate.
        let mut player = player(
            &backend,
            22050,
            PlayerOptions {
                mic_enabled: true,
                ..Default::default()
            },
        );
        player.play().expect("play");
        assert!(player.mic_enabled());
        assert_eq!(backend.active_inputs(), 1);

        // Mono capture gets spread across both output channels.
        backend.inject_input(&[0.5; 64]);
        assert_eq!(player.engine().mic_queue_len(), 1);

        player.stop_mic();
        assert_eq!(backend.active_inputs(), 0);
        assert_eq!(player.engine().mic_queue_len(), 0);
    }

    #[test]
    fn test_mic_failure_disables_mic() {
        let backend = Arc::new(mock::Backend::manual());
        let mut player = player(&backend, 48000, PlayerOptions::default());
        player.play().expect("play");

        // Device 0 has no inputs.
        assert!(player.set_mic_enabled(true, Some(0)).is_err());
        assert!(!player.mic_enabled());
        assert!(!player.engine().is_mic_attached());

        player.set_mic_enabled(true, Some(1)).expect("mic");
        assert!(player.mic_enabled());
        player.set_mic_enabled(false, Some(1)).expect("mic off");
        assert!(!player.mic_enabled());
        assert_eq!(backend.active_inputs(), 0);
    }

    #[test]
    fn test_change_output_device_keeps_state() {
        let backend = Arc::new(mock::Backend::manual());
        let mut player = player(&backend, 48000, PlayerOptions::default());
        player.play().expect("play");
        player.seek_to(0.5);
        player.pause();

        player.change_output_device(Some(2)).expect("change");
        assert_eq!(backend.opened_outputs(), vec![None, Some(2)]);
        assert_eq!(backend.active_outputs(), 1);
        assert_eq!(player.state(), PlayerState::Paused);
        assert_eq!(player.get_progress(), 0.5);
        assert!(player.engine().is_playing());

        backend.fail_device(Some(0));
        assert!(player.change_output_device(Some(0)).is_err());
        assert_eq!(player.output_device(), None);
        assert_eq!(backend.active_outputs(), 0);
    }

    #[test]
    fn test_natural_end_reports_stopped() {
        let backend = Arc::new(mock::Backend::manual());
        let mut player = player(&backend, 1000, PlayerOptions::default());
        player.play().expect("play");

        let mut block = vec![0.0; 2048];
        player.engine().render(&mut block);
        assert!(!player.is_playing());
        assert_eq!(player.state(), PlayerState::Stopped);
    }
}
