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
use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};

use super::{
    resample::{ResampleError, StreamResampler},
    stem::StemPair,
};

/// The default number of microphone blocks that may be queued before the oldest is dropped.
pub const DEFAULT_MIC_QUEUE_DEPTH: usize = 5;

/// What the driving stream should do after a block has been rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    /// Keep requesting blocks.
    Continue,
    /// The track has ended. No further callbacks are needed.
    Finished,
}

/// A captured microphone block.
struct MicBlock {
    samples: Vec<f32>,
    channels: u16,
}

/// Everything the callback and control threads share. Guarded by a single lock.
struct EngineState {
    position: usize,
    playing: bool,
    paused: bool,
    finished: bool,
    vocal_volume: f32,
    accompaniment_volume: f32,
    mic_volume: f32,
    mic_attached: bool,
    mic_queue: VecDeque<MicBlock>,
    /// Consumed mic blocks kept around so capture doesn't allocate.
    spare: Vec<MicBlock>,
}

/// Mixes the vocal and accompaniment stems of a track, plus an optional live microphone,
/// into output blocks.
///
/// The engine has one non-reentrant lock. The stream callback only ever calls [`render`],
/// the capture callback only ever calls [`push_mic_samples`], and control methods are never
/// invoked from either callback, so no path acquires the lock twice.
///
/// [`render`]: MixEngine::render
/// [`push_mic_samples`]: MixEngine::push_mic_samples
pub struct MixEngine {
    stems: Arc<StemPair>,
    mic_queue_depth: usize,
    state: Mutex<EngineState>,
    /// Signalled whenever playback stops, naturally or otherwise.
    stopped: Condvar,
}

impl MixEngine {
    /// Creates a new engine over the given stems. Output has the stems' channel count and rate.
    pub fn new(stems: Arc<StemPair>, mic_queue_depth: usize) -> MixEngine {
        MixEngine {
            stems,
            mic_queue_depth: mic_queue_depth.max(1),
            state: Mutex::new(EngineState {
                position: 0,
                playing: false,
                paused: false,
                finished: false,
                vocal_volume: 1.0,
                accompaniment_volume: 1.0,
                mic_volume: 1.0,
                mic_attached: false,
                mic_queue: VecDeque::with_capacity(mic_queue_depth + 1),
                spare: Vec::with_capacity(mic_queue_depth + 1),
            }),
            stopped: Condvar::new(),
        }
    }

    /// Produces one block of interleaved output. The block length should be a multiple of the
    /// channel count; any trailing partial frame is silenced.
    pub fn render(&self, out: &mut [f32]) -> BlockStatus {
        let channels = self.channels() as usize;
        let frames = out.len() / channels;
        let used = frames * channels;
        out[used..].fill(0.0);

        let mut state = self.state.lock();
        if !state.playing || state.paused {
            out.fill(0.0);
            return if state.finished {
                BlockStatus::Finished
            } else {
                BlockStatus::Continue
            };
        }

        // The final partial block is dropped in favor of silence.
        if state.position + frames >= self.stems.num_frames() {
            out.fill(0.0);
            state.playing = false;
            state.finished = true;
            self.stopped.notify_all();
            return BlockStatus::Finished;
        }

        let vocals = self.stems.vocal_frames(state.position, frames);
        let accompaniment = self.stems.accompaniment_frames(state.position, frames);
        let vocal_volume = state.vocal_volume;
        let accompaniment_volume = state.accompaniment_volume;
        for ((sample, vocal), accomp) in out[..used]
            .iter_mut()
            .zip(vocals.iter())
            .zip(accompaniment.iter())
        {
            *sample = accompaniment_volume * accomp + vocal_volume * vocal;
        }

        if state.mic_attached {
            if let Some(block) = state.mic_queue.pop_front() {
                mix_mic_block(&mut out[..used], channels, &block, state.mic_volume);
                if state.spare.len() <= self.mic_queue_depth {
                    state.spare.push(block);
                }
            }
        }

        state.position += frames;
        BlockStatus::Continue
    }

    /// Queues a captured microphone block. Once more than the configured depth is queued the
    /// oldest blocks are dropped.
    pub fn push_mic_samples(&self, samples: &[f32], channels: u16) {
        let mut state = self.state.lock();
        if !state.mic_attached {
            return;
        }

        let mut block = state.spare.pop().unwrap_or_else(|| MicBlock {
            samples: Vec::with_capacity(samples.len()),
            channels,
        });
        block.samples.clear();
        block.samples.extend_from_slice(samples);
        block.channels = channels.max(1);
        state.mic_queue.push_back(block);

        while state.mic_queue.len() > self.mic_queue_depth {
            if let Some(dropped) = state.mic_queue.pop_front() {
                state.spare.push(dropped);
            }
        }
    }

    /// Rewinds to the start and begins playing.
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.position = 0;
        state.playing = true;
        state.paused = false;
        state.finished = false;
    }

    /// Stops playback and drops any queued microphone audio.
    pub fn halt(&self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.paused = false;
        state.mic_queue.clear();
        self.stopped.notify_all();
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    /// Moves the playback position to the given frame, bounded by the track length.
    pub fn seek_frame(&self, frame: usize) {
        let num_frames = self.num_frames();
        self.state.lock().position = frame.min(num_frames);
    }

    /// Moves the playback position to the given fraction of the track. The fraction is
    /// clamped into [0, 1].
    pub fn seek_fraction(&self, fraction: f64) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.seek_frame((fraction * self.num_frames() as f64).round() as usize);
    }

    pub fn set_vocal_volume(&self, volume: f32) {
        self.state.lock().vocal_volume = volume;
    }

    pub fn set_accompaniment_volume(&self, volume: f32) {
        self.state.lock().accompaniment_volume = volume;
    }

    pub fn set_mic_volume(&self, volume: f32) {
        self.state.lock().mic_volume = volume;
    }

    /// Marks whether a microphone stream is feeding this engine. Detaching drops queued audio.
    pub fn attach_mic(&self, attached: bool) {
        let mut state = self.state.lock();
        state.mic_attached = attached;
        if !attached {
            state.mic_queue.clear();
        }
    }

    pub fn is_mic_attached(&self) -> bool {
        self.state.lock().mic_attached
    }

    pub fn mic_queue_len(&self) -> usize {
        self.state.lock().mic_queue.len()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// True once the track has played through to its end.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// The current playback position in frames.
    pub fn position(&self) -> usize {
        self.state.lock().position
    }

    pub fn num_frames(&self) -> usize {
        self.stems.num_frames()
    }

    pub fn sample_rate(&self) -> u32 {
        self.stems.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.stems.channels()
    }

    /// Returns (vocal, accompaniment, mic) volumes.
    pub fn volumes(&self) -> (f32, f32, f32) {
        let state = self.state.lock();
        (
            state.vocal_volume,
            state.accompaniment_volume,
            state.mic_volume,
        )
    }

    /// Playback progress in [0, 1]. Zero for an empty track.
    pub fn progress(&self) -> f64 {
        let num_frames = self.num_frames();
        if num_frames == 0 {
            return 0.0;
        }
        self.position() as f64 / num_frames as f64
    }

    /// Elapsed playback time in seconds.
    pub fn current_time(&self) -> f64 {
        self.position() as f64 / self.sample_rate() as f64
    }

    /// Blocks until playback stops or the timeout expires. Returns true if stopped.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.playing {
            return true;
        }
        self.stopped.wait_for(&mut state, timeout);
        !state.playing
    }
}

/// Adds a microphone block into the mixed output. Short blocks contribute nothing past their
/// end, mono is replicated across all outputs, and extra input channels are ignored.
fn mix_mic_block(out: &mut [f32], channels: usize, block: &MicBlock, volume: f32) {
    let block_channels = block.channels.max(1) as usize;
    for (frame, mic_frame) in out
        .chunks_exact_mut(channels)
        .zip(block.samples.chunks_exact(block_channels))
    {
        for (c, sample) in frame.iter_mut().enumerate() {
            *sample += volume * mic_frame[c % block_channels];
        }
    }
}

/// Feeds captured microphone blocks into an engine, converting them to the engine's sample
/// rate and channel count first.
pub struct MicIngest {
    engine: Arc<MixEngine>,
    input_channels: u16,
    resampler: Option<StreamResampler>,
    resampled: Vec<f32>,
    conformed: Vec<f32>,
}

impl MicIngest {
    /// Creates a new ingest for a capture stream with the given format.
    pub fn new(
        engine: Arc<MixEngine>,
        input_channels: u16,
        input_rate: u32,
    ) -> Result<MicIngest, ResampleError> {
        let input_channels = input_channels.max(1);
        let resampler = if input_rate != engine.sample_rate() {
            Some(StreamResampler::new(
                input_rate,
                engine.sample_rate(),
                input_channels,
            )?)
        } else {
            None
        };

        Ok(MicIngest {
            engine,
            input_channels,
            resampler,
            resampled: Vec::new(),
            conformed: Vec::new(),
        })
    }

    /// Converts and queues one captured block. Never fails; blocks that can't be converted
    /// are dropped.
    pub fn ingest(&mut self, block: &[f32]) {
        let MicIngest {
            engine,
            input_channels,
            resampler,
            resampled,
            conformed,
        } = self;

        let samples: &[f32] = match resampler {
            Some(resampler) => {
                resampled.clear();
                if resampler.process(block, resampled).is_err() {
                    return;
                }
                resampled.as_slice()
            }
            None => block,
        };
        if samples.is_empty() {
            return;
        }

        let in_channels = *input_channels as usize;
        let out_channels = engine.channels() as usize;
        conformed.clear();
        for frame in samples.chunks_exact(in_channels) {
            for c in 0..out_channels {
                conformed.push(frame[c % in_channels]);
            }
        }

        engine.push_mic_samples(conformed, out_channels as u16);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::stem::StemBuffer;

    /// A stereo pair whose vocal frame i is (i, -i) and whose accompaniment is constant 0.25.
    fn ramp_pair(num_frames: usize, sample_rate: u32) -> Arc<StemPair> {
        let mut vocals = Vec::with_capacity(num_frames * 2);
        for i in 0..num_frames {
            let v = i as f32 / num_frames as f32;
            vocals.push(v);
            vocals.push(-v);
        }
        let accompaniment = vec![0.25; num_frames * 2];
        Arc::new(
            StemPair::new(
                StemBuffer::new(vocals, sample_rate, 2),
                StemBuffer::new(accompaniment, sample_rate, 2),
            )
            .expect("valid pair"),
        )
    }

    #[test]
    fn test_mix_equation() {
        let stems = ramp_pair(4096, 44100);
        let engine = MixEngine::new(stems.clone(), DEFAULT_MIC_QUEUE_DEPTH);
        engine.set_vocal_volume(1.0);
        engine.set_accompaniment_volume(0.5);
        engine.start();

        for block_size in [64usize, 100, 333] {
            let position = engine.position();
            let mut out = vec![0.0; block_size * 2];
            assert_eq!(engine.render(&mut out), BlockStatus::Continue);

            let vocals = stems.vocal_frames(position, block_size);
            let accompaniment = stems.accompaniment_frames(position, block_size);
            for i in 0..out.len() {
                assert_eq!(out[i], 0.5 * accompaniment[i] + 1.0 * vocals[i]);
            }
            assert_eq!(engine.position(), position + block_size);
        }
    }

    #[test]
    fn test_silence_when_idle_or_paused() {
        let engine = MixEngine::new(ramp_pair(4096, 44100), DEFAULT_MIC_QUEUE_DEPTH);

        let mut out = vec![1.0; 128];
        assert_eq!(engine.render(&mut out), BlockStatus::Continue);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(engine.position(), 0);

        engine.start();
        engine.render(&mut out);
        assert_eq!(engine.position(), 64);

        engine.set_paused(true);
        engine.set_paused(true);
        let mut out = vec![1.0; 128];
        engine.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(engine.position(), 64);
        assert!(engine.is_paused());

        engine.set_paused(false);
        engine.render(&mut out);
        assert_eq!(engine.position(), 128);
    }

    #[test]
    fn test_one_second_track_end() {
        let vocals = StemBuffer::new(vec![0.1; 44100 * 2], 44100, 2);
        let accompaniment = StemBuffer::new(vec![0.2; 44100 * 2], 44100, 2);
        let stems = Arc::new(StemPair::new(vocals, accompaniment).expect("valid pair"));
        let engine = MixEngine::new(stems, DEFAULT_MIC_QUEUE_DEPTH);
        engine.set_vocal_volume(1.0);
        engine.set_accompaniment_volume(0.5);
        engine.start();

        let mut out = vec![0.0; 1024 * 2];
        for _ in 0..43 {
            assert_eq!(engine.render(&mut out), BlockStatus::Continue);
            assert!(out.iter().all(|s| (*s - 0.2).abs() < 1e-6));
        }
        assert_eq!(engine.position(), 43 * 1024);

        // Only 1068 frames remain, so the next block is a hard stop.
        let mut out = vec![1.0; 1024 * 2];
        assert_eq!(engine.render(&mut out), BlockStatus::Finished);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(!engine.is_playing());
        assert!(engine.is_finished());
        assert_eq!(engine.position(), 43 * 1024);

        let mut out = vec![1.0; 1024 * 2];
        assert_eq!(engine.render(&mut out), BlockStatus::Finished);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_end_with_mixed_block_sizes() {
        let engine = MixEngine::new(ramp_pair(1000, 44100), DEFAULT_MIC_QUEUE_DEPTH);
        engine.start();

        let mut delivered = 0;
        let sizes = [7usize, 250, 31, 400, 128];
        let mut i = 0;
        while engine.is_playing() {
            let size = sizes[i % sizes.len()];
            let mut out = vec![1.0; size * 2];
            let status = engine.render(&mut out);
            if status == BlockStatus::Continue {
                delivered += size;
            } else {
                assert!(out.iter().all(|s| *s == 0.0));
            }
            i += 1;
        }
        assert!(delivered < 1000);
        assert_eq!(engine.position(), delivered);

        let mut out = vec![1.0; 14];
        engine.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_empty_track_finishes_immediately() {
        let engine = MixEngine::new(ramp_pair(0, 44100), DEFAULT_MIC_QUEUE_DEPTH);
        engine.start();
        let mut out = vec![1.0; 32];
        assert_eq!(engine.render(&mut out), BlockStatus::Finished);
        assert!(!engine.is_playing());
        assert_eq!(engine.progress(), 0.0);
    }

    #[test]
    fn test_progress_and_seek() {
        let engine = MixEngine::new(ramp_pair(10000, 10000), DEFAULT_MIC_QUEUE_DEPTH);
        engine.start();

        let mut last = engine.progress();
        let mut out = vec![0.0; 200];
        for _ in 0..20 {
            engine.render(&mut out);
            let progress = engine.progress();
            assert!(progress >= last);
            assert_eq!(progress, engine.position() as f64 / 10000.0);
            last = progress;
        }

        for fraction in [0.0, 0.25, 0.3333, 0.999, 1.0] {
            engine.seek_fraction(fraction);
            assert!((engine.progress() - fraction).abs() <= 1.0 / 10000.0);
        }

        engine.seek_fraction(1.5);
        assert_eq!(engine.position(), 10000);
        engine.seek_fraction(-2.0);
        assert_eq!(engine.position(), 0);

        engine.seek_frame(5000);
        assert_eq!(engine.current_time(), 0.5);
    }

    #[test]
    fn test_mic_queue_bound() {
        let engine = MixEngine::new(ramp_pair(4096, 44100), DEFAULT_MIC_QUEUE_DEPTH);

        // Nothing is queued while no mic is attached.
        engine.push_mic_samples(&[1.0; 8], 2);
        assert_eq!(engine.mic_queue_len(), 0);

        engine.attach_mic(true);
        for i in 0..8 {
            engine.push_mic_samples(&[i as f32; 8], 2);
            assert!(engine.mic_queue_len() <= DEFAULT_MIC_QUEUE_DEPTH);
        }
        assert_eq!(engine.mic_queue_len(), DEFAULT_MIC_QUEUE_DEPTH);

        // The oldest three blocks were dropped, so the first one mixed is block 3.
        engine.set_vocal_volume(0.0);
        engine.set_accompaniment_volume(0.0);
        engine.start();
        let mut out = vec![0.0; 8];
        engine.render(&mut out);
        assert!(out.iter().all(|s| *s == 3.0));
        assert_eq!(engine.mic_queue_len(), DEFAULT_MIC_QUEUE_DEPTH - 1);

        engine.attach_mic(false);
        assert_eq!(engine.mic_queue_len(), 0);
    }

    #[test]
    fn test_mic_block_padding_and_channels() {
        let engine = MixEngine::new(ramp_pair(4096, 44100), DEFAULT_MIC_QUEUE_DEPTH);
        engine.set_vocal_volume(0.0);
        engine.set_accompaniment_volume(0.0);
        engine.set_mic_volume(0.5);
        engine.attach_mic(true);
        engine.start();

        // Mono, two frames, into a four frame stereo block.
        engine.push_mic_samples(&[1.0, 2.0], 1);
        let mut out = vec![0.0; 8];
        engine.render(&mut out);
        assert_eq!(out, vec![0.5, 0.5, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);

        // Three channels truncated down to two.
        engine.push_mic_samples(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3);
        let mut out = vec![0.0; 4];
        engine.render(&mut out);
        assert_eq!(out, vec![0.5, 1.0, 2.0, 2.5]);

        // An empty queue adds nothing.
        let mut out = vec![0.0; 4];
        engine.render(&mut out);
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_mic_ingest_conforms_channels() {
        let engine = Arc::new(MixEngine::new(ramp_pair(4096, 44100), 5));
        engine.attach_mic(true);
        let mut ingest = MicIngest::new(engine.clone(), 1, 44100).expect("ingest");
        ingest.ingest(&[0.5, 0.25]);
        assert_eq!(engine.mic_queue_len(), 1);

        engine.set_vocal_volume(0.0);
        engine.set_accompaniment_volume(0.0);
        engine.start();
        let mut out = vec![0.0; 4];
        engine.render(&mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_mic_ingest_resamples() {
        let engine = Arc::new(MixEngine::new(ramp_pair(4096, 48000), 5));
        engine.attach_mic(true);
        let mut ingest = MicIngest::new(engine.clone(), 1, 24000).expect("ingest");
        for _ in 0..8 {
            ingest.ingest(&[0.1; 480]);
        }
        assert!(engine.mic_queue_len() > 0);
    }

    #[test]
    fn test_halt_and_wait() {
        let engine = Arc::new(MixEngine::new(ramp_pair(4096, 44100), 5));
        engine.start();
        assert!(!engine.wait_for_stop(Duration::from_millis(10)));

        let waiter = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.wait_for_stop(Duration::from_secs(3)))
        };
        std::thread::sleep(Duration::from_millis(20));
        engine.halt();
        engine.halt();
        assert!(waiter.join().expect("join"));
        assert!(!engine.is_playing());
        assert!(!engine.is_finished());
    }
}
