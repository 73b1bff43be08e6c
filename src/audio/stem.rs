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
use std::sync::Arc;

use super::AudioError;

/// An immutable buffer of interleaved f32 samples. Cloning is cheap, the samples
/// are shared.
#[derive(Clone, Debug)]
pub struct StemBuffer {
    /// Interleaved samples.
    samples: Arc<[f32]>,
    /// Sample rate in Hz.
    sample_rate: u32,
    /// Number of interleaved channels.
    channels: u16,
}

impl StemBuffer {
    /// Creates a new stem buffer. Trailing samples that don't make up a full frame are dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> StemBuffer {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);

        StemBuffer {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    /// Creates a silent stem buffer with the given number of frames.
    pub fn silence(num_frames: usize, sample_rate: u32, channels: u16) -> StemBuffer {
        StemBuffer::new(
            vec![0.0; num_frames * channels.max(1) as usize],
            sample_rate,
            channels,
        )
    }

    /// The interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duplicates a mono buffer into the given number of channels. Buffers that aren't mono
    /// are returned unchanged.
    pub fn upmix(&self, channels: u16) -> StemBuffer {
        if self.channels != 1 || channels <= 1 {
            return self.clone();
        }

        let mut samples = Vec::with_capacity(self.samples.len() * channels as usize);
        for sample in self.samples.iter() {
            samples.extend(std::iter::repeat(*sample).take(channels as usize));
        }
        StemBuffer::new(samples, self.sample_rate, channels)
    }
}

/// The vocal and accompaniment stems of a single track. Both stems share the same
/// sample rate and channel count; the playable length is that of the shorter stem.
#[derive(Clone, Debug)]
pub struct StemPair {
    vocals: StemBuffer,
    accompaniment: StemBuffer,
    num_frames: usize,
}

impl StemPair {
    /// Pairs up two stems. Fails if their sample rates or channel counts disagree.
    pub fn new(vocals: StemBuffer, accompaniment: StemBuffer) -> Result<StemPair, AudioError> {
        if vocals.channels() != accompaniment.channels() {
            return Err(AudioError::InvalidStems(format!(
                "vocals have {} channels, accompaniment has {}",
                vocals.channels(),
                accompaniment.channels()
            )));
        }
        if vocals.sample_rate() != accompaniment.sample_rate() {
            return Err(AudioError::InvalidStems(format!(
                "vocals are {}Hz, accompaniment is {}Hz",
                vocals.sample_rate(),
                accompaniment.sample_rate()
            )));
        }
        if vocals.sample_rate() == 0 {
            return Err(AudioError::InvalidStems(
                "sample rate must be greater than 0".to_string(),
            ));
        }

        let num_frames = vocals.num_frames().min(accompaniment.num_frames());
        Ok(StemPair {
            vocals,
            accompaniment,
            num_frames,
        })
    }

    pub fn vocals(&self) -> &StemBuffer {
        &self.vocals
    }

    pub fn accompaniment(&self) -> &StemBuffer {
        &self.accompaniment
    }

    pub fn sample_rate(&self) -> u32 {
        self.vocals.sample_rate()
    }

    pub fn channels(&self) -> u16 {
        self.vocals.channels()
    }

    /// The playable number of frames, the shorter of the two stems.
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Duration of the playable region in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.num_frames as f64 / self.sample_rate() as f64
    }

    /// Interleaved vocal samples for `count` frames starting at `frame`.
    pub(crate) fn vocal_frames(&self, frame: usize, count: usize) -> &[f32] {
        let channels = self.channels() as usize;
        &self.vocals.samples()[frame * channels..(frame + count) * channels]
    }

    /// Interleaved accompaniment samples for `count` frames starting at `frame`.
    pub(crate) fn accompaniment_frames(&self, frame: usize, count: usize) -> &[f32] {
        let channels = self.channels() as usize;
        &self.accompaniment.samples()[frame * channels..(frame + count) * channels]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stem_buffer_drops_partial_frame() {
        let buffer = StemBuffer::new(vec![0.1, 0.2, 0.3, 0.4, 0.5], 44100, 2);
        assert_eq!(buffer.num_frames(), 2);
        assert_eq!(buffer.samples(), &[0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_upmix_mono() {
        let buffer = StemBuffer::new(vec![0.1, 0.2], 44100, 1).upmix(2);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.samples(), &[0.1, 0.1, 0.2, 0.2]);

        // Stereo is left alone.
        let stereo = StemBuffer::new(vec![0.1, 0.2], 44100, 2).upmix(4);
        assert_eq!(stereo.channels(), 2);
    }

    #[test]
    fn test_pair_truncates_to_shorter() {
        let vocals = StemBuffer::silence(100, 44100, 2);
        let accompaniment = StemBuffer::silence(80, 44100, 2);
        let pair = StemPair::new(vocals, accompaniment).expect("pair should be valid");
        assert_eq!(pair.num_frames(), 80);
        assert_eq!(pair.vocal_frames(70, 10).len(), 20);
    }

    #[test]
    fn test_pair_rejects_mismatches() {
        assert!(StemPair::new(
            StemBuffer::silence(10, 44100, 2),
            StemBuffer::silence(10, 44100, 1)
        )
        .is_err());
        assert!(StemPair::new(
            StemBuffer::silence(10, 44100, 2),
            StemBuffer::silence(10, 48000, 2)
        )
        .is_err());
    }

    #[test]
    fn test_empty_pair() {
        let pair = StemPair::new(
            StemBuffer::new(vec![], 44100, 2),
            StemBuffer::new(vec![], 44100, 2),
        )
        .expect("empty stems are valid");
        assert_eq!(pair.num_frames(), 0);
        assert_eq!(pair.duration_secs(), 0.0);
    }
}
