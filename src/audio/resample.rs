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
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use super::stem::{StemBuffer, StemPair};

/// Input block size for offline stem resampling.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Input block size for streaming (microphone) resampling. Kept small since every
/// frame waiting in the input window is added latency.
const STREAM_BLOCK_SIZE: usize = 256;

/// Error types for resampling.
#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("Unable to construct resampler: {0}Hz -> {1}Hz")]
    Construction(u32, u32),

    #[error("Resampling failed: {0}Hz -> {1}Hz")]
    Processing(u32, u32),

    #[error("Resampled stems are invalid: {0}")]
    InvalidOutput(String),
}

fn sinc_resampler(
    source_rate: u32,
    target_rate: u32,
    sinc_len: usize,
    block_size: usize,
    channels: usize,
) -> Result<SincFixedIn<f32>, ResampleError> {
    if source_rate == 0 || target_rate == 0 || channels == 0 {
        return Err(ResampleError::Construction(source_rate, target_rate));
    }

    let sinc_params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let resample_ratio = target_rate as f64 / source_rate as f64;

    SincFixedIn::<f32>::new(resample_ratio, 1.0, sinc_params, block_size, channels)
        .map_err(|_e| ResampleError::Construction(source_rate, target_rate))
}

/// Splits interleaved samples into one Vec per channel.
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let num_frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(num_frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }
    planar
}

/// Appends the first `num_frames` frames of each scratch channel to the matching output channel.
fn append_planar(output: &mut [Vec<f32>], scratch: &[Vec<f32>], num_frames: usize) {
    for (out_ch, scratch_ch) in output.iter_mut().zip(scratch.iter()) {
        out_ch.extend_from_slice(&scratch_ch[..num_frames.min(scratch_ch.len())]);
    }
}

/// Resamples a whole stem to the target sample rate. The resampler's delay is trimmed
/// so that the output lines up with the input, and the output is exactly
/// `round(num_frames * target_rate / source_rate)` frames long.
pub fn resample_stem(stem: &StemBuffer, target_rate: u32) -> Result<StemBuffer, ResampleError> {
    let source_rate = stem.sample_rate();
    if source_rate == target_rate {
        return Ok(stem.clone());
    }

    let channels = stem.channels() as usize;
    let num_frames = stem.num_frames();
    let expected = (num_frames as f64 * target_rate as f64 / source_rate as f64).round() as usize;

    let mut resampler = sinc_resampler(
        source_rate,
        target_rate,
        256,
        INPUT_BLOCK_SIZE,
        channels,
    )?;
    if num_frames == 0 {
        return Ok(StemBuffer::new(Vec::new(), target_rate, stem.channels()));
    }

    let planar = deinterleave(stem.samples(), channels);
    let delay = resampler.output_delay();
    let mut scratch = resampler.output_buffer_allocate(true);
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
    let processing_err = |_e| ResampleError::Processing(source_rate, target_rate);

    // Full blocks first.
    let mut consumed = 0;
    loop {
        let needed = resampler.input_frames_next();
        if num_frames - consumed < needed {
            break;
        }
        let chunk: Vec<&[f32]> = planar
            .iter()
            .map(|ch| &ch[consumed..consumed + needed])
            .collect();
        let (nbr_in, nbr_out) = resampler
            .process_into_buffer(&chunk, &mut scratch, None)
            .map_err(processing_err)?;
        consumed += nbr_in;
        append_planar(&mut output, &scratch, nbr_out);
    }

    // Whatever is left over.
    if consumed < num_frames {
        let chunk: Vec<&[f32]> = planar.iter().map(|ch| &ch[consumed..]).collect();
        let (_nbr_in, nbr_out) = resampler
            .process_partial_into_buffer(Some(&chunk), &mut scratch, None)
            .map_err(processing_err)?;
        append_planar(&mut output, &scratch, nbr_out);
    }

    // Flush the delay line until the tail of the signal has come out.
    while output[0].len() < expected + delay {
        let (_nbr_in, nbr_out) = resampler
            .process_partial_into_buffer(None::<&[Vec<f32>]>, &mut scratch, None)
            .map_err(processing_err)?;
        if nbr_out == 0 {
            break;
        }
        append_planar(&mut output, &scratch, nbr_out);
    }

    let mut interleaved = Vec::with_capacity(expected * channels);
    for frame in delay..delay + expected {
        for ch in output.iter() {
            interleaved.push(ch.get(frame).copied().unwrap_or(0.0));
        }
    }

    debug!(
        source_rate,
        target_rate,
        input_frames = num_frames,
        output_frames = expected,
        "Resampled stem."
    );

    Ok(StemBuffer::new(interleaved, target_rate, stem.channels()))
}

/// Resamples both stems of a pair to the target rate, one stem per rayon worker.
pub fn resample_pair(pair: &StemPair, target_rate: u32) -> Result<StemPair, ResampleError> {
    if pair.sample_rate() == target_rate {
        return Ok(pair.clone());
    }

    let (vocals, accompaniment) = rayon::join(
        || resample_stem(pair.vocals(), target_rate),
        || resample_stem(pair.accompaniment(), target_rate),
    );

    StemPair::new(vocals?, accompaniment?)
        .map_err(|e| ResampleError::InvalidOutput(e.to_string()))
}

/// Streaming resampler for live input. Interleaved blocks of arbitrary size go in,
/// interleaved output comes out whenever enough input has accumulated for a block.
pub struct StreamResampler {
    resampler: SincFixedIn<f32>,
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    /// Sliding window of input samples (planar).
    input: Vec<Vec<f32>>,
    /// Reused resampler output buffer.
    scratch: Vec<Vec<f32>>,
}

impl StreamResampler {
    /// Creates a streaming resampler between the given rates.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: u16,
    ) -> Result<StreamResampler, ResampleError> {
        let channels = channels as usize;
        let resampler = sinc_resampler(source_rate, target_rate, 64, STREAM_BLOCK_SIZE, channels)?;
        let scratch = resampler.output_buffer_allocate(true);

        Ok(StreamResampler {
            resampler,
            channels,
            source_rate,
            target_rate,
            input: vec![Vec::with_capacity(STREAM_BLOCK_SIZE * 2); channels],
            scratch,
        })
    }

    /// Feeds an interleaved block into the resampler and appends any produced interleaved
    /// frames to `out`. Returns the number of frames appended.
    pub fn process(&mut self, interleaved: &[f32], out: &mut Vec<f32>) -> Result<usize, ResampleError> {
        for frame in interleaved.chunks_exact(self.channels) {
            for (ch, sample) in frame.iter().enumerate() {
                self.input[ch].push(*sample);
            }
        }

        let mut produced = 0;
        loop {
            let needed = self.resampler.input_frames_next();
            if self.input[0].len() < needed {
                break;
            }

            let (nbr_in, nbr_out) = self
                .resampler
                .process_into_buffer(&self.input, &mut self.scratch, None)
                .map_err(|_e| ResampleError::Processing(self.source_rate, self.target_rate))?;

            for ch in self.input.iter_mut() {
                ch.drain(..nbr_in.min(ch.len()));
            }
            for frame in 0..nbr_out {
                for ch in self.scratch.iter() {
                    out.push(ch[frame]);
                }
            }
            produced += nbr_out;
        }

        Ok(produced)
    }
}
