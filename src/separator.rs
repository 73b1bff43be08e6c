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
    fs::File,
    io,
    path::{Path, PathBuf},
};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info, span, warn, Level};

use crate::audio::{StemBuffer, StemPair};

/// Extensions searched for pre-separated stem files.
const STEM_EXTENSIONS: [&str; 4] = ["wav", "flac", "mp3", "ogg"];

/// Names an accompaniment stem may go by.
const ACCOMPANIMENT_NAMES: [&str; 2] = ["accompaniment", "no_vocals"];

#[derive(Debug, thiserror::Error)]
pub enum SeparationError {
    #[error("no stems found for {0}")]
    NotFound(PathBuf),

    #[error("unable to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("stems don't match: {0}")]
    Mismatch(String),
}

/// The output of a separation: two stems at a shared sample rate.
#[derive(Clone, Debug)]
pub struct SeparatedStems {
    pub vocals: StemBuffer,
    pub accompaniment: StemBuffer,
    pub sample_rate: u32,
}

impl SeparatedStems {
    /// Pairs the stems up, truncating to the shorter one.
    pub fn into_pair(self) -> Result<StemPair, SeparationError> {
        StemPair::new(self.vocals, self.accompaniment)
            .map_err(|e| SeparationError::Mismatch(e.to_string()))
    }
}

/// Turns a track into its vocal and accompaniment stems. Slow and blocking; never called
/// from an audio callback.
pub trait Separator: Send + Sync {
    fn separate(&self, path: &Path, device_hint: &str) -> Result<SeparatedStems, SeparationError>;
}

/// Reads stems that were separated ahead of time and stored next to the track, either as
/// `<name>.vocals.<ext>` and `<name>.accompaniment.<ext>` or as `vocals.<ext>` and
/// `accompaniment.<ext>` inside a `<name>/` directory.
#[derive(Clone, Debug, Default)]
pub struct StemFileSeparator {}

impl StemFileSeparator {
    pub fn new() -> StemFileSeparator {
        StemFileSeparator {}
    }

    /// Finds the vocal and accompaniment files for the given track.
    pub fn stem_paths(&self, track: &Path) -> Option<(PathBuf, PathBuf)> {
        let parent = track.parent().unwrap_or_else(|| Path::new(""));
        let stem = track.file_stem()?.to_string_lossy().to_string();

        let sibling = |name: &str, ext: &str| parent.join(format!("{}.{}.{}", stem, name, ext));
        let nested = |name: &str, ext: &str| parent.join(&stem).join(format!("{}.{}", name, ext));

        for candidate in [&sibling as &dyn Fn(&str, &str) -> PathBuf, &nested] {
            let vocals = find_existing(|ext| candidate("vocals", ext));
            let accompaniment = ACCOMPANIMENT_NAMES
                .iter()
                .find_map(|&name| find_existing(|ext| candidate(name, ext)));
            if let (Some(vocals), Some(accompaniment)) = (vocals, accompaniment) {
                return Some((vocals, accompaniment));
            }
        }
        None
    }
}

fn find_existing(path_for: impl Fn(&str) -> PathBuf) -> Option<PathBuf> {
    STEM_EXTENSIONS
        .iter()
        .map(|&ext| path_for(ext))
        .find(|path| path.is_file())
}

impl Separator for StemFileSeparator {
    fn separate(&self, path: &Path, device_hint: &str) -> Result<SeparatedStems, SeparationError> {
        let span = span!(Level::INFO, "separate");
        let _enter = span.enter();

        let (vocals_path, accompaniment_path) = self
            .stem_paths(path)
            .ok_or_else(|| SeparationError::NotFound(path.to_path_buf()))?;
        debug!(
            track = path.display().to_string(),
            device = device_hint,
            vocals = vocals_path.display().to_string(),
            accompaniment = accompaniment_path.display().to_string(),
            "Loading stems."
        );

        let (vocals, accompaniment) = rayon::join(
            || decode_file(&vocals_path),
            || decode_file(&accompaniment_path),
        );
        // Mono sources are duplicated to stereo.
        let vocals = vocals?.upmix(2);
        let accompaniment = accompaniment?.upmix(2);

        if vocals.sample_rate() != accompaniment.sample_rate() {
            return Err(SeparationError::Mismatch(format!(
                "vocals are {}Hz, accompaniment is {}Hz",
                vocals.sample_rate(),
                accompaniment.sample_rate()
            )));
        }
        if vocals.channels() != accompaniment.channels() {
            return Err(SeparationError::Mismatch(format!(
                "vocals have {} channels, accompaniment has {}",
                vocals.channels(),
                accompaniment.channels()
            )));
        }

        info!(
            track = path.display().to_string(),
            sample_rate = vocals.sample_rate(),
            frames = vocals.num_frames().min(accompaniment.num_frames()),
            "Stems loaded."
        );
        Ok(SeparatedStems {
            sample_rate: vocals.sample_rate(),
            vocals,
            accompaniment,
        })
    }
}

/// Decodes an entire audio file into interleaved f32 samples.
pub fn decode_file(path: &Path) -> Result<StemBuffer, SeparationError> {
    let decode_err = |reason: String| SeparationError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err(e.to_string()))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("no audio track found".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buffer: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_err(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(path = path.display().to_string(), err = e, "Skipping bad packet");
                continue;
            }
            Err(e) => return Err(decode_err(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count() as u16);

        let needed = decoded.capacity() * spec.channels.count();
        if sample_buffer
            .as_ref()
            .map(|buffer| buffer.capacity() < needed)
            .unwrap_or(true)
        {
            sample_buffer = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        if let Some(buffer) = sample_buffer.as_mut() {
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| decode_err("unknown sample rate".to_string()))?;
    let channels = channels.ok_or_else(|| decode_err("unknown channel count".to_string()))?;
    Ok(StemBuffer::new(samples, sample_rate, channels))
}
