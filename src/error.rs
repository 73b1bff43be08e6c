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
use std::io;

use crate::{
    audio::{resample::ResampleError, AudioError},
    config::ConfigError,
    separator::SeparationError,
};

/// Failures surfaced to callers of a playback session. Superseded and concurrent play
/// requests are not errors; see `session::PlayOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(#[from] AudioError),

    #[error("separation failed: {0}")]
    SeparationFailure(#[from] SeparationError),

    #[error("resampling failed: {0}")]
    Resample(#[from] ResampleError),

    #[error("no track at index {0}")]
    InvalidIndex(usize),

    #[error("nothing is playing")]
    NoPlayer,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unable to persist settings: {0}")]
    Settings(#[from] ConfigError),
}
