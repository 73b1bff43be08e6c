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
    collections::VecDeque,
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, span, Level, Span};

use crate::player::clamp_volume;

/// File extensions picked up when scanning a folder.
const SUPPORTED_EXTENSIONS: [&str; 3] = ["mp3", "flac", "wav"];

/// The ordering applied when the upcoming queue is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    #[default]
    Sequential,
    Loop,
    Shuffle,
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlayMode::Sequential => "sequential",
            PlayMode::Loop => "loop",
            PlayMode::Shuffle => "shuffle",
        })
    }
}

impl FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(PlayMode::Sequential),
            "loop" => Ok(PlayMode::Loop),
            "shuffle" | "random" => Ok(PlayMode::Shuffle),
            other => Err(format!("unknown play mode {}", other)),
        }
    }
}

/// Applies a delta to a volume and clamps the result into [0, 1].
pub fn adjust_volume(volume: f32, delta: f32) -> f32 {
    clamp_volume(volume + delta)
}

/// The active file list, the user's upcoming queue and the play mode. Computes which track
/// comes next or before.
pub struct Playlist {
    files: Vec<PathBuf>,
    upcoming: VecDeque<PathBuf>,
    mode: PlayMode,
    span: Span,
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Playlist ({} tracks, {}):", self.files.len(), self.mode)?;
        for (index, file) in self.files.iter().enumerate() {
            writeln!(f, "  {:>3}. {}", index, crate::util::filename_display(file))?;
        }
        Ok(())
    }
}

impl Playlist {
    /// Creates a playlist over the given files.
    pub fn new(files: Vec<PathBuf>, mode: PlayMode) -> Playlist {
        Playlist {
            files,
            upcoming: VecDeque::new(),
            mode,
            span: span!(Level::INFO, "playlist"),
        }
    }

    /// Scans a folder for supported audio files, sorted by path.
    pub fn from_folder(folder: &Path, mode: PlayMode) -> io::Result<Playlist> {
        let mut files = Vec::new();
        for entry in fs::read_dir(folder)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let supported = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    SUPPORTED_EXTENSIONS
                        .iter()
                        .any(|supported| ext.eq_ignore_ascii_case(supported))
                })
                .unwrap_or(false);
            if supported {
                files.push(path);
            }
        }
        files.sort();

        info!(
            folder = folder.display().to_string(),
            tracks = files.len(),
            "Loaded folder."
        );
        Ok(Playlist::new(files, mode))
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&PathBuf> {
        self.files.get(index)
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.files.iter().position(|file| file == path)
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;
    }

    /// The upcoming queue, front first.
    pub fn upcoming(&self) -> &VecDeque<PathBuf> {
        &self.upcoming
    }

    /// Replaces the upcoming queue (used when restoring settings).
    pub fn set_upcoming(&mut self, upcoming: impl IntoIterator<Item = PathBuf>) {
        self.upcoming = upcoming.into_iter().collect();
    }

    /// Appends the track at the given index to the upcoming queue.
    pub fn enqueue(&mut self, index: usize) -> Option<&PathBuf> {
        let path = self.files.get(index)?.clone();
        debug!(index, path = path.display().to_string(), "Queued track.");
        self.upcoming.push_back(path);
        self.upcoming.back()
    }

    /// Removes the queue entry at the given position.
    pub fn remove_from_queue(&mut self, position: usize) -> Option<PathBuf> {
        self.upcoming.remove(position)
    }

    pub fn clear_queue(&mut self) {
        self.upcoming.clear();
    }

    /// Resolves the track after `current`. A non-empty upcoming queue wins: its front entry is
    /// taken (or only looked at when peeking) and resolved against the file list; an entry
    /// that's no longer in the list falls through to the play mode. In shuffle mode a cached
    /// next choice is reused before picking a random track other than the current one.
    pub fn next_index(
        &mut self,
        current: Option<usize>,
        peek: bool,
        cached_next: Option<usize>,
    ) -> Option<usize> {
        let _enter = self.span.enter();
        if self.files.is_empty() {
            return None;
        }

        let queued = if peek {
            self.upcoming.front().cloned()
        } else {
            self.upcoming.pop_front()
        };
        if let Some(path) = queued {
            match self.index_of(&path) {
                Some(index) => return Some(index),
                None => debug!(
                    path = path.display().to_string(),
                    "Queued track is not in the playlist"
                ),
            }
        }

        let len = self.files.len();
        match self.mode {
            PlayMode::Sequential => match current {
                Some(current) if current + 1 < len => Some(current + 1),
                Some(_) => None,
                None => Some(0),
            },
            PlayMode::Loop => Some(current.map(|current| (current + 1) % len).unwrap_or(0)),
            PlayMode::Shuffle => {
                if let Some(cached) = cached_next.filter(|cached| *cached < len) {
                    return Some(cached);
                }
                Some(random_other(len, current))
            }
        }
    }

    /// Resolves the track before `current`. Shuffle mode has no predecessor other than a
    /// cached previous choice.
    pub fn prev_index(&self, current: Option<usize>, cached_prev: Option<usize>) -> Option<usize> {
        if self.files.is_empty() {
            return None;
        }

        let len = self.files.len();
        match self.mode {
            PlayMode::Sequential => current.filter(|current| *current > 0).map(|c| c - 1),
            PlayMode::Loop => current.map(|current| (current + len - 1) % len),
            PlayMode::Shuffle => cached_prev.filter(|cached| *cached < len),
        }
    }
}

/// Picks a uniformly random index in 0..len, excluding `current` when there's a choice.
fn random_other(len: usize, current: Option<usize>) -> usize {
    let mut rng = rand::thread_rng();
    match current {
        Some(current) if len > 1 && current < len => {
            let pick = rng.gen_range(0..len - 1);
            if pick >= current {
                pick + 1
            } else {
                pick
            }
        }
        _ => rng.gen_range(0..len),
    }
}
