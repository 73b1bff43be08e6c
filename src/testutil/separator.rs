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
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    audio::StemBuffer,
    separator::{SeparatedStems, SeparationError, Separator},
};

/// A separator that fabricates constant stems after an artificial delay. Vocals are 0.25,
/// accompaniment 0.5, both stereo.
pub struct MockSeparator {
    sample_rate: u32,
    frames: usize,
    delay: Duration,
    delays: Mutex<HashMap<PathBuf, Duration>>,
    lengths: Mutex<HashMap<PathBuf, usize>>,
    failing: Mutex<HashSet<PathBuf>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl MockSeparator {
    pub fn new(sample_rate: u32, frames: usize, delay: Duration) -> MockSeparator {
        MockSeparator {
            sample_rate,
            frames,
            delay,
            delays: Mutex::new(HashMap::new()),
            lengths: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the delay for a single path.
    pub fn delay_for(&self, path: impl Into<PathBuf>, delay: Duration) {
        self.delays.lock().insert(path.into(), delay);
    }

    /// Overrides the stem length for a single path.
    pub fn frames_for(&self, path: impl Into<PathBuf>, frames: usize) {
        self.lengths.lock().insert(path.into(), frames);
    }

    pub fn fail(&self, path: impl Into<PathBuf>) {
        self.failing.lock().insert(path.into());
    }

    /// Every path separated so far, in call order.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, path: &Path) -> usize {
        self.calls.lock().iter().filter(|p| p.as_path() == path).count()
    }
}

impl Separator for MockSeparator {
    fn separate(&self, path: &Path, _device_hint: &str) -> Result<SeparatedStems, SeparationError> {
        self.calls.lock().push(path.to_path_buf());
        let delay = self.delays.lock().get(path).copied().unwrap_or(self.delay);
        thread::sleep(delay);

        if self.failing.lock().contains(path) {
            return Err(SeparationError::Decode {
                path: path.to_path_buf(),
                reason: "mock failure".to_string(),
            });
        }

        let frames = self.lengths.lock().get(path).copied().unwrap_or(self.frames);
        Ok(SeparatedStems {
            vocals: StemBuffer::new(vec![0.25; frames * 2], self.sample_rate, 2),
            accompaniment: StemBuffer::new(vec![0.5; frames * 2], self.sample_rate, 2),
            sample_rate: self.sample_rate,
        })
    }
}
