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
use std::{collections::VecDeque, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::util::unix_time;

/// Default number of entries kept in the play history.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// A previously played track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub path: PathBuf,
    /// Seconds since the Unix epoch when the track was left.
    pub time: f64,
}

/// Bounded list of previously played tracks, oldest first.
#[derive(Clone, Debug)]
pub struct PlayHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl PlayHistory {
    pub fn new(limit: usize) -> PlayHistory {
        PlayHistory {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Restores a history from persisted entries, keeping only the newest `limit`.
    pub fn from_entries(entries: Vec<HistoryEntry>, limit: usize) -> PlayHistory {
        let mut history = PlayHistory::new(limit);
        for entry in entries {
            history.push_entry(entry);
        }
        history
    }

    /// Records that the given track was played now.
    pub fn push(&mut self, path: PathBuf) {
        self.push_entry(HistoryEntry {
            path,
            time: unix_time(),
        });
    }

    fn push_entry(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    /// Removes and returns the most recent entry.
    pub fn pop(&mut self) -> Option<HistoryEntry> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for PlayHistory {
    fn default() -> Self {
        PlayHistory::new(DEFAULT_HISTORY_LIMIT)
    }
}
