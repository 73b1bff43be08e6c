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
use std::time::Duration;

use duration_string::DurationString;
use serde::{Deserialize, Serialize};

use super::ConfigError;

const DEFAULT_BLOCK_SIZE: u32 = 1024;
const DEFAULT_LATENCY: Duration = Duration::from_millis(30);
const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_MIC_QUEUE_DEPTH: usize = 5;
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Audio tuning. Every field is optional and falls back to a default.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Audio {
    /// Frames per callback block (default: 1024).
    #[serde(skip_serializing_if = "Option::is_none")]
    block_size: Option<u32>,

    /// Requested output latency, e.g. "30ms".
    #[serde(skip_serializing_if = "Option::is_none")]
    latency: Option<String>,

    /// How often the end-of-track monitor wakes up, e.g. "100ms".
    #[serde(skip_serializing_if = "Option::is_none")]
    monitor_interval: Option<String>,

    /// Microphone blocks that may queue up before the oldest is dropped (default: 5).
    #[serde(skip_serializing_if = "Option::is_none")]
    mic_queue_depth: Option<usize>,

    /// Entries kept in the play history (default: 100).
    #[serde(skip_serializing_if = "Option::is_none")]
    history_limit: Option<usize>,
}

fn parse_duration(value: &Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())
            .map_err(|e| ConfigError::InvalidDuration(format!("{}: {}", value, e)))?
            .into()),
        None => Ok(default),
    }
}

impl Audio {
    pub fn block_size(&self) -> u32 {
        self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE).max(1)
    }

    pub fn latency(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.latency, DEFAULT_LATENCY)
    }

    pub fn monitor_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.monitor_interval, DEFAULT_MONITOR_INTERVAL)
    }

    pub fn mic_queue_depth(&self) -> usize {
        self.mic_queue_depth.unwrap_or(DEFAULT_MIC_QUEUE_DEPTH).max(1)
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1)
    }
}
