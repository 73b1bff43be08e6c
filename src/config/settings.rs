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
    fs,
    path::{Path, PathBuf},
};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Audio, ConfigError};
use crate::{history::HistoryEntry, player::clamp_volume, playlist::PlayMode};

/// The last playback fraction of a track, for resuming where it was left.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TrackPosition {
    pub path: PathBuf,
    pub fraction: f64,
}

/// Everything persisted between runs. Missing fields take their defaults.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Hint passed to the separator, e.g. "cpu" or "cuda".
    pub separation_device: String,
    pub play_mode: PlayMode,
    pub music_folder: Option<PathBuf>,
    /// Output device label. None is the system default.
    pub output_device: Option<String>,
    /// Microphone device label. None is the system default input.
    pub mic_device: Option<String>,
    pub mic_enabled: bool,
    pub mic_volume: f32,
    pub vocal_volume: f32,
    #[serde(alias = "accomp_volume")]
    pub accompaniment_volume: f32,
    /// The upcoming queue.
    pub queue: Vec<PathBuf>,
    pub history: Vec<HistoryEntry>,
    pub positions: Vec<TrackPosition>,
    pub audio: Audio,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            separation_device: "cpu".to_string(),
            play_mode: PlayMode::Sequential,
            music_folder: None,
            output_device: None,
            mic_device: None,
            mic_enabled: false,
            mic_volume: 1.0,
            vocal_volume: 1.0,
            accompaniment_volume: 1.0,
            queue: Vec::new(),
            history: Vec::new(),
            positions: Vec::new(),
            audio: Audio::default(),
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file. A missing file yields the defaults. Volumes are
    /// clamped into [0, 1].
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        let mut settings: Settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json).required(false))
            .build()?
            .try_deserialize()?;
        settings.clamp_volumes();
        debug!(path = path.display().to_string(), "Loaded settings.");
        Ok(settings)
    }

    /// Loads settings, falling back to the defaults if the file can't be read.
    pub fn load_or_default(path: &Path) -> Settings {
        Settings::load(path).unwrap_or_else(|e| {
            warn!(
                path = path.display().to_string(),
                err = %e,
                "Unable to load settings, using defaults"
            );
            Settings::default()
        })
    }

    /// Writes the settings as pretty-printed JSON, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = path.display().to_string(), "Saved settings.");
        Ok(())
    }

    fn clamp_volumes(&mut self) {
        self.mic_volume = clamp_volume(self.mic_volume);
        self.vocal_volume = clamp_volume(self.vocal_volume);
        self.accompaniment_volume = clamp_volume(self.accompaniment_volume);
    }

    /// The stored playback fraction for a track.
    pub fn position_for(&self, path: &Path) -> Option<f64> {
        self.positions
            .iter()
            .find(|position| position.path == path)
            .map(|position| position.fraction)
    }

    /// Records the playback fraction for a track, replacing any earlier one.
    pub fn set_position(&mut self, path: &Path, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        match self.positions.iter_mut().find(|position| position.path == path) {
            Some(position) => position.fraction = fraction,
            None => self.positions.push(TrackPosition {
                path: path.to_path_buf(),
                fraction,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_missing_file_is_default() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let settings = Settings::load(&dir.path().join("settings.json"))?;
        assert_eq!(settings, Settings::default());
        Ok(())
    }

    #[test]
    fn test_partial_file_merges_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{
                "play_mode": "shuffle",
                "accomp_volume": 0.4,
                "vocal_volume": 3.0,
                "output_device": "2: Speakers (ALSA)",
                "audio": { "block_size": 256 }
            }"#,
        )?;

        let settings = Settings::load(&path)?;
        assert_eq!(settings.play_mode, PlayMode::Shuffle);
        assert!((settings.accompaniment_volume - 0.4).abs() < 1e-6);
        assert_eq!(settings.vocal_volume, 1.0);
        assert_eq!(settings.mic_volume, 1.0);
        assert_eq!(settings.output_device.as_deref(), Some("2: Speakers (ALSA)"));
        assert_eq!(settings.audio.block_size(), 256);
        assert_eq!(settings.separation_device, "cpu");
        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings {
            play_mode: PlayMode::Loop,
            mic_enabled: true,
            mic_device: Some("1: Mic (ALSA)".to_string()),
            queue: vec![PathBuf::from("/music/a.mp3")],
            history: vec![HistoryEntry {
                path: PathBuf::from("/music/b.mp3"),
                time: 1700000000.5,
            }],
            ..Default::default()
        };
        settings.set_position(Path::new("/music/c.v1.mp3"), 0.25);
        settings.set_position(Path::new("/music/c.v1.mp3"), 0.5);
        settings.save(&path)?;

        let loaded = Settings::load(&path)?;
        assert_eq!(loaded, settings);
        assert_eq!(loaded.position_for(Path::new("/music/c.v1.mp3")), Some(0.5));
        assert_eq!(loaded.position_for(Path::new("/music/d.mp3")), None);
        Ok(())
    }

    #[test]
    fn test_corrupt_file_falls_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json")?;
        assert!(Settings::load(&path).is_err());
        assert_eq!(Settings::load_or_default(&path), Settings::default());
        Ok(())
    }
}
