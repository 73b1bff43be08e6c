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
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, warn, Level};

use crate::{
    lyrics::{active_line, lyrics_path_for, parse_lrc},
    playlist::PlayMode,
    session::PlaybackSession,
    util::filename_display,
};

pub mod keyboard;

/// Controller events that drive a playback session.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Plays the track at the given index.
    Play(usize),

    /// Skips to the next track, taking the upcoming queue into account.
    Next,

    /// Goes back to the previously played track.
    Prev,

    /// Pauses or resumes playback.
    TogglePause,

    /// Stops playback without moving on.
    Stop,

    /// Moves the playback position by the given number of seconds.
    Seek(f64),

    /// Adjusts vocal and accompaniment volume together.
    Volume(f32),

    VocalVolume(f32),

    AccompanimentVolume(f32),

    /// Turns the microphone on or off.
    Mic(bool),

    Mode(PlayMode),

    /// Adds the track at the given index to the upcoming queue.
    Queue(usize),

    /// Removes the entry at the given position from the upcoming queue.
    Unqueue(usize),

    ClearQueue,

    /// Prints what's playing.
    Status,

    /// Prints the active lyric line.
    Lyrics,

    /// Prints the file list and the upcoming queue.
    List,

    /// Ends the session.
    Quit,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Controls a playback session.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(session: PlaybackSession, driver: Arc<dyn Driver>) -> Controller {
        Controller {
            handle: tokio::spawn(async move { Controller::trigger_events(session, driver).await }),
        }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Applies events from the driver to the session until the driver goes away or asks to
    /// quit.
    async fn trigger_events(session: PlaybackSession, driver: Arc<dyn Driver>) {
        let span = span!(Level::INFO, "controller");
        let _enter = span.enter();

        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        info!(tracks = session.files().len(), "Controller started.");

        while let Some(event) = events_rx.recv().await {
            info!(event = format!("{:?}", event), "Received event.");
            if event == Event::Quit {
                break;
            }
            if let Some(output) = Controller::handle(&session, event) {
                println!("{}", output);
            }
        }

        info!("Controller closing.");
        if let Err(e) = session.close() {
            error!(err = %e, "Error closing session");
        }
        join_handle.abort();
    }

    /// Applies a single event. Returns text to show the user, if any.
    pub fn handle(session: &PlaybackSession, event: Event) -> Option<String> {
        let result = match event {
            Event::Play(index) => session.play_index(index).map(|_| None),
            Event::Next => Ok(match session.next_manual() {
                Some(_) => None,
                None => Some("No next track.".to_string()),
            }),
            Event::Prev => Ok(match session.previous() {
                Some(_) => None,
                None => Some("No previous track.".to_string()),
            }),
            Event::TogglePause => Ok(session.toggle_pause().map(|paused| {
                if paused {
                    "Paused.".to_string()
                } else {
                    "Resumed.".to_string()
                }
            })),
            Event::Stop => {
                session.stop();
                Ok(None)
            }
            Event::Seek(seconds) => session.seek_relative(seconds).map(|_| None),
            Event::Volume(delta) => {
                let (vocal, accompaniment) = session.adjust_volume(delta);
                Ok(Some(format!(
                    "Vocals {:.2}, accompaniment {:.2}",
                    vocal, accompaniment
                )))
            }
            Event::VocalVolume(volume) => {
                session.set_vocal_volume(volume);
                Ok(None)
            }
            Event::AccompanimentVolume(volume) => {
                session.set_accompaniment_volume(volume);
                Ok(None)
            }
            Event::Mic(enabled) => session.set_mic_enabled(enabled).map(|_| None),
            Event::Mode(mode) => {
                session.set_play_mode(mode);
                Ok(Some(format!("Play mode: {}", mode)))
            }
            Event::Queue(index) => session
                .enqueue(index)
                .map(|path| Some(format!("Queued {}", filename_display(&path)))),
            Event::Unqueue(position) => Ok(session
                .remove_from_queue(position)
                .map(|path| format!("Removed {}", filename_display(&path)))),
            Event::ClearQueue => {
                session.clear_queue();
                Ok(None)
            }
            Event::Status => Ok(Some(session.status().to_string())),
            Event::Lyrics => Ok(Some(Controller::current_lyric(session))),
            Event::List => Ok(Some(Controller::listing(session))),
            Event::Quit => Ok(None),
        };

        match result {
            Ok(output) => output,
            Err(e) => {
                warn!(err = %e, "Command failed");
                Some(format!("Error: {}", e))
            }
        }
    }

    fn current_lyric(session: &PlaybackSession) -> String {
        let status = session.status();
        let Some(path) = status.path else {
            return "Nothing playing.".to_string();
        };
        match parse_lrc(&lyrics_path_for(&path)) {
            Ok(lyrics) => match active_line(&lyrics, status.elapsed) {
                Some(index) => lyrics[index].text.clone(),
                None => "No lyrics.".to_string(),
            },
            Err(e) => e.to_string(),
        }
    }

    fn listing(session: &PlaybackSession) -> String {
        let current = session.status().index;
        let mut lines: Vec<String> = session
            .files()
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let marker = if Some(index) == current { '>' } else { ' ' };
                format!("{} {:>3}. {}", marker, index, filename_display(path))
            })
            .collect();
        let queue = session.queue();
        if !queue.is_empty() {
            lines.push("Up next:".to_string());
            lines.extend(
                queue
                    .iter()
                    .enumerate()
                    .map(|(position, path)| format!("  {:>3}. {}", position, filename_display(path))),
            );
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, io, path::PathBuf, sync::Arc, time::Duration};

    use tokio::{sync::mpsc::Sender, task::JoinHandle};

    use super::{Controller, Driver, Event};
    use crate::{
        audio::{mock, DeviceCatalog},
        config::Settings,
        playlist::PlayMode,
        session::{PlayRequest, PlaybackSession},
        testutil::MockSeparator,
    };

    fn session(files: Vec<PathBuf>) -> Result<PlaybackSession, Box<dyn Error>> {
        let catalog = DeviceCatalog::new(Arc::new(mock::Backend::manual()));
        let separator = Arc::new(MockSeparator::new(48000, 48000, Duration::ZERO));
        let (session, _events) =
            PlaybackSession::new(catalog, separator, Settings::default(), None)?;
        session.load_files(files);
        Ok(session)
    }

    /// A driver that replays a fixed script of events.
    struct ScriptDriver {
        script: Vec<Event>,
    }

    impl Driver for ScriptDriver {
        fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
            let script = self.script.clone();
            tokio::task::spawn_blocking(move || {
                for event in script {
                    events_tx
                        .blocking_send(event)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                }
                Ok(())
            })
        }
    }

    #[test]
    fn test_handle_queue_and_mode() -> Result<(), Box<dyn Error>> {
        let session = session(vec![PathBuf::from("/music/a.mp3"), PathBuf::from("/music/b.mp3")])?;

        assert_eq!(
            Controller::handle(&session, Event::Queue(1)),
            Some("Queued b.mp3".to_string())
        );
        assert_eq!(
            Controller::handle(&session, Event::Mode(PlayMode::Shuffle)),
            Some("Play mode: shuffle".to_string())
        );
        assert_eq!(
            Controller::handle(&session, Event::List),
            Some("    0. a.mp3\n    1. b.mp3\nUp next:\n    0. b.mp3".to_string())
        );
        assert_eq!(
            Controller::handle(&session, Event::Unqueue(0)),
            Some("Removed b.mp3".to_string())
        );
        assert_eq!(Controller::handle(&session, Event::Unqueue(0)), None);
        assert!(Controller::handle(&session, Event::Queue(7))
            .is_some_and(|output| output.starts_with("Error:")));
        assert_eq!(
            Controller::handle(&session, Event::Status),
            Some("Nothing playing (shuffle, 0 queued)".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_handle_lyrics() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let track = dir.path().join("song.mp3");
        fs::write(dir.path().join("song.lrc"), "[00:00.00]first line\n[00:30.00]second line\n")?;
        let session = session(vec![track])?;

        assert_eq!(
            Controller::handle(&session, Event::Lyrics),
            Some("Nothing playing.".to_string())
        );
        session.play_song(PlayRequest::new(0))?;
        assert_eq!(
            Controller::handle(&session, Event::Lyrics),
            Some("first line".to_string())
        );
        assert_eq!(
            Controller::handle(&session, Event::TogglePause),
            Some("Paused.".to_string())
        );
        session.close()?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller_runs_script() -> Result<(), Box<dyn Error>> {
        let session = session(vec![PathBuf::from("/music/a.mp3"), PathBuf::from("/music/b.mp3")])?;
        let driver = Arc::new(ScriptDriver {
            script: vec![Event::Queue(1), Event::Mode(PlayMode::Loop), Event::Quit],
        });

        let mut controller = Controller::new(session.clone(), driver);
        controller.join().await?;

        assert_eq!(session.queue(), vec![PathBuf::from("/music/b.mp3")]);
        assert_eq!(session.status().mode, PlayMode::Loop);
        assert_eq!(session.settings().play_mode, PlayMode::Loop);
        Ok(())
    }
}
