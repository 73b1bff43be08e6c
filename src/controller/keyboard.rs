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

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;
use crate::playlist::PlayMode;

const PLAY: &str = "play";
const NEXT: &str = "next";
const PREV: &str = "prev";
const PAUSE: &str = "pause";
const STOP: &str = "stop";
const SEEK: &str = "seek";
const VOL: &str = "vol";
const VOCAL: &str = "vocal";
const ACCOMP: &str = "accomp";
const MIC: &str = "mic";
const MODE: &str = "mode";
const QUEUE: &str = "queue";
const UNQUEUE: &str = "unqueue";
const CLEAR: &str = "clear";
const STATUS: &str = "status";
const LYRICS: &str = "lyrics";
const LIST: &str = "list";
const QUIT: &str = "quit";

/// A controller that drives a session from lines typed on the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads and dispatches one command. Returns false once input is exhausted or the user
    /// quits.
    fn monitor_io<R, W>(events_tx: &Sender<Event>, mut reader: R, mut writer: W) -> io::Result<bool>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(writer, "> ")?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            events_tx
                .blocking_send(Event::Quit)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            return Ok(false);
        }

        match parse_command(&input) {
            Ok(Some(event)) => {
                let quit = event == Event::Quit;
                events_tx
                    .blocking_send(event)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(!quit)
            }
            Ok(None) => Ok(true),
            Err(e) => {
                warn!(input = input.trim(), "Unrecognized input");
                writeln!(writer, "{}", e)?;
                Ok(true)
            }
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

/// Parses a command line into an event. Blank lines yield nothing.
pub fn parse_command(input: &str) -> Result<Option<Event>, String> {
    let mut words = input.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();

    fn required<T: std::str::FromStr>(command: &str, argument: Option<&str>) -> Result<T, String> {
        argument
            .ok_or_else(|| format!("{} needs an argument", command))?
            .parse()
            .map_err(|_| format!("invalid argument for {}", command))
    }

    let event = match command.to_lowercase().as_str() {
        PLAY => Event::Play(required(PLAY, argument)?),
        NEXT => Event::Next,
        PREV => Event::Prev,
        PAUSE => Event::TogglePause,
        STOP => Event::Stop,
        SEEK => Event::Seek(required(SEEK, argument)?),
        VOL => Event::Volume(required(VOL, argument)?),
        VOCAL => Event::VocalVolume(required(VOCAL, argument)?),
        ACCOMP => Event::AccompanimentVolume(required(ACCOMP, argument)?),
        MIC => match argument {
            Some("on") => Event::Mic(true),
            Some("off") => Event::Mic(false),
            _ => return Err(format!("usage: {} on|off", MIC)),
        },
        MODE => Event::Mode(
            argument
                .ok_or_else(|| format!("usage: {} sequential|loop|shuffle", MODE))?
                .parse::<PlayMode>()?,
        ),
        QUEUE => Event::Queue(required(QUEUE, argument)?),
        UNQUEUE => Event::Unqueue(required(UNQUEUE, argument)?),
        CLEAR => Event::ClearQueue,
        STATUS => Event::Status,
        LYRICS => Event::Lyrics,
        LIST => Event::List,
        QUIT | "exit" => Event::Quit,
        other => {
            return Err(format!(
                "unknown command {} (try {}, {}, {}, {}, {}, {}, {}, {}, {})",
                other, PLAY, NEXT, PREV, PAUSE, SEEK, VOL, MIC, STATUS, QUIT
            ))
        }
    };
    Ok(Some(event))
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            Ok(())
        })
    }
}
