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
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stemplayer::audio::{self, DeviceCatalog};
use stemplayer::config::Settings;
use stemplayer::controller::{keyboard, Controller, Event};
use stemplayer::lyrics;
use stemplayer::separator::StemFileSeparator;
use stemplayer::session::{PlaybackSession, SessionEvent};
use stemplayer::util::{filename_display, format_time};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A two-stem karaoke player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output and input devices.
    Devices {
        /// The audio backend to use ("cpal" or "mock").
        #[arg(short, long, default_value = "cpal")]
        backend: String,
    },
    /// Plays the tracks in a folder, reading commands from stdin.
    Play {
        /// The folder to play. Defaults to the folder from the last session.
        folder: Option<PathBuf>,
        /// The settings file to restore from and save to.
        #[arg(short, long, default_value = "settings.json")]
        settings: PathBuf,
        /// The index of the track to start with.
        #[arg(long)]
        start: Option<usize>,
        /// The audio backend to use ("cpal" or "mock").
        #[arg(short, long, default_value = "cpal")]
        backend: String,
    },
    /// Prints the lines of an LRC lyrics file.
    Lyrics {
        /// The path to the lyrics file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices { backend } => {
            let catalog = DeviceCatalog::new(audio::get_backend(&backend));
            let outputs = catalog.outputs()?;
            let inputs = catalog.inputs()?;

            if outputs.is_empty() && inputs.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Output devices:");
            for device in outputs {
                println!("- {}", device);
            }
            println!("Input devices:");
            for device in inputs {
                println!("- {}", device);
            }
        }
        Commands::Play {
            folder,
            settings,
            start,
            backend,
        } => {
            let settings_path = settings;
            let settings = Settings::load_or_default(&settings_path);
            let folder = folder
                .or_else(|| settings.music_folder.clone())
                .ok_or("no music folder given and none remembered")?;

            let catalog = DeviceCatalog::new(audio::get_backend(&backend));
            let (session, events) = PlaybackSession::new(
                catalog,
                Arc::new(StemFileSeparator::new()),
                settings,
                Some(settings_path),
            )?;
            if session.load_folder(&folder)? == 0 {
                println!("No tracks found in {}.", folder.display());
                return Ok(());
            }
            if let Some(output) = Controller::handle(&session, Event::List) {
                println!("{}", output);
            }

            thread::Builder::new()
                .name("session-events".to_string())
                .spawn(move || {
                    for event in events {
                        match event {
                            SessionEvent::TrackStarted {
                                index,
                                path,
                                cached,
                            } => println!(
                                "Now playing [{}] {}{}",
                                index,
                                filename_display(&path),
                                if cached { " (cached)" } else { "" }
                            ),
                            SessionEvent::TrackFinished { index } => {
                                info!(index, "Track finished.")
                            }
                            SessionEvent::Error(e) => eprintln!("Error: {}", e),
                            SessionEvent::FellBackToDefaultDevice => {
                                println!("Output device unavailable, using the default device.")
                            }
                        }
                    }
                })?;

            if let Some(index) = start {
                session.play_index(index)?;
            }
            Controller::new(session, Arc::new(keyboard::Driver::new()))
                .join()
                .await?;
        }
        Commands::Lyrics { file } => {
            let lines = lyrics::parse_lrc(&file)?;
            if lines.is_empty() {
                println!("No lyrics in {}.", file.display());
                return Ok(());
            }
            for line in lines {
                println!("[{}] {}", format_time(line.time), line.text);
            }
        }
    }

    Ok(())
}
