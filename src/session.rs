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
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level, Span};

use crate::{
    audio::{resample::resample_pair, DeviceCatalog, DeviceKind, MixEngine, StemPair},
    config::{ConfigError, Settings},
    error::PlaybackError,
    history::PlayHistory,
    player::{clamp_volume, AudioPlayer, PlayerOptions},
    playlist::{adjust_volume, PlayMode, Playlist},
    separator::Separator,
    util::{filename_display, format_time},
};

/// A track whose stems are ready to play.
#[derive(Clone, Debug)]
pub struct LoadedTrack {
    pub index: usize,
    pub stems: Arc<StemPair>,
}

/// A cache slot for the current, next or previous track. A slot's index is authoritative:
/// background work may finish after its target changed, so consumers check it before reuse.
#[derive(Clone, Debug, Default)]
pub enum TrackSlot {
    #[default]
    Empty,
    Loaded(LoadedTrack),
}

impl TrackSlot {
    pub fn index(&self) -> Option<usize> {
        match self {
            TrackSlot::Empty => None,
            TrackSlot::Loaded(track) => Some(track.index),
        }
    }

    /// The cached stems, if this slot holds the given track.
    pub fn stems_for(&self, index: usize) -> Option<Arc<StemPair>> {
        match self {
            TrackSlot::Loaded(track) if track.index == index => Some(track.stems.clone()),
            _ => None,
        }
    }
}

/// What happened to a play request. Neither a busy nor a superseded request is an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The track is playing.
    Started,
    /// Another track was being started at the same time, so this request was dropped.
    Busy,
    /// A newer request took over while this one was separating.
    Superseded,
}

/// Notifications published by a session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    TrackStarted {
        index: usize,
        path: PathBuf,
        cached: bool,
    },
    TrackFinished {
        index: usize,
    },
    Error(String),
    /// The selected output device was unusable and playback moved to the default device.
    FellBackToDefaultDevice,
}

/// A request to start playing a track.
#[derive(Clone, Debug)]
pub struct PlayRequest {
    index: usize,
    preloaded: Option<Arc<StemPair>>,
    update_history: bool,
    resume: bool,
    keep_current_as_next: bool,
}

impl PlayRequest {
    /// Plays the track at the given index, recording the outgoing track in the history and
    /// resuming from a stored position.
    pub fn new(index: usize) -> PlayRequest {
        PlayRequest {
            index,
            preloaded: None,
            update_history: true,
            resume: true,
            keep_current_as_next: false,
        }
    }

    /// Plays already separated stems instead of separating the track.
    pub fn preloaded(mut self, stems: Option<Arc<StemPair>>) -> PlayRequest {
        self.preloaded = stems;
        self
    }

    pub fn update_history(mut self, update_history: bool) -> PlayRequest {
        self.update_history = update_history;
        self
    }

    pub fn resume(mut self, resume: bool) -> PlayRequest {
        self.resume = resume;
        self
    }

    /// Keeps the outgoing track cached as the next track, for backwards navigation.
    pub fn keep_current_as_next(mut self, keep: bool) -> PlayRequest {
        self.keep_current_as_next = keep;
        self
    }
}

/// A snapshot of what the session is doing.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub session: u64,
    pub index: Option<usize>,
    pub path: Option<PathBuf>,
    pub elapsed: f64,
    pub duration: f64,
    pub progress: f64,
    pub playing: bool,
    pub paused: bool,
    pub mode: PlayMode,
    pub queued: usize,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (index, path) = match (self.index, &self.path) {
            (Some(index), Some(path)) => (index, path),
            _ => return write!(f, "Nothing playing ({}, {} queued)", self.mode, self.queued),
        };
        let state = if self.paused {
            "paused"
        } else if self.playing {
            "playing"
        } else {
            "stopped"
        };
        write!(
            f,
            "[{}] {} {} / {} ({}, {}, {} queued)",
            index,
            filename_display(path),
            format_time(self.elapsed),
            format_time(self.duration),
            state,
            self.mode,
            self.queued
        )
    }
}

#[derive(Clone, Copy, Debug)]
enum Lookahead {
    Next,
    Prev,
}

/// The state shared by a session and all of its background work.
struct PlaybackContext {
    /// Minted for every new track. Background work compares against it to detect staleness.
    session: AtomicU64,
    /// Cleared whenever the user changes tracks by hand.
    auto_next: AtomicBool,
    /// Held while a track is being started.
    play_lock: Mutex<()>,
    current: Mutex<TrackSlot>,
    next: Mutex<TrackSlot>,
    prev: Mutex<TrackSlot>,
    player: Mutex<Option<AudioPlayer>>,
    playlist: Mutex<Playlist>,
    history: Mutex<PlayHistory>,
    now_playing: Mutex<Option<usize>>,
    settings: Mutex<Settings>,
    settings_path: Option<PathBuf>,
    catalog: DeviceCatalog,
    separator: Arc<dyn Separator>,
    events: Sender<SessionEvent>,
    latency: Duration,
    monitor_interval: Duration,
}

/// Coordinates track changes so that exactly one track is playing at a time, prefetching
/// the neighbouring tracks in the background and continuing automatically when a track ends.
#[derive(Clone)]
pub struct PlaybackSession {
    context: Arc<PlaybackContext>,
    span: Span,
}

impl PlaybackSession {
    /// Creates a session and the receiving end of its event channel. The playlist starts
    /// empty; the upcoming queue, history and play mode are restored from the settings.
    pub fn new(
        catalog: DeviceCatalog,
        separator: Arc<dyn Separator>,
        settings: Settings,
        settings_path: Option<PathBuf>,
    ) -> Result<(PlaybackSession, Receiver<SessionEvent>), ConfigError> {
        let latency = settings.audio.latency()?;
        let monitor_interval = settings.audio.monitor_interval()?;

        let mut playlist = Playlist::new(Vec::new(), settings.play_mode);
        playlist.set_upcoming(settings.queue.iter().cloned());
        let history =
            PlayHistory::from_entries(settings.history.clone(), settings.audio.history_limit());

        let (events, receiver) = crossbeam_channel::unbounded();
        let session = PlaybackSession {
            context: Arc::new(PlaybackContext {
                session: AtomicU64::new(0),
                auto_next: AtomicBool::new(true),
                play_lock: Mutex::new(()),
                current: Mutex::new(TrackSlot::Empty),
                next: Mutex::new(TrackSlot::Empty),
                prev: Mutex::new(TrackSlot::Empty),
                player: Mutex::new(None),
                playlist: Mutex::new(playlist),
                history: Mutex::new(history),
                now_playing: Mutex::new(None),
                settings: Mutex::new(settings),
                settings_path,
                catalog,
                separator,
                events,
                latency,
                monitor_interval,
            }),
            span: span!(Level::INFO, "playback session"),
        };
        Ok((session, receiver))
    }

    /// Replaces the active file list. The upcoming queue is kept; cached neighbours are dropped
    /// since their indices no longer mean anything.
    pub fn load_files(&self, files: Vec<PathBuf>) {
        let context = &self.context;
        let current_path = self.now_playing_path();

        let mut playlist = context.playlist.lock();
        let mut replacement = Playlist::new(files, playlist.mode());
        replacement.set_upcoming(playlist.upcoming().iter().cloned());
        *playlist = replacement;

        let current = current_path.and_then(|path| playlist.index_of(&path));
        drop(playlist);

        *context.now_playing.lock() = current;
        *context.next.lock() = TrackSlot::Empty;
        *context.prev.lock() = TrackSlot::Empty;
        let mut slot = context.current.lock();
        *slot = match (current, std::mem::take(&mut *slot)) {
            (Some(index), TrackSlot::Loaded(track)) => TrackSlot::Loaded(LoadedTrack {
                index,
                stems: track.stems,
            }),
            _ => TrackSlot::Empty,
        };
    }

    /// Scans a folder for tracks and makes them the active file list. Returns the number of
    /// tracks found.
    pub fn load_folder(&self, folder: &Path) -> Result<usize, PlaybackError> {
        let mode = self.context.playlist.lock().mode();
        let files = Playlist::from_folder(folder, mode)?.files().to_vec();
        let count = files.len();
        self.load_files(files);
        self.context.settings.lock().music_folder = Some(folder.to_path_buf());
        Ok(count)
    }

    /// Starts playing a track. Blocks while the track is separated, so callers that must stay
    /// responsive run this on a background thread (see `play_index`).
    pub fn play_song(&self, request: PlayRequest) -> Result<PlayOutcome, PlaybackError> {
        let span = self.span.clone();
        let _enter = span.enter();
        let context = &self.context;

        let (session, path) = {
            let Some(_guard) = context.play_lock.try_lock() else {
                debug!(index = request.index, "A track is already starting, dropping request");
                return Ok(PlayOutcome::Busy);
            };
            let path = context
                .playlist
                .lock()
                .path(request.index)
                .cloned()
                .ok_or(PlaybackError::InvalidIndex(request.index))?;

            let session = context.session.fetch_add(1, Ordering::SeqCst) + 1;
            self.leave_current(request.update_history);
            self.demote_current(request.keep_current_as_next);
            (session, path)
        };

        let cached = request.preloaded.is_some();
        let stems = match request.preloaded {
            Some(stems) => self.conform_to_device(stems),
            None => self.load_stems(&path),
        };
        if self.is_stale(session) {
            debug!(session, index = request.index, "Superseded while separating");
            return Ok(PlayOutcome::Superseded);
        }
        let stems = match stems {
            Ok(stems) => stems,
            Err(e) => {
                error!(path = path.display().to_string(), err = %e, "Unable to load track");
                self.emit(SessionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let _guard = context.play_lock.lock();
        if self.is_stale(session) {
            debug!(session, index = request.index, "Superseded before starting");
            return Ok(PlayOutcome::Superseded);
        }

        let engine = match self.start_player(&path, stems.clone(), request.resume) {
            Ok(engine) => engine,
            Err(e) => {
                error!(path = path.display().to_string(), err = %e, "Unable to start playback");
                self.emit(SessionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        *context.current.lock() = TrackSlot::Loaded(LoadedTrack {
            index: request.index,
            stems,
        });
        *context.now_playing.lock() = Some(request.index);
        context.auto_next.store(true, Ordering::SeqCst);

        info!(
            session,
            index = request.index,
            path = path.display().to_string(),
            cached,
            "Now playing."
        );
        self.emit(SessionEvent::TrackStarted {
            index: request.index,
            path,
            cached,
        });

        self.launch_background(session, request.index, engine);
        if let Err(e) = self.persist() {
            warn!(err = %e, "Unable to persist settings");
        }
        Ok(PlayOutcome::Started)
    }

    /// Builds and starts a player for the stems, installing it as the live player.
    fn start_player(
        &self,
        path: &Path,
        stems: Arc<StemPair>,
        resume: bool,
    ) -> Result<Arc<MixEngine>, PlaybackError> {
        let context = &self.context;
        let (options, unresolved) = self.player_options();
        let mic_requested = options.mic_enabled;

        let mut player = AudioPlayer::new(stems, context.catalog.clone(), options);
        {
            let settings = context.settings.lock();
            player.set_vocal_volume(settings.vocal_volume);
            player.set_accompaniment_volume(settings.accompaniment_volume);
            player.set_mic_volume(settings.mic_volume);
        }
        player.play()?;

        {
            let mut settings = context.settings.lock();
            if resume {
                if let Some(fraction) = settings
                    .position_for(path)
                    .filter(|fraction| *fraction > 0.0 && *fraction < 1.0)
                {
                    debug!(fraction, "Resuming from stored position.");
                    player.seek_to(fraction);
                }
            }
            if mic_requested && !player.mic_enabled() {
                settings.mic_enabled = false;
            }
            if (player.fell_back() || unresolved) && settings.output_device.is_some() {
                warn!(
                    device = settings.output_device.as_deref().unwrap_or_default(),
                    "Selected output device is unusable, switching to the default"
                );
                settings.output_device = None;
                self.emit(SessionEvent::FellBackToDefaultDevice);
            }
        }

        let engine = player.engine();
        if let Some(mut old) = context.player.lock().replace(player) {
            old.stop();
        }
        Ok(engine)
    }

    /// Resolves the persisted device labels into player options. Also reports whether a
    /// selected output label no longer names a device.
    fn player_options(&self) -> (PlayerOptions, bool) {
        let catalog = &self.context.catalog;
        let settings = self.context.settings.lock();
        let output_device = catalog.resolve(settings.output_device.as_deref(), DeviceKind::Output);
        let unresolved = settings.output_device.is_some() && output_device.is_none();
        (
            PlayerOptions {
                output_device,
                mic_device: catalog.resolve(settings.mic_device.as_deref(), DeviceKind::Input),
                mic_enabled: settings.mic_enabled,
                block_size: settings.audio.block_size(),
                latency: self.context.latency,
                mic_queue_depth: settings.audio.mic_queue_depth(),
            },
            unresolved,
        )
    }

    /// Separates a track and converts it to the output device's rate.
    fn load_stems(&self, path: &Path) -> Result<Arc<StemPair>, PlaybackError> {
        let device_hint = self.context.settings.lock().separation_device.clone();
        let stems = self.context.separator.separate(path, &device_hint)?;
        self.conform_to_device(Arc::new(stems.into_pair()?))
    }

    /// Resamples the stems if the output device runs at a different rate.
    fn conform_to_device(&self, stems: Arc<StemPair>) -> Result<Arc<StemPair>, PlaybackError> {
        let (options, _) = self.player_options();
        let device_rate = self
            .context
            .catalog
            .output_sample_rate(options.output_device, stems.sample_rate());
        if device_rate == stems.sample_rate() {
            return Ok(stems);
        }

        debug!(
            from = stems.sample_rate(),
            to = device_rate,
            "Resampling stems to the device rate."
        );
        Ok(Arc::new(resample_pair(&stems, device_rate)?))
    }

    /// Stops the live player, remembering how far into its track it got and, if asked,
    /// recording the track in the history.
    fn leave_current(&self, update_history: bool) {
        let context = &self.context;
        let player = context.player.lock().take();
        let path = self.now_playing_path();

        if let Some(mut player) = player {
            // A track that played through starts over next time.
            let fraction = if player.engine().is_finished() {
                0.0
            } else {
                player.get_progress()
            };
            player.stop();
            if let Some(path) = &path {
                context.settings.lock().set_position(path, fraction);
            }
        }
        if update_history {
            if let Some(path) = path {
                context.history.lock().push(path);
            }
        }
    }

    /// Moves the current track's stems into the previous slot, and into the next slot too when
    /// asked. The next slot is otherwise cleared so it's recomputed for the new track.
    fn demote_current(&self, keep_current_as_next: bool) {
        let context = &self.context;
        let old = std::mem::take(&mut *context.current.lock());
        let mut next = context.next.lock();
        *next = TrackSlot::Empty;
        if let TrackSlot::Loaded(track) = old {
            if keep_current_as_next {
                *next = TrackSlot::Loaded(track.clone());
            }
            *context.prev.lock() = TrackSlot::Loaded(track);
        }
    }

    fn launch_background(&self, session: u64, index: usize, engine: Arc<MixEngine>) {
        self.spawn("prefetch-next", move |this| {
            this.prefetch(session, Lookahead::Next)
        });
        self.spawn("prefetch-prev", move |this| {
            this.prefetch(session, Lookahead::Prev)
        });
        self.spawn("track-monitor", move |this| {
            this.monitor(session, index, engine)
        });
    }

    fn spawn<F>(&self, name: &str, f: F)
    where
        F: FnOnce(PlaybackSession) + Send + 'static,
    {
        let this = self.clone();
        if let Err(e) = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(this))
        {
            error!(thread = name, err = %e, "Unable to spawn thread");
        }
    }

    /// Separates the next or previous track ahead of time. Failures only clear the slot.
    fn prefetch(&self, session: u64, direction: Lookahead) {
        let span = span!(parent: &self.span, Level::INFO, "prefetch", ?direction);
        let _enter = span.enter();
        let context = &self.context;
        if self.is_stale(session) {
            return;
        }

        let (slot, other) = match direction {
            Lookahead::Next => (&context.next, &context.prev),
            Lookahead::Prev => (&context.prev, &context.next),
        };
        let current = *context.now_playing.lock();
        let cached = slot.lock().index();
        let (target, path) = {
            let mut playlist = context.playlist.lock();
            let target = match direction {
                Lookahead::Next => playlist.next_index(current, true, cached),
                Lookahead::Prev => playlist.prev_index(current, cached),
            };
            match target.and_then(|target| Some((target, playlist.path(target)?.clone()))) {
                Some(found) => found,
                None => return,
            }
        };
        if cached == Some(target) {
            return;
        }

        let reusable = other
            .lock()
            .stems_for(target)
            .or_else(|| context.current.lock().stems_for(target));
        let result = match reusable {
            Some(stems) => Ok(stems),
            None => self.load_stems(&path),
        };

        let mut slot = slot.lock();
        if self.is_stale(session) {
            debug!(session, index = target, "Discarding stale prefetch");
            return;
        }
        match result {
            Ok(stems) => {
                debug!(index = target, "Prefetched.");
                *slot = TrackSlot::Loaded(LoadedTrack {
                    index: target,
                    stems,
                });
            }
            Err(e) => {
                warn!(
                    index = target,
                    path = path.display().to_string(),
                    err = %e,
                    "Prefetch failed"
                );
                *slot = TrackSlot::Empty;
            }
        }
    }

    /// Waits for the track to end and moves on to the next one, using the prefetched stems when
    /// they're for the right track.
    fn monitor(&self, session: u64, index: usize, engine: Arc<MixEngine>) {
        let context = &self.context;
        while !self.is_stale(session) {
            if engine.wait_for_stop(context.monitor_interval) {
                break;
            }
        }
        if self.is_stale(session) || !engine.is_finished() {
            return;
        }

        let span = span!(parent: &self.span, Level::INFO, "monitor", session, index);
        let _enter = span.enter();
        info!("Track finished.");
        self.emit(SessionEvent::TrackFinished { index });
        if !context.auto_next.load(Ordering::SeqCst) {
            return;
        }

        let cached_next = context.next.lock().index();
        let next = context
            .playlist
            .lock()
            .next_index(Some(index), false, cached_next);
        let Some(next) = next else {
            info!("Reached the end of the playlist.");
            return;
        };

        let preloaded = context.next.lock().stems_for(next);
        let request = PlayRequest::new(next).preloaded(preloaded).resume(false);
        match self.play_song(request) {
            Ok(outcome) => debug!(?outcome, index = next, "Continued to the next track."),
            Err(e) => warn!(index = next, err = %e, "Unable to continue to the next track"),
        }
    }

    /// Plays the track at the given index in the background.
    pub fn play_index(&self, index: usize) -> Result<(), PlaybackError> {
        if self.context.playlist.lock().path(index).is_none() {
            return Err(PlaybackError::InvalidIndex(index));
        }
        self.context.auto_next.store(false, Ordering::SeqCst);
        self.halt_player();
        self.spawn_episode(PlayRequest::new(index));
        Ok(())
    }

    /// Skips to the next track, taking it from the upcoming queue first. Returns the index that
    /// will play, if any.
    pub fn next_manual(&self) -> Option<usize> {
        let context = &self.context;
        context.auto_next.store(false, Ordering::SeqCst);

        let current = *context.now_playing.lock();
        let cached = context.next.lock().index();
        let next = context.playlist.lock().next_index(current, false, cached)?;

        self.halt_player();
        let preloaded = context.next.lock().stems_for(next);
        self.spawn_episode(PlayRequest::new(next).preloaded(preloaded).resume(false));
        Some(next)
    }

    /// Goes back to the most recently played track, or to the track before the current one
    /// when the history has nothing usable. Returns the index that will play, if any.
    pub fn previous(&self) -> Option<usize> {
        let context = &self.context;
        if context.playlist.lock().is_empty() {
            return None;
        }
        context.auto_next.store(false, Ordering::SeqCst);

        let from_history = context
            .history
            .lock()
            .pop()
            .and_then(|entry| context.playlist.lock().index_of(&entry.path));
        let previous = match from_history {
            Some(index) => index,
            None => {
                let current = *context.now_playing.lock();
                let cached = context.prev.lock().index();
                context.playlist.lock().prev_index(current, cached)?
            }
        };

        self.halt_player();
        let preloaded = context.prev.lock().stems_for(previous);
        self.spawn_episode(
            PlayRequest::new(previous)
                .preloaded(preloaded)
                .update_history(false)
                .resume(false)
                .keep_current_as_next(true),
        );
        Some(previous)
    }

    fn spawn_episode(&self, request: PlayRequest) {
        self.spawn("play", move |this| {
            let index = request.index;
            match this.play_song(request) {
                Ok(outcome) => debug!(?outcome, index, "Play request finished."),
                Err(e) => debug!(index, err = %e, "Play request failed."),
            }
        });
    }

    /// Silences the live player without discarding it, so its position can still be recorded.
    fn halt_player(&self) {
        if let Some(player) = self.context.player.lock().as_mut() {
            player.stop();
        }
    }

    /// Toggles pause. Returns true if now paused, None if nothing is playing.
    pub fn toggle_pause(&self) -> Option<bool> {
        let mut player = self.context.player.lock();
        let player = player.as_mut()?;
        if player.is_paused() {
            player.resume();
        } else {
            player.pause();
        }
        Some(player.is_paused())
    }

    pub fn pause(&self) {
        if let Some(player) = self.context.player.lock().as_mut() {
            player.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(player) = self.context.player.lock().as_mut() {
            player.resume();
        }
    }

    /// Stops playback without moving on to another track.
    pub fn stop(&self) {
        self.context.auto_next.store(false, Ordering::SeqCst);
        self.halt_player();
    }

    /// Seeks to a fraction of the current track, clamped into [0, 1].
    pub fn seek(&self, fraction: f64) -> Result<(), PlaybackError> {
        let player = self.context.player.lock();
        let player = player.as_ref().ok_or(PlaybackError::NoPlayer)?;
        player.seek_to(fraction);
        Ok(())
    }

    /// Moves the playback position by the given number of seconds, staying inside the track.
    pub fn seek_relative(&self, seconds: f64) -> Result<(), PlaybackError> {
        let player = self.context.player.lock();
        let player = player.as_ref().ok_or(PlaybackError::NoPlayer)?;
        let duration = player.duration_secs();
        if duration <= 0.0 {
            return Ok(());
        }
        let target = (player.get_current_time() + seconds).clamp(0.0, duration);
        player.seek_to(target / duration);
        Ok(())
    }

    /// Adjusts the vocal and accompaniment volumes together. Returns the new volumes.
    pub fn adjust_volume(&self, delta: f32) -> (f32, f32) {
        let (vocal, accompaniment) = {
            let mut settings = self.context.settings.lock();
            settings.vocal_volume = adjust_volume(settings.vocal_volume, delta);
            settings.accompaniment_volume = adjust_volume(settings.accompaniment_volume, delta);
            (settings.vocal_volume, settings.accompaniment_volume)
        };
        if let Some(player) = self.context.player.lock().as_ref() {
            player.set_vocal_volume(vocal);
            player.set_accompaniment_volume(accompaniment);
        }
        (vocal, accompaniment)
    }

    pub fn set_vocal_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        self.context.settings.lock().vocal_volume = volume;
        if let Some(player) = self.context.player.lock().as_ref() {
            player.set_vocal_volume(volume);
        }
    }

    pub fn set_accompaniment_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        self.context.settings.lock().accompaniment_volume = volume;
        if let Some(player) = self.context.player.lock().as_ref() {
            player.set_accompaniment_volume(volume);
        }
    }

    pub fn set_mic_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        self.context.settings.lock().mic_volume = volume;
        if let Some(player) = self.context.player.lock().as_ref() {
            player.set_mic_volume(volume);
        }
    }

    /// Turns the microphone on or off. If the microphone can't be opened it stays off.
    pub fn set_mic_enabled(&self, enabled: bool) -> Result<(), PlaybackError> {
        let mic_device = {
            let mut settings = self.context.settings.lock();
            settings.mic_enabled = enabled;
            self.context
                .catalog
                .resolve(settings.mic_device.as_deref(), DeviceKind::Input)
        };

        let result = match self.context.player.lock().as_mut() {
            Some(player) => player.set_mic_enabled(enabled, mic_device),
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!(err = %e, "Unable to enable the microphone");
            self.context.settings.lock().mic_enabled = false;
            return Err(e.into());
        }
        Ok(())
    }

    /// Selects the microphone by label (None for the default input), reopening it if it's on.
    pub fn change_mic_device(&self, label: Option<&str>) -> Result<(), PlaybackError> {
        let index = self.context.catalog.resolve(label, DeviceKind::Input);
        let enabled = {
            let mut settings = self.context.settings.lock();
            settings.mic_device = label.map(str::to_string);
            settings.mic_enabled
        };
        if !enabled {
            return Ok(());
        }

        let result = match self.context.player.lock().as_mut() {
            Some(player) => player.start_mic(index),
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!(err = %e, "Unable to switch microphones");
            self.context.settings.lock().mic_enabled = false;
            return Err(e.into());
        }
        Ok(())
    }

    /// Selects the output device by label (None for the default), moving live playback to it.
    /// On failure the selection falls back to the default.
    pub fn change_output_device(&self, label: Option<&str>) -> Result<(), PlaybackError> {
        let index = self.context.catalog.resolve(label, DeviceKind::Output);
        self.context.settings.lock().output_device = label.map(str::to_string);

        let result = match self.context.player.lock().as_mut() {
            Some(player) => player.change_output_device(index),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.context.settings.lock().output_device = None;
            return Err(e.into());
        }
        Ok(())
    }

    pub fn set_play_mode(&self, mode: PlayMode) {
        self.context.playlist.lock().set_mode(mode);
        self.context.settings.lock().play_mode = mode;
    }

    /// Adds the track at the given index to the upcoming queue.
    pub fn enqueue(&self, index: usize) -> Result<PathBuf, PlaybackError> {
        self.context
            .playlist
            .lock()
            .enqueue(index)
            .cloned()
            .ok_or(PlaybackError::InvalidIndex(index))
    }

    pub fn remove_from_queue(&self, position: usize) -> Option<PathBuf> {
        self.context.playlist.lock().remove_from_queue(position)
    }

    pub fn clear_queue(&self) {
        self.context.playlist.lock().clear_queue();
    }

    /// The upcoming queue, front first.
    pub fn queue(&self) -> Vec<PathBuf> {
        self.context
            .playlist
            .lock()
            .upcoming()
            .iter()
            .cloned()
            .collect()
    }

    /// The active file list.
    pub fn files(&self) -> Vec<PathBuf> {
        self.context.playlist.lock().files().to_vec()
    }

    /// A copy of the current settings.
    pub fn settings(&self) -> Settings {
        self.context.settings.lock().clone()
    }

    pub fn status(&self) -> SessionStatus {
        let context = &self.context;
        let index = *context.now_playing.lock();
        let (path, mode, queued) = {
            let playlist = context.playlist.lock();
            (
                index.and_then(|index| playlist.path(index).cloned()),
                playlist.mode(),
                playlist.upcoming().len(),
            )
        };

        let player = context.player.lock();
        let (elapsed, duration, progress, playing, paused) = match player.as_ref() {
            Some(player) => (
                player.get_current_time(),
                player.duration_secs(),
                player.get_progress(),
                player.is_playing(),
                player.is_paused(),
            ),
            None => (0.0, 0.0, 0.0, false, false),
        };

        SessionStatus {
            session: context.session.load(Ordering::SeqCst),
            index,
            path,
            elapsed,
            duration,
            progress,
            playing,
            paused,
            mode,
            queued,
        }
    }

    /// Writes the queue, history, play mode and settings to disk, if the session has a
    /// settings file.
    pub fn persist(&self) -> Result<(), ConfigError> {
        let context = &self.context;
        let (queue, mode) = {
            let playlist = context.playlist.lock();
            (playlist.upcoming().iter().cloned().collect(), playlist.mode())
        };
        let history = context.history.lock().entries();

        let mut settings = context.settings.lock();
        settings.queue = queue;
        settings.play_mode = mode;
        settings.history = history;
        match &context.settings_path {
            Some(path) => settings.save(path),
            None => Ok(()),
        }
    }

    /// Records the current position, stops playback and persists the settings. Outstanding
    /// background work is abandoned.
    pub fn close(&self) -> Result<(), PlaybackError> {
        let context = &self.context;
        context.auto_next.store(false, Ordering::SeqCst);
        {
            let _guard = context.play_lock.lock();
            context.session.fetch_add(1, Ordering::SeqCst);
            self.leave_current(false);
        }
        self.persist()?;
        info!("Session closed.");
        Ok(())
    }

    fn now_playing_path(&self) -> Option<PathBuf> {
        let index = (*self.context.now_playing.lock())?;
        self.context.playlist.lock().path(index).cloned()
    }

    fn is_stale(&self, session: u64) -> bool {
        self.context.session.load(Ordering::SeqCst) != session
    }

    fn emit(&self, event: SessionEvent) {
        if self.context.events.send(event).is_err() {
            debug!("No one is listening for session events.");
        }
    }
}
