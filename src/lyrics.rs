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
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum LyricsError {
    #[error("lyrics file not found: {0}")]
    NotFound(PathBuf),

    #[error("unable to read lyrics: {0}")]
    Io(#[from] io::Error),
}

/// A timed lyric line.
#[derive(Clone, Debug, PartialEq)]
pub struct LyricLine {
    /// Seconds from the start of the track.
    pub time: f64,
    pub text: String,
}

/// The lyrics file that goes with a track: same path, `.lrc` extension.
pub fn lyrics_path_for(track: &Path) -> PathBuf {
    track.with_extension("lrc")
}

/// Reads and parses an LRC file.
pub fn parse_lrc(path: &Path) -> Result<Vec<LyricLine>, LyricsError> {
    let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => LyricsError::NotFound(path.to_path_buf()),
        _ => LyricsError::Io(e),
    })?;
    Ok(parse_lrc_str(&contents))
}

/// Parses LRC text. Every `[mm:ss.xx]` tag on a line produces an entry carrying the line's
/// text with all tags removed. Lines without a time tag are ignored. The result is sorted by
/// time, then text.
pub fn parse_lrc_str(contents: &str) -> Vec<LyricLine> {
    let mut lyrics = Vec::new();
    for line in contents.lines() {
        let (times, text) = split_time_tags(line);
        let text = text.trim();
        for time in times {
            lyrics.push(LyricLine {
                time,
                text: text.to_string(),
            });
        }
    }

    lyrics.sort_by(|a, b| a.time.total_cmp(&b.time).then_with(|| a.text.cmp(&b.text)));
    lyrics
}

/// Pulls every time tag out of a line, returning the times and the remaining text.
fn split_time_tags(line: &str) -> (Vec<f64>, String) {
    let mut times = Vec::new();
    let mut text = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(']').and_then(|close| Some((parse_time(&after[..close])?, close))) {
            Some((time, close)) => {
                times.push(time);
                rest = &after[close + 1..];
            }
            None => {
                text.push('[');
                rest = after;
            }
        }
    }
    text.push_str(rest);

    (times, text)
}

/// Parses `mm:ss.xx` (minutes and seconds digits, seconds must have a fractional part).
fn parse_time(tag: &str) -> Option<f64> {
    let (minutes, seconds) = tag.split_once(':')?;
    let (whole, fraction) = seconds.split_once('.')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(minutes) || !all_digits(whole) || !all_digits(fraction) {
        return None;
    }

    let minutes: f64 = minutes.parse().ok()?;
    let seconds: f64 = seconds.parse().ok()?;
    Some(minutes * 60.0 + seconds)
}

/// The index of the line being sung at the given time: the last line whose timestamp has
/// been reached, or the first line before any has.
pub fn active_line(lyrics: &[LyricLine], seconds: f64) -> Option<usize> {
    if lyrics.is_empty() {
        return None;
    }

    let mut index = 0;
    while index + 1 < lyrics.len() && seconds >= lyrics[index + 1].time {
        index += 1;
    }
    Some(index)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        let lyrics = parse_lrc_str(
            "[ar:Someone]\n\
             [00:12.50]First line\n\
             [00:05.00][01:02.25] Chorus \n\
             no tags here\n\
             [00:20.00]\n",
        );

        assert_eq!(
            lyrics,
            vec![
                LyricLine {
                    time: 5.0,
                    text: "Chorus".to_string()
                },
                LyricLine {
                    time: 12.5,
                    text: "First line".to_string()
                },
                LyricLine {
                    time: 20.0,
                    text: "".to_string()
                },
                LyricLine {
                    time: 62.25,
                    text: "Chorus".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_malformed_tags_stay_in_text() {
        let lyrics = parse_lrc_str("[00:01.00]a [b] c [1:2]\n[00:03]ignored");
        assert_eq!(lyrics.len(), 1);
        assert_eq!(lyrics[0].text, "a [b] c [1:2]");
    }

    #[test]
    fn test_active_line() {
        let lyrics = parse_lrc_str("[00:01.00]one\n[00:02.00]two\n[00:04.00]three");
        assert_eq!(active_line(&lyrics, 0.0), Some(0));
        assert_eq!(active_line(&lyrics, 1.5), Some(0));
        assert_eq!(active_line(&lyrics, 2.0), Some(1));
        assert_eq!(active_line(&lyrics, 100.0), Some(2));
        assert_eq!(active_line(&[], 1.0), None);
    }

    #[test]
    fn test_parse_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let track = dir.path().join("song.mp3");
        let lrc = lyrics_path_for(&track);
        assert_eq!(lrc, dir.path().join("song.lrc"));

        assert!(matches!(parse_lrc(&lrc), Err(LyricsError::NotFound(_))));

        fs::write(&lrc, "[00:00.50]hello")?;
        let lyrics = parse_lrc(&lrc)?;
        assert_eq!(lyrics.len(), 1);
        assert_eq!(lyrics[0].time, 0.5);
        Ok(())
    }
}
