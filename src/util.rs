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

use std::path::Path;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Formats a number of seconds as MM:SS. Negative and non-finite values show as 00:00.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Seconds since the Unix epoch, as recorded in the play history.
pub fn unix_time() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use crate::util::{filename_display, format_time};

    #[test]
    fn test_format_time() {
        assert_eq!("00:00", format_time(0.0));
        assert_eq!("00:05", format_time(5.9));
        assert_eq!("00:55", format_time(55.0));
        assert_eq!("01:00", format_time(60.0));
        assert_eq!("02:05", format_time(125.0));
        assert_eq!("60:06", format_time(3606.0));
        assert_eq!("00:00", format_time(-3.0));
        assert_eq!("00:00", format_time(f64::NAN));
    }

    #[test]
    fn test_filename_display() {
        assert_eq!("song.mp3", filename_display(&PathBuf::from("/music/song.mp3")));
    }
}
