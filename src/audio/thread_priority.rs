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
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, warn};

/// Priority used for stream callback threads when STEMPLAYER_THREAD_PRIORITY is unset.
const DEFAULT_PRIORITY: u8 = 70;

/// Scheduling settings for a stream callback thread. Read from the environment when the
/// stream is built so the callback itself never touches the environment.
#[derive(Clone, Copy, Debug)]
pub struct CallbackPriority {
    priority: u8,
    realtime: bool,
    applied: bool,
}

impl CallbackPriority {
    /// Reads STEMPLAYER_THREAD_PRIORITY (0-99) and STEMPLAYER_DISABLE_RT_AUDIO.
    pub fn from_env() -> CallbackPriority {
        let priority = std::env::var("STEMPLAYER_THREAD_PRIORITY")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .filter(|n| *n < 100)
            .unwrap_or(DEFAULT_PRIORITY);

        CallbackPriority {
            priority,
            realtime: !env_flag("STEMPLAYER_DISABLE_RT_AUDIO"),
            applied: false,
        }
    }

    /// Applies the priority to the calling thread. Only the first call does anything.
    pub fn apply_once(&mut self) {
        if self.applied {
            return;
        }
        self.applied = true;

        let value = match ThreadPriorityValue::try_from(self.priority) {
            Ok(value) => value,
            Err(e) => {
                warn!(priority = self.priority, err = ?e, "Invalid callback thread priority");
                return;
            }
        };
        let priority = ThreadPriority::Crossplatform(value);
        if let Err(e) = set_current_thread_priority(priority) {
            debug!(err = ?e, "Unable to raise callback thread priority");
        }

        #[cfg(unix)]
        if self.realtime {
            use thread_priority::unix::{
                set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
                ThreadSchedulePolicy,
            };
            match set_thread_priority_and_policy(
                thread_native_id(),
                priority,
                ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
            ) {
                Ok(()) => debug!("Callback thread running with SCHED_FIFO"),
                Err(e) => debug!(err = ?e, "SCHED_FIFO unavailable for callback thread"),
            }
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_priority_from_env() {
        std::env::set_var("STEMPLAYER_THREAD_PRIORITY", "42");
        std::env::set_var("STEMPLAYER_DISABLE_RT_AUDIO", "yes");
        let priority = CallbackPriority::from_env();
        assert_eq!(priority.priority, 42);
        assert!(!priority.realtime);
        assert!(!priority.applied);

        // Out of range values fall back to the default.
        std::env::set_var("STEMPLAYER_THREAD_PRIORITY", "150");
        std::env::remove_var("STEMPLAYER_DISABLE_RT_AUDIO");
        let priority = CallbackPriority::from_env();
        assert_eq!(priority.priority, DEFAULT_PRIORITY);
        assert!(priority.realtime);

        std::env::remove_var("STEMPLAYER_THREAD_PRIORITY");
    }
}
