//! Outbound audio playback pacing (§4.3), transliterated from
//! `tracks.py::AudioCallback.recv`'s wall-clock anchor algorithm.

use std::time::{Duration, Instant};

/// Tracks the wall-clock anchor used to release outbound audio frames at
/// their intended playback time, recovering from stalls instead of
/// free-running once the source resumes.
pub struct PacingClock {
    anchor: Option<Instant>,
    last_release: Option<Instant>,
}

impl Default for PacingClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PacingClock {
    pub fn new() -> Self {
        Self {
            anchor: None,
            last_release: None,
        }
    }

    /// Given a frame whose payload spans `frame_duration` and whose
    /// stream-relative timestamp is `data_time`, return how long the
    /// caller should sleep before releasing it.
    ///
    /// On the first frame, or after a stall longer than
    /// `10 * frame_duration`, the anchor is recomputed from the current
    /// instant so playback resumes immediately rather than trying to
    /// catch up to a stale schedule.
    pub fn wait_for(&mut self, data_time: Duration, frame_duration: Duration) -> Duration {
        let now = Instant::now();
        let stalled = match self.last_release {
            Some(last) => now.saturating_duration_since(last) > frame_duration.saturating_mul(10),
            None => false,
        };

        if self.anchor.is_none() || stalled {
            self.anchor = Some(now.checked_sub(data_time).unwrap_or(now));
        }
        self.last_release = Some(now);

        let target = self.anchor.expect("anchor set above") + data_time;
        target.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_has_no_wait() {
        let mut clock = PacingClock::new();
        let wait = clock.wait_for(Duration::from_millis(0), Duration::from_millis(20));
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn subsequent_frame_waits_for_its_scheduled_offset() {
        let mut clock = PacingClock::new();
        clock.wait_for(Duration::from_millis(0), Duration::from_millis(20));
        let wait = clock.wait_for(Duration::from_millis(20), Duration::from_millis(20));
        assert!(wait <= Duration::from_millis(20));
    }

    #[test]
    fn stall_resets_the_anchor_instead_of_compounding_delay() {
        let mut clock = PacingClock::new();
        clock.wait_for(Duration::from_millis(0), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(250));
        // A gap over 10 * 20ms = 200ms counts as a stall; the anchor
        // should reset so this does not ask for a huge catch-up wait.
        let wait = clock.wait_for(Duration::from_millis(20), Duration::from_millis(20));
        assert!(wait < Duration::from_millis(50));
    }
}
