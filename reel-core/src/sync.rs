//! Presentation pacing
//!
//! There is no audio clock to follow, so video paces against the wall
//! clock: the first frame after start (or after a seek) anchors its pts to
//! `Instant::now()`, and every later frame is due at
//! `anchor + (pts - anchor_pts)`.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

/// Jumps larger than this re-anchor instead of stalling or racing
const MAX_PTS_JUMP_US: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Pacing {
    /// Present at the rate the timestamps ask for
    #[default]
    Native,
    /// Present as soon as a frame is ready
    Unpaced,
}

/// Maps frame timestamps to wall-clock deadlines
#[derive(Debug, Clone)]
pub struct FrameClock {
    pacing: Pacing,
    /// (wall clock, pts_us) of the frame the clock is anchored on
    anchor: Option<(Instant, i64)>,
}

impl FrameClock {
    pub fn new(pacing: Pacing) -> Self {
        Self { pacing, anchor: None }
    }

    /// Forget the anchor; the next frame is shown immediately
    pub fn reset(&mut self) {
        self.anchor = None;
    }

    /// How long to wait before presenting the frame at `pts_us`.
    /// Late frames get `Duration::ZERO`.
    pub fn delay_for(&mut self, pts_us: i64, now: Instant) -> Duration {
        if self.pacing == Pacing::Unpaced {
            return Duration::ZERO;
        }

        let Some((anchor_at, anchor_pts)) = self.anchor else {
            self.anchor = Some((now, pts_us));
            return Duration::ZERO;
        };

        let offset_us = pts_us - anchor_pts;
        let elapsed_us = now.saturating_duration_since(anchor_at).as_micros() as i64;
        if offset_us < 0 || offset_us - elapsed_us > MAX_PTS_JUMP_US {
            debug!(pts_us, anchor_pts, elapsed_us, "Re-anchoring frame clock");
            self.anchor = Some((now, pts_us));
            return Duration::ZERO;
        }

        let ahead_us = offset_us - elapsed_us;
        if ahead_us <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(ahead_us as u64)
        }
    }

    /// Sleep until the frame at `pts_us` is due
    pub fn wait(&mut self, pts_us: i64) {
        let delay = self.delay_for(pts_us, Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(Pacing::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_US: i64 = 40_000;

    #[test]
    fn first_frame_is_immediate() {
        let mut clock = FrameClock::new(Pacing::Native);
        assert_eq!(clock.delay_for(500_000, Instant::now()), Duration::ZERO);
    }

    #[test]
    fn later_frames_wait_for_their_pts() {
        let mut clock = FrameClock::new(Pacing::Native);
        let start = Instant::now();
        clock.delay_for(0, start);

        assert_eq!(clock.delay_for(FRAME_US, start), Duration::from_micros(40_000));
        let later = start + Duration::from_millis(10);
        assert_eq!(clock.delay_for(FRAME_US, later), Duration::from_micros(30_000));
    }

    #[test]
    fn late_frames_are_not_delayed() {
        let mut clock = FrameClock::new(Pacing::Native);
        let start = Instant::now();
        clock.delay_for(0, start);

        let late = start + Duration::from_millis(100);
        assert_eq!(clock.delay_for(FRAME_US, late), Duration::ZERO);
    }

    #[test]
    fn backwards_pts_reanchors() {
        let mut clock = FrameClock::new(Pacing::Native);
        let start = Instant::now();
        clock.delay_for(2_000_000, start);

        let now = start + Duration::from_millis(5);
        assert_eq!(clock.delay_for(1_000_000, now), Duration::ZERO);
        // anchored on the new pts
        assert_eq!(
            clock.delay_for(1_000_000 + FRAME_US, now),
            Duration::from_micros(40_000)
        );
    }

    #[test]
    fn large_forward_jump_reanchors() {
        let mut clock = FrameClock::new(Pacing::Native);
        let start = Instant::now();
        clock.delay_for(0, start);

        assert_eq!(clock.delay_for(5_000_000, start), Duration::ZERO);
        assert_eq!(
            clock.delay_for(5_000_000 + FRAME_US, start),
            Duration::from_micros(40_000)
        );
    }

    #[test]
    fn reset_drops_anchor() {
        let mut clock = FrameClock::new(Pacing::Native);
        let start = Instant::now();
        clock.delay_for(0, start);
        clock.reset();
        assert_eq!(clock.delay_for(FRAME_US * 10, start), Duration::ZERO);
    }

    #[test]
    fn unpaced_never_waits() {
        let mut clock = FrameClock::new(Pacing::Unpaced);
        let start = Instant::now();
        for i in 0..5 {
            assert_eq!(clock.delay_for(i * FRAME_US, start), Duration::ZERO);
        }
    }
}
