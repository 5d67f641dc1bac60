//! Audio processing clock
//!
//! The clock counts seconds since the audio context was opened, the way an
//! audio engine exposes its `currentTime`. It is built on `tokio::time` so
//! timer deadlines derived from it line up with tokio sleeps, including
//! under a paused test clock.

use tokio::time::{Duration, Instant};

/// Monotonic audio clock anchored at context creation
#[derive(Debug, Clone, Copy)]
pub struct AudioClock {
    origin: Instant,
}

impl AudioClock {
    /// Start a clock at zero now
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds elapsed since the clock started
    pub fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// Timer deadline corresponding to an audio clock time
    pub fn instant_at(&self, time: f64) -> Instant {
        self.origin + seconds(time)
    }

    /// Time left until an audio clock time, zero if it already passed
    pub fn until(&self, time: f64) -> Duration {
        seconds(time - self.current_time())
    }
}

/// Convert audio clock seconds into a duration, clamping negatives and NaN to zero
pub fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
