//! Production [`Environment`] implementation using real system time.
//!
//! Uses `std::time::Instant` for monotonic deadlines. This protocol needs
//! no randomness, so there is no RNG method to implement.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use switcher_core::env::{Environment, WallClock};

/// Real clock: `std::time::Instant` for monotonic deadlines, system time
/// (assumed UTC) for the `Time` frame.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn elapsed(&self, since: Self::Instant) -> Duration {
        self.now().saturating_duration_since(since)
    }

    fn advance(&self, instant: Self::Instant, by: Duration) -> Self::Instant {
        instant + by
    }

    #[allow(clippy::expect_used)]
    fn wall_clock(&self) -> WallClock {
        let since_epoch =
            SystemTime::now().duration_since(UNIX_EPOCH).expect("invariant: system clock is after Unix epoch (1970-01-01)");
        let secs_today = since_epoch.as_secs() % 86_400;
        let hour = (secs_today / 3600) as u8;
        let minute = ((secs_today / 60) % 60) as u8;
        let second = (secs_today % 60) as u8;
        let micros = since_epoch.subsec_micros();
        WallClock { hour, minute, second, micros }
    }
}
