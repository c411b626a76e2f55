//! Scheduler ticks: the fixed granularity all delays are rounded to.
//!
//! Delays and periods are given as [`Duration`]s and converted to whole ticks,
//! rounding up so that a non-zero delay never collapses to "now".

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default tick length: 50 ms (20 ticks per second).
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// A whole number of scheduler ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Ticks(pub u64);

impl Ticks {
    /// Zero ticks: fire at the next opportunity.
    pub const ZERO: Self = Self(0);

    /// Returns `true` for zero ticks.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// Returned when a tick granularity of zero is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tick granularity must be non-zero")]
pub struct ZeroGranularity;

/// Converts between wall durations and [`Ticks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickGranularity {
    tick: Duration,
}

impl TickGranularity {
    /// Creates a granularity of one tick per `tick`.
    ///
    /// # Errors
    ///
    /// Returns [`ZeroGranularity`] if `tick` is zero.
    pub fn new(tick: Duration) -> Result<Self, ZeroGranularity> {
        if tick.is_zero() {
            return Err(ZeroGranularity);
        }
        Ok(Self { tick })
    }

    /// Length of one tick.
    #[must_use]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Converts a duration to ticks, rounding up. Saturates at `u64::MAX`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use taskweave_core::{TickGranularity, Ticks};
    ///
    /// let g = TickGranularity::new(Duration::from_millis(50)).unwrap();
    /// assert_eq!(g.to_ticks(Duration::from_millis(1)), Ticks(1));
    /// assert_eq!(g.to_ticks(Duration::from_millis(100)), Ticks(2));
    /// ```
    #[must_use]
    pub fn to_ticks(&self, duration: Duration) -> Ticks {
        let tick = self.tick.as_nanos();
        let ticks = duration.as_nanos().div_ceil(tick);
        Ticks(u64::try_from(ticks).unwrap_or(u64::MAX))
    }

    /// Converts ticks back to a duration. Saturates at `Duration::MAX`.
    #[must_use]
    pub fn to_duration(&self, ticks: Ticks) -> Duration {
        let Ok(n) = u32::try_from(ticks.0) else {
            return self.saturating_mul_large(ticks.0);
        };
        self.tick.checked_mul(n).unwrap_or(Duration::MAX)
    }

    /// Rounds a duration up to a whole number of ticks.
    #[must_use]
    pub fn align(&self, duration: Duration) -> Duration {
        self.to_duration(self.to_ticks(duration))
    }

    fn saturating_mul_large(&self, n: u64) -> Duration {
        let nanos = self.tick.as_nanos().saturating_mul(u128::from(n));
        u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos)
    }
}

impl Default for TickGranularity {
    fn default() -> Self {
        Self { tick: DEFAULT_TICK }
    }
}
