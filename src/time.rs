//! Time APIs for obtaining the current time and calculating with points in
//! time and durations.
//!
//! All waits in the scheduler are timer-based polls of a monotonic
//! millisecond clock (no suspension, no blocking I/O), so these types use
//! millisecond resolution and 32-bit arithmetic throughout.

use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// A duration with millisecond resolution.
///
/// Can represent a maximum duration of about 49 days. Overflows saturate
/// rather than panicking, since timers are long-running and should degrade
/// gracefully rather than abort the scheduler.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration(u32);

impl Duration {
    pub const ZERO: Self = Duration(0);

    pub const fn from_millis(millis: u32) -> Self {
        Duration(millis)
    }

    pub const fn from_secs(secs: u32) -> Self {
        Duration(secs.saturating_mul(1000))
    }

    pub const fn as_millis(&self) -> u32 {
        self.0
    }

    pub const fn as_secs_f32(&self) -> f32 {
        self.0 as f32 / 1000.0
    }
}

impl Add for Duration {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A point in time, relative to an unspecified epoch.
///
/// Obtained from an implementation of [`Timer`]. `Instant`s from different
/// `Timer` instances are not comparable. Wraps around after about 49 days;
/// apart from that, it is monotonic.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Instant(u32);

impl Instant {
    /// The largest gap between two `Instant`s that [`duration_since`] will
    /// report without assuming a clock wraparound occurred.
    ///
    /// [`duration_since`]: Instant::duration_since
    pub const MAX_TIME_BETWEEN: Duration = Duration(1_000 * 60 * 60 * 24); // 1 day

    pub const fn from_raw_millis(millis: u32) -> Self {
        Instant(millis)
    }

    pub const fn raw_millis(&self) -> u32 {
        self.0
    }

    /// Duration elapsed between `earlier` and `self`, saturating at zero if
    /// `earlier` is actually later (which can legitimately happen across a
    /// clock wraparound).
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        let elapsed = self.0.wrapping_sub(earlier.0);
        if elapsed > Self::MAX_TIME_BETWEEN.as_millis() {
            // Likely `earlier` is actually after `self`; treat as no time
            // elapsed rather than reporting a ~49-day span.
            Duration::ZERO
        } else {
            Duration(elapsed)
        }
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;
    fn sub(self, rhs: Self) -> Duration {
        self.duration_since(rhs)
    }
}

impl Add<Duration> for Instant {
    type Output = Self;
    fn add(self, d: Duration) -> Self {
        Instant(self.0.wrapping_add(d.as_millis()))
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, d: Duration) {
        *self = *self + d;
    }
}

impl Sub<Duration> for Instant {
    type Output = Self;
    fn sub(self, d: Duration) -> Self {
        Instant(self.0.wrapping_sub(d.as_millis()))
    }
}

impl SubAssign<Duration> for Instant {
    fn sub_assign(&mut self, d: Duration) {
        *self = *self - d;
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Trait for time providers.
///
/// The platform glue must provide a `Timer` implementation with millisecond
/// accuracy. Implementations must never move backwards in time except by
/// wraparound of the underlying counter.
pub trait Timer {
    fn now(&self) -> Instant;
}
