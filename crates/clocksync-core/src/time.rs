//! Time primitives for clocksync
//!
//! All times are whole milliseconds. A node's reported time is its real
//! clock plus a signed offset; the coordinator only ever reasons about
//! differences between such readings.

use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

use serde::Serialize;

/// Wall-clock reading in milliseconds since the UNIX epoch
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Signed distance `self - earlier` in milliseconds
    #[inline]
    pub fn millis_since(self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_millis() as i64))
    }
}

impl Add<ClockOffset> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: ClockOffset) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = ClockOffset;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Self::Output {
        ClockOffset(self.millis_since(rhs))
    }
}

impl std::fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t({}ms)", self.0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed millisecond offset applied on top of a real time source
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct ClockOffset(pub i64);

impl ClockOffset {
    pub const ZERO: ClockOffset = ClockOffset(0);

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        ClockOffset(millis)
    }

    #[inline]
    pub fn from_secs(secs: i64) -> Self {
        ClockOffset(secs.saturating_mul(1000))
    }

    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0
    }
}

impl Add for ClockOffset {
    type Output = ClockOffset;

    #[inline]
    fn add(self, rhs: ClockOffset) -> Self::Output {
        ClockOffset(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for ClockOffset {
    #[inline]
    fn add_assign(&mut self, rhs: ClockOffset) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::fmt::Debug for ClockOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:+}ms", self.0)
    }
}

impl std::fmt::Display for ClockOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:+}", self.0)
    }
}
