//! Clock implementations for clocksync
//!
//! A node's clock is a real time source plus a signed offset. The offset is
//! the only thing synchronization ever changes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use clocksync_core::{ClockOffset, Timestamp};

/// Source of real (unadjusted) time
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the UNIX epoch
    fn now(&self) -> Timestamp;
}

/// Operating system wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let millis = match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            // Wall clock set before 1970
            Err(e) => -(e.duration().as_millis() as i64),
        };
        Timestamp::from_millis(millis)
    }
}

/// Hand-driven time source for simulations and tests
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        ManualTimeSource {
            now: AtomicI64::new(start.as_millis()),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, to: Timestamp) {
        self.now.store(to.as_millis(), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
struct ClockState {
    offset: ClockOffset,
    adjustments: u64,
    last_checkpoint: Option<Timestamp>,
}

/// Real time source plus an additive offset
pub struct OffsetClock {
    source: Arc<dyn TimeSource>,
    state: Mutex<ClockState>,
}

impl OffsetClock {
    pub fn new(source: Arc<dyn TimeSource>, initial: ClockOffset) -> Self {
        OffsetClock {
            source,
            state: Mutex::new(ClockState {
                offset: initial,
                ..Default::default()
            }),
        }
    }

    /// Clock backed by the system wall clock
    pub fn system(initial: ClockOffset) -> Self {
        Self::new(Arc::new(SystemTimeSource), initial)
    }

    /// Adjusted time: real time plus offset
    pub fn now(&self) -> Timestamp {
        let offset = self.state.lock().offset;
        self.source.now() + offset
    }

    /// Unadjusted reading of the underlying source
    pub fn real_now(&self) -> Timestamp {
        self.source.now()
    }

    pub fn offset(&self) -> ClockOffset {
        self.state.lock().offset
    }

    /// Add `delta` to the offset, returning the new offset.
    /// Never replaces the offset.
    pub fn adjust(&self, delta: ClockOffset) -> ClockOffset {
        let mut state = self.state.lock();
        state.offset += delta;
        state.adjustments += 1;
        state.offset
    }

    /// Number of adjustments applied so far
    pub fn adjustments(&self) -> u64 {
        self.state.lock().adjustments
    }

    pub fn record_checkpoint(&self, reference: Timestamp) {
        self.state.lock().last_checkpoint = Some(reference);
    }

    pub fn last_checkpoint(&self) -> Option<Timestamp> {
        self.state.lock().last_checkpoint
    }

    pub fn source(&self) -> Arc<dyn TimeSource> {
        Arc::clone(&self.source)
    }
}
