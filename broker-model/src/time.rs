//! Time types and the clock abstraction
//!
//! `Timespan` is a signed nanosecond duration, `Timestamp` an absolute
//! point relative to the Unix epoch. Data-store time-keeping goes through
//! the `Clock` trait so tests and simulations can drive time manually.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A relative amount of time, in nanoseconds.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    borsh::BorshSerialize,
    borsh::BorshDeserialize,
)]
#[repr(transparent)]
pub struct Timespan(pub i64);

impl Timespan {
    pub const ZERO: Timespan = Timespan(0);

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms * 1_000_000)
    }

    pub fn nanos(&self) -> i64 {
        self.0
    }

    /// Conversion to `Duration`; negative spans clamp to zero.
    pub fn to_duration(&self) -> Duration {
        Duration::from_nanos(self.0.max(0) as u64)
    }
}

impl From<Duration> for Timespan {
    fn from(d: Duration) -> Self {
        Self(d.as_nanos() as i64)
    }
}

impl Add for Timespan {
    type Output = Timespan;
    fn add(self, rhs: Timespan) -> Timespan {
        Timespan(self.0 + rhs.0)
    }
}

impl Sub for Timespan {
    type Output = Timespan;
    fn sub(self, rhs: Timespan) -> Timespan {
        Timespan(self.0 - rhs.0)
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl fmt::Debug for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timespan({}ns)", self.0)
    }
}

/// An absolute point in time: a `Timespan` since the Unix epoch.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    borsh::BorshSerialize,
    borsh::BorshDeserialize,
)]
#[repr(transparent)]
pub struct Timestamp(pub Timespan);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(Timespan(0));

    pub fn nanos_since_epoch(&self) -> i64 {
        self.0 .0
    }
}

impl Add<Timespan> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Timespan) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl AddAssign<Timespan> for Timestamp {
    fn add_assign(&mut self, rhs: Timespan) {
        self.0 = self.0 + rhs;
    }
}

impl Sub for Timestamp {
    type Output = Timespan;
    fn sub(self, rhs: Timestamp) -> Timespan {
        self.0 - rhs.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Source of the current time for data-store time-keeping tasks.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Timestamp(Timespan(since.as_nanos() as i64))
    }
}

/// Manually advanced clock for simulations and tests.
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    now_nanos: Arc<AtomicI64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ts: Timestamp) -> Self {
        let clock = Self::new();
        clock.now_nanos.store(ts.nanos_since_epoch(), Ordering::SeqCst);
        clock
    }

    /// Move the clock forward by `span`.
    pub fn advance(&self, span: Timespan) {
        self.now_nanos.fetch_add(span.nanos(), Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        Timestamp(Timespan(self.now_nanos.load(Ordering::SeqCst)))
    }
}
