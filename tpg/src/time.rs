//! Points in time and spans between them, in microseconds.
//!
//! Every core keeps its own notion of `now`, an [`Instant`] read from a [`Clock`] once per loop
//! iteration and handed to every operation. Tests and the demo drive cores with hand-made
//! instants instead, which keeps them deterministic. Spans are plain [`Duration`]s.
//!
//! [`Instant`]: struct.Instant.html
//! [`Clock`]: struct.Clock.html
//! [`Duration`]: https://doc.rust-lang.org/std/time/struct.Duration.html
use core::{fmt, ops};
pub use core::time::Duration;

/// Microseconds since the data plane started.
///
/// Signed so that subtracting a timeout from an early instant stays representable.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    /// The raw microsecond count.
    pub micros: i64,
}

/// A monotonic clock, started when a core starts.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: std::time::Instant,
}

impl Instant {
    /// An instant `micros` microseconds after the start.
    pub fn from_micros<T: Into<i64>>(micros: T) -> Instant {
        Instant { micros: micros.into() }
    }

    /// An instant whole milliseconds after the start.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { micros: millis.into() * 1000 }
    }

    /// An instant whole seconds after the start.
    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { micros: secs.into() * 1_000_000 }
    }

    /// All elapsed microseconds.
    pub fn total_micros(&self) -> i64 {
        self.micros
    }

    /// All elapsed milliseconds, rounded towards zero.
    pub fn as_millis(&self) -> i64 {
        self.micros / 1000
    }

    /// The seconds part.
    pub fn secs(&self) -> i64 {
        self.micros / 1_000_000
    }

    /// The milliseconds within the current second.
    pub fn subsec_millis(&self) -> i64 {
        (self.micros / 1000) % 1000
    }
}

impl Clock {
    /// Start a clock at `Instant::default()`.
    pub fn start() -> Self {
        Clock { start: std::time::Instant::now() }
    }

    /// The current time relative to the start of the clock.
    pub fn now(&self) -> Instant {
        let elapsed = self.start.elapsed();
        Instant::from_micros(elapsed.as_micros() as i64)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::start()
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs(), self.subsec_millis())
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros + rhs.as_micros() as i64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.micros += rhs.as_micros() as i64;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros - rhs.as_micros() as i64)
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_micros((self.micros - rhs.micros).abs() as u64)
    }
}
