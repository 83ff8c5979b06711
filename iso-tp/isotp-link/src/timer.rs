//! Clock abstraction to support `std` and `no_std` environments.

use core::time::Duration;

/// Abstraction over a monotonic clock.
///
/// The link needs a monotonically increasing time source to implement response timeouts
/// (N_Bs, N_Cr) and Consecutive Frame pacing (STmin).
pub trait Clock {
    /// Instant type produced by the clock.
    type Instant: Copy + PartialOrd;

    /// Current instant.
    fn now(&self) -> Self::Instant;
    /// Elapsed duration since an instant.
    fn elapsed(&self, earlier: Self::Instant) -> Duration;
    /// Add a duration to an instant (saturating if needed).
    fn add(&self, instant: Self::Instant, dur: Duration) -> Self::Instant;
}

/// Clock backed by a free-running microsecond counter, e.g. a hardware timer.
///
/// The counter must be monotonic; it is read as a `u64` so wrap-around is not a concern in
/// practice.
#[derive(Clone, Copy, Debug)]
pub struct MicrosClock<F> {
    source: F,
}

impl<F: Fn() -> u64> MicrosClock<F> {
    /// Wrap a function returning the current time in microseconds.
    pub const fn new(source: F) -> Self {
        Self { source }
    }
}

impl<F: Fn() -> u64> Clock for MicrosClock<F> {
    type Instant = u64;

    fn now(&self) -> Self::Instant {
        (self.source)()
    }

    fn elapsed(&self, earlier: Self::Instant) -> Duration {
        Duration::from_micros(self.now().saturating_sub(earlier))
    }

    fn add(&self, instant: Self::Instant, dur: Duration) -> Self::Instant {
        let micros = u64::try_from(dur.as_micros()).unwrap_or(u64::MAX);
        instant.saturating_add(micros)
    }
}

#[cfg(feature = "std")]
/// Standard library clock wrapper.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdClock;

#[cfg(feature = "std")]
impl Clock for StdClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn elapsed(&self, earlier: Self::Instant) -> Duration {
        earlier.elapsed()
    }

    /// Add with `checked_add`, saturating on overflow.
    fn add(&self, instant: Self::Instant, dur: Duration) -> Self::Instant {
        instant.checked_add(dur).unwrap_or(instant)
    }
}
