//! Time sources and the single-slot beat timer.
//!
//! The engine never sleeps. It asks a [`Clock`] for the current instant, and
//! the host decides how to wait until [`BeatTimer::deadline`]. Deadlines sit
//! on an absolute grid so that late wake-ups and handler overhead are
//! absorbed by the next delay instead of accumulating.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source measured from an arbitrary origin.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall clock anchored at construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::start()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Settable clock shared between clones. Offline tools and tests move it
/// explicitly.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        self.nanos.store(as_nanos(now), Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Duration) {
        self.nanos.fetch_add(as_nanos(delta), Ordering::SeqCst);
    }

    pub fn advance_ms(&self, millis: f64) {
        self.advance(Duration::from_secs_f64(millis.max(0.0) / 1_000.0));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Identifies one scheduled tick. Stale once the tick fires, is cancelled or
/// is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// A tick that has come due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTick {
    pub token: TimerToken,
    pub deadline: Duration,
}

#[derive(Debug, Clone, Copy)]
struct PendingTick {
    token: TimerToken,
    deadline: Duration,
}

/// Holds at most one pending tick, so two recurring schedules can never be
/// active at once.
#[derive(Debug, Default)]
pub struct BeatTimer {
    generation: u64,
    pending: Option<PendingTick>,
}

impl BeatTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a tick at `deadline`, invalidating whatever was pending.
    pub fn schedule(&mut self, deadline: Duration) -> TimerToken {
        self.generation += 1;
        let token = TimerToken(self.generation);
        self.pending = Some(PendingTick { token, deadline });
        token
    }

    /// Invalidates the pending tick. Returns whether one existed.
    pub fn cancel(&mut self) -> bool {
        self.generation += 1;
        self.pending.take().is_some()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.pending.map(|tick| tick.deadline)
    }

    pub fn is_live(&self, token: TimerToken) -> bool {
        self.pending.is_some_and(|tick| tick.token == token)
    }

    /// Removes and returns the pending tick if its deadline has passed.
    pub fn take_due(&mut self, now: Duration) -> Option<DueTick> {
        match self.pending {
            Some(tick) if tick.deadline <= now => {
                self.pending = None;
                Some(DueTick {
                    token: tick.token,
                    deadline: tick.deadline,
                })
            }
            _ => None,
        }
    }
}

/// Next deadline on the grid `deadline + k * period` strictly after `now`,
/// together with the number of grid points that were skipped on the way.
///
/// Measuring from the previous deadline rather than from `now` subtracts the
/// wake-up lateness and handler time from the following delay.
pub fn next_grid_deadline(deadline: Duration, period: Duration, now: Duration) -> (Duration, u32) {
    let next = deadline + period;
    if next > now || period.is_zero() {
        return (next, 0);
    }

    let behind = (now - next).as_nanos();
    let period_nanos = period.as_nanos();
    let skipped = behind / period_nanos + 1;
    let skipped = u32::try_from(skipped).unwrap_or(u32::MAX);
    (next + period * skipped, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let view = clock.clone();

        clock.advance(ms(250));
        clock.advance_ms(0.5);

        assert!((view.now().as_secs_f64() - 0.2505).abs() < 1e-9);
        view.set(ms(10));
        assert_eq!(clock.now(), ms(10));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock::start();
        let first = clock.now();
        assert!(clock.now() >= first);
    }

    #[test]
    fn only_due_ticks_are_taken() {
        let mut timer = BeatTimer::new();
        let token = timer.schedule(ms(500));

        assert_eq!(timer.take_due(ms(499)), None);
        assert!(timer.is_live(token));

        let due = timer.take_due(ms(500)).unwrap();
        assert_eq!(due.deadline, ms(500));
        assert!(!timer.is_live(token));
        assert_eq!(timer.deadline(), None);
    }

    #[test]
    fn rescheduling_replaces_the_pending_tick() {
        let mut timer = BeatTimer::new();
        let first = timer.schedule(ms(500));
        let second = timer.schedule(ms(400));

        assert!(!timer.is_live(first));
        assert!(timer.is_live(second));
        assert_eq!(timer.deadline(), Some(ms(400)));
    }

    #[test]
    fn cancelled_ticks_never_fire() {
        let mut timer = BeatTimer::new();
        let token = timer.schedule(ms(100));

        assert!(timer.cancel());
        assert!(!timer.is_live(token));
        assert_eq!(timer.take_due(ms(1_000)), None);
        assert!(!timer.cancel());
    }

    #[test]
    fn grid_absorbs_lateness() {
        // Woke 7 ms late for the 500 ms beat: the next delay shrinks to 493 ms.
        let (next, skipped) = next_grid_deadline(ms(500), ms(500), ms(507));
        assert_eq!(next, ms(1_000));
        assert_eq!(skipped, 0);
    }

    #[test]
    fn grid_skips_whole_missed_periods() {
        let (next, skipped) = next_grid_deadline(ms(500), ms(500), ms(1_700));
        assert_eq!(next, ms(2_000));
        assert_eq!(skipped, 2);

        let (next, skipped) = next_grid_deadline(ms(500), ms(500), ms(1_000));
        assert_eq!(next, ms(1_500));
        assert_eq!(skipped, 1);
    }
}
