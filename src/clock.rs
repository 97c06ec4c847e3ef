//! Time source and periodic scheduling
//!
//! Every periodic activity of a session (the acquisition driver, the rotation
//! timer, the discovery workers and the camera workers) is driven by a
//! [`PeriodicSchedule`] over a shared [`Clock`]. The schedule advances its
//! wake time incrementally so long cycles do not accumulate drift, and it
//! reseeds from the current reading whenever the clock goes backwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest single sleep while waiting for a wake time, so that a cleared
/// running flag is observed promptly even with long periods.
const MAX_SLEEP_SLICE_S: f64 = 0.05;

/// Time provider consumed by the capture engine
///
/// Readings are seconds as `f64`. Implementations are allowed to jump
/// backwards (e.g. a wall clock being corrected); callers detect this and
/// reseed their schedules.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current time in seconds
    fn now(&self) -> f64;

    /// Block the calling thread until `now() >= t`
    fn sleep_until(&self, t: f64);

    /// Give up the remainder of the time slice
    fn yield_now(&self);
}

/// Wall clock measured from the Unix epoch
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs_f64(),
            Err(_) => 0.0,
        }
    }

    fn sleep_until(&self, t: f64) {
        let remaining = t - self.now();
        if remaining > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(remaining));
        }
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// Manually driven clock for tests and simulation
///
/// `sleep_until` jumps the clock forward instead of blocking.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Set the current reading, possibly backwards
    pub fn set(&self, t: f64) {
        if let Ok(mut now) = self.now.lock() {
            *now = t;
        }
    }

    /// Move the clock forward by `dt` seconds
    pub fn advance(&self, dt: f64) {
        if let Ok(mut now) = self.now.lock() {
            *now += dt;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.lock().map(|now| *now).unwrap_or(0.0)
    }

    fn sleep_until(&self, t: f64) {
        if let Ok(mut now) = self.now.lock() {
            if t > *now {
                *now = t;
            }
        }
        std::thread::yield_now();
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}

/// Outcome of advancing a schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleStep {
    /// Next wake time
    pub wake: f64,
    /// The clock went backwards since the previous reading
    pub reset: bool,
    /// The next wake time is already in the past
    pub behind: bool,
}

/// Incremental fixed-period schedule with clock reset detection
#[derive(Debug, Clone)]
pub struct PeriodicSchedule {
    period: f64,
    wake: f64,
    last_now: f64,
}

impl PeriodicSchedule {
    /// Create a schedule whose first wake is one period after `now`
    pub fn new(period: f64, now: f64) -> Self {
        Self {
            period,
            wake: now,
            last_now: now,
        }
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    /// Last reading seen by the schedule
    pub fn last_now(&self) -> f64 {
        self.last_now
    }

    /// Compute the next wake time from the reading `now`
    ///
    /// The wake time is `previous wake + period`. If `now` is lower than the
    /// previous reading the accumulator is reseeded from `now` first, so the
    /// returned wake is always strictly after a reset reading.
    pub fn advance(&mut self, now: f64) -> ScheduleStep {
        let reset = now < self.last_now;
        if reset {
            self.wake = now;
        }
        self.last_now = now;
        self.wake += self.period;
        ScheduleStep {
            wake: self.wake,
            reset,
            behind: self.wake < now,
        }
    }
}

/// Sleep until `wake`, waking early if `running` is cleared or the clock
/// goes backwards. Returns `false` if the flag was cleared.
pub fn sleep_until_or_stopped(clock: &dyn Clock, wake: f64, running: &AtomicBool) -> bool {
    let mut last = clock.now();
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = clock.now();
        if now >= wake || now < last {
            return true;
        }
        last = now;
        clock.sleep_until(wake.min(now + MAX_SLEEP_SLICE_S));
    }
}

/// Drive `cycle` at a fixed period until `running` is cleared
///
/// The flag is checked at the top of each cycle and while sleeping, so a
/// worker exits within one sleep slice after the flag is cleared. An
/// in-flight cycle is never interrupted.
pub fn run_periodic<F>(clock: &dyn Clock, period: f64, running: &AtomicBool, name: &str, mut cycle: F)
where
    F: FnMut(),
{
    let mut schedule = PeriodicSchedule::new(period, clock.now());
    while running.load(Ordering::SeqCst) {
        cycle();

        let step = schedule.advance(clock.now());
        if step.reset {
            tracing::warn!("{}: clock reset detected, reseeding schedule", name);
        } else if step.behind {
            tracing::info!(
                "{}: cycle overran its period of {:.3}s, falling behind",
                name,
                period
            );
        }

        if !sleep_until_or_stopped(clock, step.wake, running) {
            break;
        }
    }
    tracing::debug!("{} stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_schedule_accumulates_period() {
        let mut schedule = PeriodicSchedule::new(0.1, 10.0);
        let first = schedule.advance(10.03);
        assert!((first.wake - 10.1).abs() < 1e-9);
        assert!(!first.reset);
        // A long cycle does not shift the baseline
        let second = schedule.advance(10.18);
        assert!((second.wake - 10.2).abs() < 1e-9);
    }

    #[test]
    fn test_schedule_reseeds_on_clock_reset() {
        let mut schedule = PeriodicSchedule::new(0.5, 100.0);
        schedule.advance(100.1);
        let step = schedule.advance(3.0);
        assert!(step.reset);
        assert!((step.wake - 3.5).abs() < 1e-9);
        assert!(step.wake > 3.0);
        assert!(!step.behind);
    }

    #[test]
    fn test_schedule_reports_falling_behind() {
        let mut schedule = PeriodicSchedule::new(0.1, 0.0);
        let step = schedule.advance(0.35);
        assert!(step.behind);
        // Re-arms from the accumulator, it does not skip ahead
        assert!((step.wake - 0.1).abs() < 1e-9);
        let step = schedule.advance(0.36);
        assert!((step.wake - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(1.0);
        clock.sleep_until(2.5);
        assert_eq!(clock.now(), 2.5);
        clock.sleep_until(2.0);
        assert_eq!(clock.now(), 2.5);
        clock.set(0.5);
        assert_eq!(clock.now(), 0.5);
    }

    #[test]
    fn test_sleep_returns_false_when_stopped() {
        let clock = ManualClock::new(0.0);
        let running = AtomicBool::new(false);
        assert!(!sleep_until_or_stopped(&clock, 10.0, &running));
    }

    #[test]
    fn test_sleep_wakes_on_backward_jump() {
        let mut clock = MockClock::new();
        let readings = Arc::new(Mutex::new(vec![5.0, 5.0, 1.0]));
        let r = readings.clone();
        clock.expect_now().returning(move || {
            let mut r = r.lock().unwrap();
            if r.len() > 1 {
                r.remove(0)
            } else {
                r[0]
            }
        });
        clock.expect_sleep_until().return_const(());
        let running = AtomicBool::new(true);
        assert!(sleep_until_or_stopped(&clock, 100.0, &running));
    }

    #[test]
    fn test_run_periodic_stops_on_flag() {
        let clock = ManualClock::new(0.0);
        let running = AtomicBool::new(true);
        let cycles = AtomicUsize::new(0);
        run_periodic(&clock, 0.1, &running, "test", || {
            if cycles.fetch_add(1, Ordering::SeqCst) == 4 {
                running.store(false, Ordering::SeqCst);
            }
        });
        assert_eq!(cycles.load(Ordering::SeqCst), 5);
        assert!((clock.now() - 0.4).abs() < 1e-9);
    }
}
