/*!
    Cycle timekeeping: the monotonic cycle clock, the period pacer and per-run statistics.

    The pacer sleeps to absolute deadlines on the monotonic clock rather than for relative
    durations, so an early or late wake does not drift the following cycle boundaries. On Linux
    this is `clock_nanosleep(CLOCK_MONOTONIC, TIMER_ABSTIME)`, elsewhere a plain sleep toward
    the computed deadline.
*/

use std::time::{Duration, Instant};


/// nanosecond period derived from a loop frequency in Hz
pub fn interval_ns(frequency: f64) -> u64 {
    (1e9 / frequency).round() as u64
}


/**
    monotonic time reference of one `run()`

    Reset when the loop starts, advanced once per cycle after the hardware exchange. Elapsed
    queries are relative to the reset and stop progressing once the loop exits, so discrete
    time can be derived as `cycles / frequency` at any point.
*/
pub struct CycleClock {
    start: Instant,
    /// instant of the last completed cycle
    current: Instant,
    cycles: u64,
}
impl CycleClock {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {start: now, current: now, cycles: 0}
    }
    pub(crate) fn reset(&mut self) {
        self.start = Instant::now();
        self.current = self.start;
        self.cycles = 0;
    }
    pub(crate) fn advance(&mut self) {
        self.current = Instant::now();
        self.cycles += 1;
    }
    /// number of completed cycles since the loop started
    pub fn cycles(&self) -> u64 {self.cycles}
    /// time of the last completed cycle, relative to the loop start
    pub fn elapsed(&self) -> Duration {
        self.current - self.start
    }
}


/// O(1) per-cycle duration statistics, reported when the loop exits
#[derive(Clone, Debug)]
pub struct CycleStats {
    pub cycles: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    sum_ns: u64,
    pub overruns: u64,
}
impl CycleStats {
    pub(crate) fn new() -> Self {
        Self {cycles: 0, min_ns: u64::MAX, max_ns: 0, sum_ns: 0, overruns: 0}
    }
    pub(crate) fn record(&mut self, duration_ns: u64, budget_ns: u64) {
        self.cycles += 1;
        self.min_ns = self.min_ns.min(duration_ns);
        self.max_ns = self.max_ns.max(duration_ns);
        self.sum_ns += duration_ns;
        if duration_ns > budget_ns {
            self.overruns += 1;
        }
    }
    /// mean cycle duration, 0 before the first cycle
    pub fn mean_ns(&self) -> u64 {
        if self.cycles == 0 {0} else {self.sum_ns / self.cycles}
    }
}


/// periodic waiter sleeping to absolute deadlines
pub struct Pacer {
    interval_ns: u64,
    #[cfg(target_os = "linux")]
    next: Option<nix::sys::time::TimeSpec>,
    #[cfg(not(target_os = "linux"))]
    next: Option<Instant>,
}
impl Pacer {
    pub(crate) fn new(interval_ns: u64) -> Self {
        Self {interval_ns, next: None}
    }
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns)
    }

    /// arm the first deadline, one period from now
    pub(crate) fn start(&mut self) {
        self.next = Some(Self::now_plus(self.interval_ns));
    }

    /// sleep until the next period boundary, then arm the following one
    ///
    /// if the deadline already passed the wait returns immediately and the boundaries stay
    /// aligned on the original grid, the loop catches up instead of drifting
    pub(crate) fn wait(&mut self) {
        let Some(deadline) = self.next else {
            self.start();
            return self.wait();
        };
        Self::sleep_until(deadline);
        self.next = Some(Self::advance(deadline, self.interval_ns));
    }

    #[cfg(target_os = "linux")]
    fn now_plus(ns: u64) -> nix::sys::time::TimeSpec {
        use nix::time::{clock_gettime, ClockId};
        let now = clock_gettime(ClockId::CLOCK_MONOTONIC)
            .expect("CLOCK_MONOTONIC is always readable");
        Self::advance(now, ns)
    }
    #[cfg(target_os = "linux")]
    fn advance(deadline: nix::sys::time::TimeSpec, ns: u64) -> nix::sys::time::TimeSpec {
        use nix::sys::time::TimeSpec;
        let mut secs = deadline.tv_sec();
        let mut nanos = deadline.tv_nsec() + ns as i64;
        while nanos >= 1_000_000_000 {
            secs += 1;
            nanos -= 1_000_000_000;
        }
        TimeSpec::new(secs, nanos)
    }
    #[cfg(target_os = "linux")]
    fn sleep_until(deadline: nix::sys::time::TimeSpec) {
        use nix::time::{clock_nanosleep, ClockId, ClockNanosleepFlags};
        // EINTR wakes the loop early, which is fine: the boundary grid is absolute and the
        // cancellation flag is checked at the loop top anyway
        let _ = clock_nanosleep(
            ClockId::CLOCK_MONOTONIC,
            ClockNanosleepFlags::TIMER_ABSTIME,
            &deadline,
            );
    }

    #[cfg(not(target_os = "linux"))]
    fn now_plus(ns: u64) -> Instant {
        Instant::now() + Duration::from_nanos(ns)
    }
    #[cfg(not(target_os = "linux"))]
    fn advance(deadline: Instant, ns: u64) -> Instant {
        deadline + Duration::from_nanos(ns)
    }
    #[cfg(not(target_os = "linux"))]
    fn sleep_until(deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_rounds_to_nanoseconds() {
        assert_eq!(interval_ns(1000.0), 1_000_000);
        assert_eq!(interval_ns(500.0), 2_000_000);
        assert_eq!(interval_ns(3.0), 333_333_333);
        assert_eq!(interval_ns(7.0), 142_857_143);
        assert_eq!(interval_ns(0.5), 2_000_000_000);
    }

    #[test]
    fn clock_counts_cycles() {
        let mut clock = CycleClock::new();
        assert_eq!(clock.cycles(), 0);
        for _ in 0 .. 5 {
            clock.advance();
        }
        assert_eq!(clock.cycles(), 5);
        let frozen = clock.elapsed();
        std::thread::sleep(Duration::from_millis(2));
        // elapsed refers to the last completed cycle, not to the present
        assert_eq!(clock.elapsed(), frozen);
    }

    #[test]
    fn stats_track_extremes_and_overruns() {
        let mut stats = CycleStats::new();
        stats.record(800, 1000);
        stats.record(1200, 1000);
        stats.record(1000, 1000);
        assert_eq!(stats.min_ns, 800);
        assert_eq!(stats.max_ns, 1200);
        assert_eq!(stats.mean_ns(), 1000);
        assert_eq!(stats.overruns, 1);
    }

    #[test]
    fn pacer_holds_the_period() {
        let mut pacer = Pacer::new(interval_ns(1000.0));
        pacer.start();
        let before = Instant::now();
        for _ in 0 .. 10 {
            pacer.wait();
        }
        let elapsed = before.elapsed();
        // 10 periods of 1ms, allow generous scheduling slack above and none below
        assert!(elapsed >= Duration::from_millis(9), "period underrun: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(100), "period overrun: {:?}", elapsed);
    }
}
