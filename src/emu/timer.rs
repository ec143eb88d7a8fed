//! Wall-clock pulses (RESET, NMI) paced against an injectable time base.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::signal::{SignalBus, SignalId, SignalState};

/// Source of real time for pulse widths. Emulated time never goes through here.
pub trait TimeBase: Send + Sync {
    /// Time elapsed since some fixed origin.
    fn now(&self) -> Duration;
}

/// The host's monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeBase for WallClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl TimeBase for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    deadline: Duration,
    signal: SignalId,
    state: SignalState,
    label: &'static str,
}

/// Pending real-time signal changes for one board.
pub struct TimerManager {
    time: Arc<dyn TimeBase>,
    timers: Vec<Timer>,
}

impl TimerManager {
    pub fn new(time: Arc<dyn TimeBase>) -> Self {
        Self {
            time,
            timers: Vec::new(),
        }
    }

    /// Drives `signal` to `state` once `after` has passed on the time base.
    pub fn start(&mut self, after: Duration, signal: SignalId, state: SignalState, label: &'static str) {
        let deadline = self.time.now() + after;
        self.timers.push(Timer {
            deadline,
            signal,
            state,
            label,
        });
    }

    /// Applies every expired timer, oldest first. Returns how many fired.
    pub fn poll(&mut self, bus: &mut SignalBus) -> usize {
        if self.timers.is_empty() {
            return 0;
        }
        let now = self.time.now();
        let mut fired = 0;
        self.timers.retain(|timer| {
            if timer.deadline <= now {
                log::debug!("timer {} fired: {} -> {:?}", timer.label, timer.signal, timer.state);
                bus.set(timer.signal, timer.state);
                fired += 1;
                false
            } else {
                true
            }
        });
        fired
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Drops pending timers for `signal`. Returns how many were dropped.
    pub fn cancel(&mut self, signal: SignalId) -> usize {
        let before = self.timers.len();
        self.timers.retain(|timer| timer.signal != signal);
        before - self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_after_deadline() {
        let time = ManualClock::new();
        let mut timers = TimerManager::new(time.clone());
        let mut bus = SignalBus::new();
        bus.assert_line(SignalId::Reset, true);
        timers.start(Duration::from_millis(2), SignalId::Reset, SignalState::High, "reset");

        assert_eq!(timers.poll(&mut bus), 0);
        time.advance(Duration::from_millis(1));
        assert_eq!(timers.poll(&mut bus), 0);
        assert!(bus.active(SignalId::Reset));

        time.advance(Duration::from_millis(1));
        assert_eq!(timers.poll(&mut bus), 1);
        assert!(!bus.active(SignalId::Reset));
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn test_cancel_only_touches_one_signal() {
        let time = ManualClock::new();
        let mut timers = TimerManager::new(time.clone());
        let mut bus = SignalBus::new();
        bus.assert_line(SignalId::Reset, true);
        bus.assert_line(SignalId::Nmi, true);
        timers.start(Duration::from_millis(1), SignalId::Reset, SignalState::High, "reset");
        timers.start(Duration::from_millis(1), SignalId::Nmi, SignalState::High, "nmi");

        assert_eq!(timers.cancel(SignalId::Reset), 1);
        assert_eq!(timers.cancel(SignalId::Reset), 0);
        time.advance(Duration::from_millis(1));
        assert_eq!(timers.poll(&mut bus), 1);
        assert!(bus.active(SignalId::Reset));
        assert!(!bus.active(SignalId::Nmi));
    }

    #[test]
    fn test_wall_clock_is_monotonic() {
        let clock = WallClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
