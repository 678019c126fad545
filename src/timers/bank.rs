//! Suspend-aware duration timers.
//!
//! Each named timer keeps the time it was last (re)started and the duration
//! collected before that. `freeze` folds running time into the accumulator
//! and pauses every timer; `thaw` restarts them from "now". Wall-clock time
//! between the two is never counted.

use crate::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    /// Last (re)start time in ms; meaningful only while not frozen
    running_since: u64,
    /// Duration collected before `running_since`
    accumulated: u64,
    frozen: bool,
}

impl TimerEntry {
    fn started(now: u64, frozen: bool) -> Self {
        Self {
            running_since: now,
            accumulated: 0,
            frozen,
        }
    }

    fn elapsed(&self, now: u64) -> u64 {
        if self.frozen {
            self.accumulated
        } else {
            self.accumulated
                .saturating_add(now.saturating_sub(self.running_since))
        }
    }
}

#[derive(Debug, Default)]
struct BankState {
    timers: BTreeMap<String, TimerEntry>,
    /// Set between freeze and thaw; timers started meanwhile begin frozen
    suspended: bool,
}

/// Named duration timers, in milliseconds.
///
/// Unknown names are not an error: reading or stopping one yields `0`.
pub struct TimerBank {
    state: Mutex<BankState>,
    clock: Arc<dyn Clock>,
}

impl Default for TimerBank {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for TimerBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimerBank")
            .field("timers", &state.timers.len())
            .field("suspended", &state.suspended)
            .finish()
    }
}

impl TimerBank {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BankState::default()),
            clock,
        }
    }

    /// Start `name`. Does nothing if it is already running, so the
    /// accumulated duration is never reset by a second start.
    pub fn start(&self, name: &str) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let frozen = state.suspended;
        state
            .timers
            .entry(name.to_string())
            .or_insert_with(|| TimerEntry::started(now, frozen));
    }

    /// Current duration of `name`, or `0` if it is not running.
    pub fn read(&self, name: &str) -> u64 {
        let now = self.clock.now_ms();
        self.state
            .lock()
            .timers
            .get(name)
            .map_or(0, |entry| entry.elapsed(now))
    }

    /// Remove `name` and return its final duration (`0` if unknown).
    pub fn stop(&self, name: &str) -> u64 {
        let now = self.clock.now_ms();
        self.state
            .lock()
            .timers
            .remove(name)
            .map_or(0, |entry| entry.elapsed(now))
    }

    /// Stop then start `name` in one step, returning the stopped duration.
    pub fn restart(&self, name: &str) -> u64 {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let frozen = state.suspended;
        state
            .timers
            .insert(name.to_string(), TimerEntry::started(now, frozen))
            .map_or(0, |previous| previous.elapsed(now))
    }

    /// Pause every running timer, keeping what it has accumulated so far.
    pub fn freeze(&self) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.suspended = true;
        for entry in state.timers.values_mut().filter(|e| !e.frozen) {
            entry.accumulated = entry.elapsed(now);
            entry.frozen = true;
        }
    }

    /// Resume every frozen timer from the current time.
    pub fn thaw(&self) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state.suspended = false;
        for entry in state.timers.values_mut().filter(|e| e.frozen) {
            entry.running_since = now;
            entry.frozen = false;
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state.lock().timers.contains_key(name)
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    /// Names of all running timers, in key order.
    pub fn names(&self) -> Vec<String> {
        self.state.lock().timers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bank_at(start_ms: u64) -> (TimerBank, ManualClock) {
        let clock = ManualClock::new(start_ms);
        (TimerBank::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_read_unknown_timer_is_zero() {
        let (bank, _) = bank_at(0);
        assert_eq!(bank.read("missing"), 0);
        assert_eq!(bank.stop("missing"), 0);
        assert!(!bank.is_running("missing"));
    }

    #[test]
    fn test_timer_started_at_epoch_zero_is_still_present() {
        let (bank, clock) = bank_at(0);
        bank.start("t");
        assert!(bank.is_running("t"));
        clock.advance(7);
        assert_eq!(bank.stop("t"), 7);
        assert!(!bank.is_running("t"));
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let (bank, clock) = bank_at(1_000);
        bank.start("t");
        clock.advance(100);
        bank.freeze();
        clock.advance(100);
        bank.freeze();
        assert_eq!(bank.read("t"), 100);
    }

    #[test]
    fn test_thaw_without_freeze_keeps_running_time() {
        let (bank, clock) = bank_at(1_000);
        bank.start("t");
        clock.advance(300);
        bank.thaw();
        clock.advance(200);
        assert_eq!(bank.read("t"), 500);
    }

    #[test]
    fn test_restart_unknown_timer_returns_zero_and_starts() {
        let (bank, clock) = bank_at(5_000);
        assert_eq!(bank.restart("t"), 0);
        clock.advance(40);
        assert_eq!(bank.read("t"), 40);
    }

    #[test]
    fn test_restart_while_suspended_starts_frozen() {
        let (bank, clock) = bank_at(0);
        bank.start("t");
        clock.advance(10);
        bank.freeze();
        clock.advance(90);
        assert_eq!(bank.restart("t"), 10);
        clock.advance(50);
        assert_eq!(bank.read("t"), 0);
        bank.thaw();
        clock.advance(5);
        assert_eq!(bank.read("t"), 5);
    }

    #[test]
    fn test_names_in_key_order() {
        let (bank, _) = bank_at(0);
        bank.start("b");
        bank.start("a");
        assert_eq!(bank.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
