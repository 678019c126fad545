//! # Dispatch Buffer
//!
//! Holds events until a telemetry listener exists, then delivers them in
//! arrival order exactly once.
//!
//! # State
//! All mutable state sits behind one `ReentrantMutex<RefCell<..>>`:
//! - Calls from different threads are fully serialized, so a flush can never
//!   interleave with an immediate send.
//! - Listeners run while the mutex is held but with no `RefCell` borrow
//!   outstanding, so a listener may report further events from the same
//!   thread without deadlocking.
//!
//! # Promotion
//! `probe()` moves `Waiting` to `Enabled` (listener in the slot) or to
//! `Expired` (registration deadline passed). It runs from the background
//! poller and at the start of every `report_event`, so promotion does not
//! depend on the poller existing.

use super::listener::{Listener, ListenerSlot};
use super::state::BufferState;
use crate::clock::Clock;
use crate::config::AnalyticsConfig;
use crate::types::{EventData, PendingEvent, TIMESTAMP_FIELD};
use log::{debug, info, warn};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// `report_event` calls, in any state
    pub reported: u64,
    /// Events appended to the pending queue
    pub queued: u64,
    /// Queued events overwritten in place by a replacing report
    pub replaced: u64,
    /// Deliveries the listener accepted
    pub sent: u64,
    /// Events discarded by expiry, disable, or reports after expiry
    pub dropped: u64,
    /// Deliveries the listener rejected or panicked on
    pub listener_failures: u64,
}

struct BufferInner {
    state: BufferState,
    queue: Vec<PendingEvent>,
    globals: EventData,
    /// First listener found; never replaced or cleared
    listener: Option<Listener>,
    debug: bool,
    stats: BufferStats,
}

/// Event buffer and dispatcher.
pub struct DispatchBuffer {
    inner: ReentrantMutex<RefCell<BufferInner>>,
    slot: ListenerSlot,
    clock: Arc<dyn Clock>,
    /// Registration deadline (ms); probes strictly after it expire the buffer
    deadline_ms: u64,
    broadcast_prefix: String,
    /// Background poll task, taken exactly once on cancellation
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DispatchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        f.debug_struct("DispatchBuffer")
            .field("state", &inner.state)
            .field("pending", &inner.queue.len())
            .field("deadline_ms", &self.deadline_ms)
            .finish()
    }
}

impl DispatchBuffer {
    /// Create a buffer in `Waiting`. The registration deadline starts now.
    pub fn new(config: &AnalyticsConfig, slot: ListenerSlot, clock: Arc<dyn Clock>) -> Self {
        let deadline_ms = clock
            .now_ms()
            .saturating_add(config.registration_timeout.as_millis() as u64);

        DispatchBuffer {
            inner: ReentrantMutex::new(RefCell::new(BufferInner {
                state: BufferState::Waiting,
                queue: Vec::new(),
                globals: EventData::new(),
                listener: None,
                debug: config.debug,
                stats: BufferStats::default(),
            })),
            slot,
            clock,
            deadline_ms,
            broadcast_prefix: config.broadcast_prefix.clone(),
            poller: Mutex::new(None),
        }
    }

    // ============================================================================================
    // STATE MACHINE
    // ============================================================================================

    /// Run one poll step and return the resulting state.
    pub fn probe(&self) -> BufferState {
        let guard = self.inner.lock();

        let (listener, pending, debug) = {
            let mut inner = guard.borrow_mut();
            if inner.state.is_terminal() {
                return inner.state;
            }

            if self.clock.now_ms() > self.deadline_ms {
                let dropped = inner.queue.len() as u64;
                inner.state = BufferState::Expired;
                inner.queue.clear();
                inner.stats.dropped += dropped;
                drop(inner);

                self.cancel_poller();
                warn!("Analytics: No back-end registered on time");
                return BufferState::Expired;
            }

            let listener = match self.slot.get() {
                Some(listener) => listener,
                None => return BufferState::Waiting,
            };

            inner.state = BufferState::Enabled;
            inner.listener = Some(listener.clone());
            (listener, std::mem::take(&mut inner.queue), inner.debug)
        };

        self.cancel_poller();
        info!("Analytics: Registered back-end, flushing {} events", pending.len());
        if debug {
            debug!("Analytics: Listener {:?}", listener);
        }

        for event in pending {
            self.send(&listener, &event.name, event.data);
        }

        BufferState::Enabled
    }

    /// Put `listener` in the discovery slot and probe immediately.
    ///
    /// The flush, if any, happens on the calling thread before this returns.
    pub fn register_listener(&self, listener: Listener) -> BufferState {
        self.slot.set(listener);
        self.probe()
    }

    /// Force permanent expiry. Pending events are dropped.
    pub fn disable(&self) {
        let guard = self.inner.lock();
        let changed = {
            let mut inner = guard.borrow_mut();
            let changed = inner.state != BufferState::Expired;
            let dropped = inner.queue.len() as u64;
            inner.state = BufferState::Expired;
            inner.queue.clear();
            inner.stats.dropped += dropped;
            changed
        };

        self.cancel_poller();
        if changed {
            info!("Analytics: Disabled");
        }
    }

    /// Cancel the background poller, leaving the state untouched.
    pub fn shutdown(&self) {
        self.cancel_poller();
    }

    // ============================================================================================
    // REPORTING
    // ============================================================================================

    /// Report an event.
    ///
    /// Global attributes are merged into `data`, overriding caller fields of
    /// the same name. While waiting, a `replace` report overwrites the data
    /// of a queued event with the same name, keeping its queue position.
    pub fn report_event(&self, name: &str, mut data: EventData, replace: bool) {
        let guard = self.inner.lock();
        self.probe();

        let (listener, data) = {
            let mut inner = guard.borrow_mut();
            inner.stats.reported += 1;

            if inner.state == BufferState::Expired {
                inner.stats.dropped += 1;
                return;
            }

            for (key, value) in inner.globals.iter() {
                data.insert(key.clone(), value.clone());
            }

            if inner.state == BufferState::Waiting {
                let debug = inner.debug;
                if replace {
                    if let Some(slot) = inner.queue.iter_mut().find(|e| e.name == name) {
                        slot.data = data;
                        inner.stats.replaced += 1;
                        if debug {
                            debug!("Analytics: Replacing scheduled {}", name);
                        }
                        return;
                    }
                }

                if debug {
                    debug!("Analytics: Scheduling {} {:?}", name, data);
                }
                inner.queue.push(PendingEvent::new(name, data));
                inner.stats.queued += 1;
                return;
            }

            match inner.listener.clone() {
                Some(listener) => (listener, data),
                None => return,
            }
        };

        self.send(&listener, name, data);
    }

    /// Add or overwrite a global attribute for all later reports.
    pub fn set_global(&self, name: &str, value: impl Into<Value>) {
        let guard = self.inner.lock();
        guard
            .borrow_mut()
            .globals
            .insert(name.to_string(), value.into());
    }

    /// Deliver one event. Stamps `ts` if missing.
    fn send(&self, listener: &Listener, name: &str, mut data: EventData) {
        if !data.contains_key(TIMESTAMP_FIELD) {
            data.insert(TIMESTAMP_FIELD.to_string(), Value::from(self.clock.now_ms()));
        }

        let guard = self.inner.lock();
        let debug = guard.borrow().debug;
        if debug {
            debug!("Analytics: Sending {} {:?}", name, data);
        }

        // Delivery is best-effort: a listener error or panic is counted and
        // dropped here, never retried and never returned to the reporter.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            listener.deliver(&self.broadcast_prefix, name, &data)
        }));

        let mut inner = guard.borrow_mut();
        match outcome {
            Ok(Ok(())) => inner.stats.sent += 1,
            Ok(Err(e)) => {
                inner.stats.listener_failures += 1;
                if debug {
                    debug!("Analytics: Listener rejected {}: {}", name, e);
                }
            }
            Err(_) => {
                inner.stats.listener_failures += 1;
                if debug {
                    debug!("Analytics: Listener panicked on {}", name);
                }
            }
        }
    }

    // ============================================================================================
    // POLLER HANDLE
    // ============================================================================================

    /// Hand over the background poll task. Aborted at once if the buffer
    /// already left `Waiting`.
    pub(crate) fn attach_poller(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.poller.lock().replace(handle) {
            previous.abort();
        }
        if self.state().is_terminal() {
            self.cancel_poller();
        }
    }

    fn cancel_poller(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
            info!("Analytics: Listener poller stopped");
        }
    }

    /// True while a poll task is attached and still running.
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    // ============================================================================================
    // INSPECTION
    // ============================================================================================

    pub fn state(&self) -> BufferState {
        self.inner.lock().borrow().state
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == BufferState::Enabled
    }

    pub fn is_expired(&self) -> bool {
        self.state() == BufferState::Expired
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().borrow().queue.len()
    }

    /// Snapshot of the pending queue, oldest first.
    pub fn pending(&self) -> Vec<PendingEvent> {
        self.inner.lock().borrow().queue.clone()
    }

    /// Snapshot of the global attributes.
    pub fn globals(&self) -> EventData {
        self.inner.lock().borrow().globals.clone()
    }

    pub fn stats(&self) -> BufferStats {
        self.inner.lock().borrow().stats
    }

    pub fn slot(&self) -> &ListenerSlot {
        &self.slot
    }

    pub fn set_debug(&self, debug: bool) {
        self.inner.lock().borrow_mut().debug = debug;
    }

    pub fn is_debug(&self) -> bool {
        self.inner.lock().borrow().debug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn buffer_at(start_ms: u64) -> (DispatchBuffer, ManualClock) {
        let clock = ManualClock::new(start_ms);
        let buffer = DispatchBuffer::new(
            &AnalyticsConfig::default(),
            ListenerSlot::new(),
            Arc::new(clock.clone()),
        );
        (buffer, clock)
    }

    fn data(pairs: &[(&str, Value)]) -> EventData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_starts_waiting_and_queues() {
        let (buffer, _) = buffer_at(0);
        buffer.report_event("a", EventData::new(), false);
        assert_eq!(buffer.state(), BufferState::Waiting);
        assert_eq!(buffer.pending_len(), 1);
        assert_eq!(buffer.stats().queued, 1);
    }

    #[test]
    fn test_deadline_is_strictly_after_timeout() {
        let (buffer, clock) = buffer_at(1_000);
        clock.advance(10_000);
        assert_eq!(buffer.probe(), BufferState::Waiting);
        clock.advance(1);
        assert_eq!(buffer.probe(), BufferState::Expired);
    }

    #[test]
    fn test_replace_without_match_appends() {
        let (buffer, _) = buffer_at(0);
        buffer.report_event("a", EventData::new(), true);
        buffer.report_event("b", EventData::new(), true);
        let names: Vec<_> = buffer.pending().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(buffer.stats().replaced, 0);
    }

    #[test]
    fn test_replace_overwrites_first_match_only() {
        let (buffer, _) = buffer_at(0);
        buffer.report_event("a", data(&[("v", json!(1))]), false);
        buffer.report_event("a", data(&[("v", json!(2))]), false);
        buffer.report_event("a", data(&[("v", json!(3))]), true);

        let pending = buffer.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].data["v"], json!(3));
        assert_eq!(pending[1].data["v"], json!(2));
    }

    #[test]
    fn test_globals_override_caller_fields() {
        let (buffer, _) = buffer_at(0);
        buffer.set_global("trackid", "abc");
        buffer.report_event("a", data(&[("trackid", json!("spoofed"))]), false);
        assert_eq!(buffer.pending()[0].data["trackid"], json!("abc"));
    }

    #[test]
    fn test_caller_timestamp_is_kept() {
        let (buffer, _) = buffer_at(500);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        buffer.register_listener(Listener::callback(move |_, data| {
            sink.lock().push(data.clone());
            Ok(())
        }));

        buffer.report_event("a", data(&[("ts", json!(42))]), false);
        buffer.report_event("b", EventData::new(), false);

        let seen = seen.lock();
        assert_eq!(seen[0]["ts"], json!(42));
        assert_eq!(seen[1]["ts"], json!(500));
    }

    #[test]
    fn test_disable_is_idempotent_and_drops_queue() {
        let (buffer, _) = buffer_at(0);
        buffer.report_event("a", EventData::new(), false);
        buffer.disable();
        buffer.disable();
        assert!(buffer.is_expired());
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.stats().dropped, 1);
    }

    #[test]
    fn test_disable_after_enable_stops_delivery() {
        let (buffer, _) = buffer_at(0);
        let count = Arc::new(Mutex::new(0u32));
        let sink = count.clone();
        buffer.register_listener(Listener::callback(move |_, _| {
            *sink.lock() += 1;
            Ok(())
        }));
        buffer.report_event("a", EventData::new(), false);
        buffer.disable();
        buffer.report_event("b", EventData::new(), false);
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_listener_panic_is_contained() {
        let (buffer, _) = buffer_at(0);
        buffer.register_listener(Listener::callback(|name, _| {
            if name == "boom" {
                panic!("listener bug");
            }
            Ok(())
        }));

        buffer.report_event("boom", EventData::new(), false);
        buffer.report_event("fine", EventData::new(), false);

        let stats = buffer.stats();
        assert_eq!(stats.listener_failures, 1);
        assert_eq!(stats.sent, 1);
    }

    #[test]
    fn test_listener_may_report_reentrantly() {
        let (buffer, _) = buffer_at(0);
        let buffer = Arc::new(buffer);
        let names = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&buffer);
        let sink = names.clone();
        buffer.register_listener(Listener::callback(move |name, _| {
            sink.lock().push(name.to_string());
            if name == "outer" {
                if let Some(buffer) = weak.upgrade() {
                    buffer.report_event("inner", EventData::new(), false);
                }
            }
            Ok(())
        }));

        buffer.report_event("outer", EventData::new(), false);
        assert_eq!(*names.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_debug_toggle() {
        let (buffer, _) = buffer_at(0);
        assert!(!buffer.is_debug());
        buffer.set_debug(true);
        assert!(buffer.is_debug());
    }
}
