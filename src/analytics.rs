//! # Analytics
//!
//! Host-facing surface: one explicitly constructed instance owning the
//! dispatch buffer, the timer bank and the session identity.
//!
//! # Lifecycle
//! - Construction bootstraps the tracking id, publishes it as a global
//!   attribute, starts the registration deadline and, when a tokio runtime
//!   is present, the listener poller.
//! - Host suspension is fed in as [`LifecycleSignal`]s, directly via
//!   `suspend()` / `resume()` or through `spawn_lifecycle_listener`.
//! - `shutdown()` cancels every background task. Nothing is cancelled
//!   implicitly.

use crate::clock::{Clock, SystemClock};
use crate::config::AnalyticsConfig;
use crate::dispatch::{
    BufferState, BufferStats, DispatchBuffer, Listener, ListenerPoller, ListenerSlot,
    PollerConfig,
};
use crate::identity::{KeyValueStore, SessionIdentity, TrackIdGenerator, UuidTrackIdGenerator};
use crate::timers::TimerBank;
use crate::types::EventData;
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Host lifecycle notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Host went to the background: freeze timers
    Suspend,
    /// Host came back: thaw timers
    Resume,
}

/// Client-side telemetry buffer.
pub struct Analytics {
    config: AnalyticsConfig,
    buffer: Arc<DispatchBuffer>,
    timers: TimerBank,
    identity: SessionIdentity,
    lifecycle_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Analytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analytics")
            .field("tracking_id", &self.identity.id())
            .field("buffer", &self.buffer)
            .field("timers", &self.timers)
            .finish()
    }
}

impl Analytics {
    /// Default configuration, system clock, UUID tracking ids.
    pub fn init(store: &dyn KeyValueStore, slot: ListenerSlot) -> Self {
        Self::new(AnalyticsConfig::default(), store, slot)
    }

    pub fn new(config: AnalyticsConfig, store: &dyn KeyValueStore, slot: ListenerSlot) -> Self {
        Self::with_parts(config, store, &UuidTrackIdGenerator, slot, Arc::new(SystemClock))
    }

    /// Fully injected constructor.
    pub fn with_parts(
        config: AnalyticsConfig,
        store: &dyn KeyValueStore,
        generator: &dyn TrackIdGenerator,
        slot: ListenerSlot,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let identity = SessionIdentity::load_or_create(
            store,
            generator,
            &config.identity_key,
            config.identity_ttl,
        );

        let buffer = Arc::new(DispatchBuffer::new(&config, slot, clock.clone()));
        buffer.set_global(&config.trackid_attribute, identity.id());

        ListenerPoller::new(
            &buffer,
            PollerConfig {
                poll_interval: config.poll_interval,
                enabled: true,
            },
        )
        .spawn();

        Analytics {
            config,
            buffer,
            timers: TimerBank::new(clock),
            identity,
            lifecycle_task: Mutex::new(None),
        }
    }

    // ============================================================================================
    // EVENTS
    // ============================================================================================

    /// Report an event; see [`DispatchBuffer::report_event`].
    pub fn report_event(&self, name: &str, data: EventData, replace: bool) {
        self.buffer.report_event(name, data, replace);
    }

    /// Attach an attribute to every later event.
    pub fn set_global(&self, name: &str, value: impl Into<Value>) {
        self.buffer.set_global(name, value);
    }

    /// Register the telemetry consumer and flush pending events now.
    pub fn register_listener(&self, listener: Listener) -> BufferState {
        self.buffer.register_listener(listener)
    }

    /// One poll step.
    pub fn probe(&self) -> BufferState {
        self.buffer.probe()
    }

    /// Permanently turn dispatch off, dropping anything pending.
    pub fn disable(&self) {
        self.buffer.disable();
    }

    // ============================================================================================
    // TIMERS
    // ============================================================================================

    pub fn start_timer(&self, name: &str) {
        self.timers.start(name);
    }

    pub fn restart_timer(&self, name: &str) -> u64 {
        self.timers.restart(name)
    }

    pub fn get_timer(&self, name: &str) -> u64 {
        self.timers.read(name)
    }

    pub fn stop_timer(&self, name: &str) -> u64 {
        self.timers.stop(name)
    }

    pub fn freeze(&self) {
        self.timers.freeze();
    }

    pub fn thaw(&self) {
        self.timers.thaw();
    }

    // ============================================================================================
    // LIFECYCLE
    // ============================================================================================

    pub fn suspend(&self) {
        self.handle_signal(LifecycleSignal::Suspend);
    }

    pub fn resume(&self) {
        self.handle_signal(LifecycleSignal::Resume);
    }

    pub fn handle_signal(&self, signal: LifecycleSignal) {
        if self.buffer.is_debug() {
            debug!("Analytics: Lifecycle {:?}", signal);
        }
        match signal {
            LifecycleSignal::Suspend => self.timers.freeze(),
            LifecycleSignal::Resume => self.timers.thaw(),
        }
    }

    /// Feed lifecycle signals from `rx` into this instance on the current
    /// tokio runtime. Returns `false` when no runtime is available.
    ///
    /// The task ends when the channel closes, when the instance is dropped,
    /// or on `shutdown()`.
    pub fn spawn_lifecycle_listener(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<LifecycleSignal>,
    ) -> bool {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => return false,
        };

        let weak = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            while let Some(signal) = rx.recv().await {
                match weak.upgrade() {
                    Some(analytics) => analytics.handle_signal(signal),
                    None => break,
                }
            }
        });

        if let Some(previous) = self.lifecycle_task.lock().replace(handle) {
            previous.abort();
        }
        true
    }

    /// Cancel the listener poller and the lifecycle task. Idempotent.
    ///
    /// Dispatch keeps working afterwards; promotion then only happens on
    /// `report_event`, `probe` or `register_listener`.
    pub fn shutdown(&self) {
        self.buffer.shutdown();
        if let Some(handle) = self.lifecycle_task.lock().take() {
            handle.abort();
        }
    }

    // ============================================================================================
    // INSPECTION
    // ============================================================================================

    pub fn tracking_id(&self) -> &str {
        self.identity.id()
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn state(&self) -> BufferState {
        self.buffer.state()
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    pub fn set_debug(&self, debug: bool) {
        self.buffer.set_debug(debug);
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<DispatchBuffer> {
        &self.buffer
    }

    pub fn timers(&self) -> &TimerBank {
        &self.timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::MemoryStore;

    fn analytics_at(start_ms: u64) -> (Analytics, ManualClock) {
        let clock = ManualClock::new(start_ms);
        let analytics = Analytics::with_parts(
            AnalyticsConfig::default(),
            &MemoryStore::new(),
            &|| "0123456789abcdef0123456789abcdef".to_string(),
            ListenerSlot::new(),
            Arc::new(clock.clone()),
        );
        (analytics, clock)
    }

    #[test]
    fn test_trackid_published_as_global() {
        let (analytics, _) = analytics_at(0);
        assert_eq!(analytics.tracking_id(), "0123456789abcdef0123456789abcdef");
        assert_eq!(
            analytics.buffer().globals()["trackid"],
            Value::from("0123456789abcdef0123456789abcdef")
        );
    }

    #[test]
    fn test_signals_drive_freeze_and_thaw() {
        let (analytics, clock) = analytics_at(0);
        analytics.start_timer("t");
        clock.advance(100);
        analytics.suspend();
        clock.advance(1_000);
        analytics.resume();
        clock.advance(50);
        assert_eq!(analytics.get_timer("t"), 150);
    }

    #[test]
    fn test_lifecycle_listener_requires_runtime() {
        let (analytics, _) = analytics_at(0);
        let (_tx, rx) = mpsc::channel(4);
        assert!(!Arc::new(analytics).spawn_lifecycle_listener(rx));
    }

    #[tokio::test]
    async fn test_lifecycle_listener_forwards_signals() {
        let (analytics, _) = analytics_at(0);
        let analytics = Arc::new(analytics);
        let (tx, rx) = mpsc::channel(4);
        assert!(analytics.spawn_lifecycle_listener(rx));

        tx.send(LifecycleSignal::Suspend).await.unwrap();
        for _ in 0..100 {
            if analytics.timers().is_suspended() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert!(analytics.timers().is_suspended());

        analytics.shutdown();
        analytics.shutdown();
    }
}
