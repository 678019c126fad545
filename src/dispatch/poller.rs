//! Background listener discovery.
//!
//! While the buffer is `Waiting`, a tokio task calls
//! [`DispatchBuffer::probe`] on a fixed interval. The task ends as soon as a
//! probe reports a terminal state, and the buffer aborts it when the state
//! changes through any other path (report, registration, `disable`,
//! `shutdown`).
//!
//! The task only holds a `Weak` reference: dropping the last `Arc` to the
//! buffer ends it on the next tick.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};

use super::buffer::DispatchBuffer;
use log::{debug, info};

/// Configuration for the listener poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval between probes
    pub poll_interval: Duration,
    /// Whether the poller is spawned at all
    pub enabled: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            enabled: true,
        }
    }
}

/// Periodic probe of a [`DispatchBuffer`]'s listener slot.
pub struct ListenerPoller {
    buffer: Weak<DispatchBuffer>,
    config: PollerConfig,
}

impl ListenerPoller {
    pub fn new(buffer: &Arc<DispatchBuffer>, config: PollerConfig) -> Self {
        Self {
            buffer: Arc::downgrade(buffer),
            config,
        }
    }

    /// Spawn the poller on the current tokio runtime and attach its handle
    /// to the buffer.
    ///
    /// Returns `false` without spawning when disabled, when the buffer has
    /// already left `Waiting`, or when no runtime is available. In the last
    /// case promotion still happens lazily on `report_event`.
    pub fn spawn(self) -> bool {
        if !self.config.enabled || self.config.poll_interval.is_zero() {
            info!("Analytics: Listener poller disabled, relying on lazy probes");
            return false;
        }

        let buffer = match self.buffer.upgrade() {
            Some(buffer) => buffer,
            None => return false,
        };
        if buffer.state().is_terminal() {
            return false;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                debug!("Analytics: No tokio runtime, listener poller not started");
                return false;
            }
        };

        info!(
            "Analytics: Polling for a back-end every {}ms",
            self.config.poll_interval.as_millis()
        );

        let handle = runtime.spawn(self.run());
        buffer.attach_poller(handle);
        true
    }

    /// Probe until the buffer leaves `Waiting` or is dropped.
    pub async fn run(self) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let buffer = match self.buffer.upgrade() {
                Some(buffer) => buffer,
                None => break,
            };

            if buffer.probe().is_terminal() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::AnalyticsConfig;
    use crate::dispatch::listener::{Listener, ListenerSlot};
    use crate::dispatch::state::BufferState;

    fn waiting_buffer(slot: ListenerSlot) -> Arc<DispatchBuffer> {
        Arc::new(DispatchBuffer::new(
            &AnalyticsConfig::default(),
            slot,
            Arc::new(SystemClock),
        ))
    }

    fn fast() -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(5),
            enabled: true,
        }
    }

    #[test]
    fn test_poller_config_defaults() {
        let config = PollerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.poll_interval.as_millis(), 100);
    }

    #[test]
    fn test_spawn_without_runtime_is_noop() {
        let buffer = waiting_buffer(ListenerSlot::new());
        assert!(!ListenerPoller::new(&buffer, fast()).spawn());
        assert!(!buffer.is_polling());
    }

    #[test]
    fn test_spawn_disabled_is_noop() {
        let buffer = waiting_buffer(ListenerSlot::new());
        let config = PollerConfig {
            enabled: false,
            ..fast()
        };
        assert!(!ListenerPoller::new(&buffer, config).spawn());
    }

    #[tokio::test]
    async fn test_poller_discovers_listener() {
        let slot = ListenerSlot::new();
        let buffer = waiting_buffer(slot.clone());
        assert!(ListenerPoller::new(&buffer, fast()).spawn());
        assert!(buffer.is_polling());

        slot.set(Listener::callback(|_, _| Ok(())));
        for _ in 0..200 {
            if buffer.is_enabled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(buffer.state(), BufferState::Enabled);
        assert!(!buffer.is_polling());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_poller() {
        let buffer = waiting_buffer(ListenerSlot::new());
        assert!(ListenerPoller::new(&buffer, fast()).spawn());

        buffer.shutdown();
        assert!(!buffer.is_polling());
        assert_eq!(buffer.state(), BufferState::Waiting);
        buffer.shutdown();
    }

    #[tokio::test]
    async fn test_spawn_after_terminal_state_is_noop() {
        let buffer = waiting_buffer(ListenerSlot::new());
        buffer.disable();
        assert!(!ListenerPoller::new(&buffer, fast()).spawn());
    }
}
