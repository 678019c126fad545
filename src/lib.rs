//! # Analytics Buffer
//!
//! Client-side telemetry buffering. Events reported before a telemetry
//! back end exists are queued, then flushed in order exactly once when a
//! listener registers. If none registers before the deadline, the buffer
//! disables itself for good and drops what it held.
//!
//! Named duration timers run alongside and exclude time the host spends
//! suspended.
//!
//! ```rust,no_run
//! use analytics::{Analytics, EventData, Listener, ListenerSlot, MemoryStore};
//!
//! let analytics = Analytics::init(&MemoryStore::new(), ListenerSlot::new());
//! analytics.report_event("login", EventData::new(), false);
//!
//! analytics.register_listener(Listener::callback(|name, data| {
//!     println!("{} {:?}", name, data);
//!     Ok(())
//! }));
//! ```

pub mod analytics;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod identity;
pub mod timers;
pub mod types;

pub use analytics::{Analytics, LifecycleSignal};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AnalyticsConfig;
pub use dispatch::{
    BufferState, BufferStats, ChannelNotifier, DispatchBuffer, Listener, ListenerPoller,
    ListenerSlot, Notification, Notifier, PollerConfig,
};
pub use identity::{FileStore, KeyValueStore, MemoryStore, SessionIdentity, TrackIdGenerator};
pub use timers::TimerBank;
pub use types::{now_ms, EventData, PendingEvent, TIMESTAMP_FIELD, TRACKID_ATTRIBUTE};
