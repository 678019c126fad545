//! # Dispatch
//!
//! Routes events either straight to a registered listener or into an
//! ordered pending queue, and flushes that queue once a listener shows up.
//!
//! - `state.rs` - `Waiting` / `Enabled` / `Expired`
//! - `listener.rs` - listener shapes and the discovery slot
//! - `buffer.rs` - queue, globals, state transitions, send path
//! - `poller.rs` - background probe of the discovery slot

pub mod buffer;
pub mod listener;
pub mod poller;
pub mod state;

pub use buffer::{BufferStats, DispatchBuffer};
pub use listener::{ChannelNotifier, Listener, ListenerFn, ListenerSlot, Notification, Notifier};
pub use poller::{ListenerPoller, PollerConfig};
pub use state::BufferState;
