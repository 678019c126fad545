//! Dispatch buffer state machine.

use std::fmt;

/// Lifecycle of the dispatch buffer.
///
/// ```text
///            listener found
///   Waiting ───────────────▶ Enabled
///      │
///      │ timeout / disable()
///      ▼
///   Expired
/// ```
///
/// `Enabled` and `Expired` are terminal. `disable()` forces `Expired` from
/// any state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// No listener yet; events are queued
    Waiting,
    /// Listener known; events are delivered immediately
    Enabled,
    /// Permanently off; events are dropped
    Expired,
}

impl BufferState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, BufferState::Waiting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BufferState::Waiting => "waiting",
            BufferState::Enabled => "enabled",
            BufferState::Expired => "expired",
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
