//! Session identity: a tracking id that outlives the process.
//!
//! The id is stored under a fixed key in a [`KeyValueStore`] and attached to
//! every event as a global attribute.

pub mod session;
pub mod store;

pub use session::{SessionIdentity, TrackIdGenerator, UuidTrackIdGenerator};
pub use store::{FileStore, KeyValueStore, MemoryStore};
