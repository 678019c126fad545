//! Session tracking id bootstrap.
//!
//! The tracking id lives as long as the persistent store keeps it, not as
//! long as the process: it is reloaded on every start and only generated
//! when the store has nothing usable.

use super::store::KeyValueStore;
use log::{debug, warn};
use std::time::Duration;
use uuid::Uuid;

/// Source of fresh tracking ids.
pub trait TrackIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 32 lowercase hex digits from a random (v4) UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTrackIdGenerator;

impl TrackIdGenerator for UuidTrackIdGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

impl<F> TrackIdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

/// The session tracking id and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    id: String,
    generated: bool,
}

impl SessionIdentity {
    /// Reload the id stored under `key`, or generate and persist a new one.
    ///
    /// A failed or malformed read counts as absent. A failed write is logged
    /// and the generated id is still used for this process.
    pub fn load_or_create(
        store: &dyn KeyValueStore,
        generator: &dyn TrackIdGenerator,
        key: &str,
        ttl: Duration,
    ) -> Self {
        let stored = match store.get(key) {
            Ok(value) => value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
            Err(e) => {
                warn!("Analytics: Could not read tracking id, generating a new one: {}", e);
                None
            }
        };

        if let Some(id) = stored {
            debug!("Analytics: Resumed tracking session {}", id);
            return Self {
                id,
                generated: false,
            };
        }

        let id = generator.generate();
        if let Err(e) = store.set(key, &id, Some(ttl)) {
            warn!("Analytics: Could not persist tracking id: {}", e);
        }
        debug!("Analytics: Started tracking session {}", id);

        Self {
            id,
            generated: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the id was generated during this bootstrap.
    pub fn was_generated(&self) -> bool {
        self.generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::store::MemoryStore;

    const KEY: &str = "_ccl_tracking_id";
    const TTL: Duration = Duration::from_secs(60);

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, String> {
            Err("corrupt".to_string())
        }

        fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), String> {
            Err("read-only".to_string())
        }
    }

    #[test]
    fn test_uuid_generator_shape() {
        let id = UuidTrackIdGenerator.generate();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, UuidTrackIdGenerator.generate());
    }

    #[test]
    fn test_generates_and_persists_when_absent() {
        let store = MemoryStore::new();
        let identity = SessionIdentity::load_or_create(&store, &|| "abc".to_string(), KEY, TTL);

        assert_eq!(identity.id(), "abc");
        assert!(identity.was_generated());
        assert_eq!(store.get(KEY).unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_reloads_existing_id() {
        let store = MemoryStore::new();
        store.set(KEY, "existing", None).unwrap();

        let identity =
            SessionIdentity::load_or_create(&store, &|| "unused".to_string(), KEY, TTL);
        assert_eq!(identity.id(), "existing");
        assert!(!identity.was_generated());
    }

    #[test]
    fn test_blank_stored_value_treated_as_absent() {
        let store = MemoryStore::new();
        store.set(KEY, "   ", None).unwrap();

        let identity = SessionIdentity::load_or_create(&store, &|| "fresh".to_string(), KEY, TTL);
        assert_eq!(identity.id(), "fresh");
        assert!(identity.was_generated());
    }

    #[test]
    fn test_store_failures_never_surface() {
        let identity =
            SessionIdentity::load_or_create(&BrokenStore, &|| "fallback".to_string(), KEY, TTL);
        assert_eq!(identity.id(), "fallback");
        assert!(identity.was_generated());
    }
}
