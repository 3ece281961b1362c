// Snapshot persistence with age-based invalidation
use crate::application::clock::Clock;
use crate::application::snapshot_store::{KeyValueStore, StoreError};
use crate::domain::snapshot::PersistedSnapshot;
use std::sync::Arc;

pub const DEFAULT_CACHE_KEY: &str = "chromatography_chart_data";
pub const DEFAULT_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Reads and writes the one snapshot entry. Storage failures never reach the
/// caller; they are logged and read back as "no snapshot".
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    max_age_ms: i64,
}

impl PersistenceGateway {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        max_age_ms: i64,
    ) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
            max_age_ms,
        }
    }

    /// Store I/O runs on the blocking pool, off the session task's thread.
    pub async fn save(&self, snapshot: &PersistedSnapshot) {
        let encoded = match serde_json::to_string(snapshot) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to encode chart snapshot");
                return;
            }
        };

        if let Some(Err(e)) = self.blocking(move |store, key| store.set(key, &encoded)).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to save chart snapshot");
        }
    }

    pub async fn load(&self) -> Option<PersistedSnapshot> {
        let raw = match self.blocking(|store, key| store.get(key)).await? {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to read chart snapshot");
                return None;
            }
        };

        let snapshot: PersistedSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Discarding unreadable chart snapshot");
                self.clear().await;
                return None;
            }
        };

        let age_ms = snapshot.age_ms(self.clock.now_ms());
        if age_ms < self.max_age_ms {
            Some(snapshot)
        } else {
            tracing::info!(key = %self.key, age_ms, "Chart snapshot expired, removing");
            self.clear().await;
            None
        }
    }

    pub async fn clear(&self) {
        if let Some(Err(e)) = self.blocking(|store, key| store.remove(key)).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to clear chart snapshot");
        }
    }

    /// Run one store call on the blocking pool. `None` if the call panicked.
    async fn blocking<T, F>(&self, call: F) -> Option<Result<T, StoreError>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn KeyValueStore, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let key = self.key.clone();
        match tokio::task::spawn_blocking(move || call(store.as_ref(), &key)).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "Snapshot store task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::ManualClock;
    use crate::domain::buffer::TimeSeriesBuffer;
    use crate::domain::channel::{RatioValues, SignalValues};
    use crate::domain::range::Range;
    use crate::infrastructure::file_store::MemoryStore;

    const NOW: i64 = 1_700_000_000_000;

    fn snapshot(saved_at_ms: i64) -> PersistedSnapshot {
        let mut buffer = TimeSeriesBuffer::allocate(
            30.0,
            0.1,
            RatioValues {
                a: 80.0,
                b: 20.0,
                c: 0.0,
                d: 0.0,
            },
            SignalValues::new(0.156, 0.132),
        )
        .unwrap();
        buffer.write_signals(7, 0.1234567890123, 1.0 / 3.0);

        PersistedSnapshot {
            samples: buffer.into_samples(),
            session_start_ms: saved_at_ms - 42_000,
            last_update_ms: saved_at_ms - 1_000,
            signal_range: Range::new(0.0, 0.54),
            ratio_range: Range::new(75.0, 85.0),
            saved_at_ms,
        }
    }

    fn gateway(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> PersistenceGateway {
        PersistenceGateway::new(store, clock, DEFAULT_CACHE_KEY, DEFAULT_MAX_AGE_MS)
    }

    #[tokio::test]
    async fn test_round_trip_within_max_age() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let gateway = gateway(store, clock.clone());

        let saved = snapshot(NOW);
        gateway.save(&saved).await;
        clock.advance(DEFAULT_MAX_AGE_MS - 1);

        assert_eq!(gateway.load().await, Some(saved));
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_removed() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let gateway = gateway(store.clone(), clock);

        gateway.save(&snapshot(NOW - DEFAULT_MAX_AGE_MS - 1)).await;

        assert_eq!(gateway.load().await, None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.set(DEFAULT_CACHE_KEY, "{not json").unwrap();
        let gateway = gateway(store.clone(), Arc::new(ManualClock::new(NOW)));

        assert_eq!(gateway.load().await, None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_quota_failure_is_swallowed() {
        let store = Arc::new(MemoryStore::with_quota(16));
        let gateway = gateway(store.clone(), Arc::new(ManualClock::new(NOW)));

        gateway.save(&snapshot(NOW)).await;

        assert_eq!(store.len(), 0);
        assert_eq!(gateway.load().await, None);
    }

    #[tokio::test]
    async fn test_clear_is_unconditional() {
        let store = Arc::new(MemoryStore::new());
        let gateway = gateway(store.clone(), Arc::new(ManualClock::new(NOW)));

        gateway.clear().await;
        gateway.save(&snapshot(NOW)).await;
        gateway.clear().await;
        assert_eq!(store.len(), 0);
    }

    /// A store whose calls report the thread they ran on.
    struct ThreadRecordingStore {
        inner: MemoryStore,
        threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl KeyValueStore for ThreadRecordingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_store_calls_leave_the_runtime_thread() {
        let store = Arc::new(ThreadRecordingStore {
            inner: MemoryStore::new(),
            threads: std::sync::Mutex::default(),
        });
        let gateway = PersistenceGateway::new(
            store.clone(),
            Arc::new(ManualClock::new(NOW)),
            DEFAULT_CACHE_KEY,
            DEFAULT_MAX_AGE_MS,
        );

        gateway.save(&snapshot(NOW)).await;
        assert!(gateway.load().await.is_some());
        gateway.clear().await;

        let runtime_thread = std::thread::current().id();
        let threads = store.threads.lock().unwrap();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[test]
    fn test_snapshot_json_uses_stored_field_names() {
        let json = serde_json::to_value(snapshot(NOW)).unwrap();
        for field in [
            "chartData",
            "chartStartTime",
            "lastUpdateTime",
            "uvDataRange",
            "gradientDataRange",
            "timestamp",
        ] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["chartData"].as_array().unwrap().len(), 301);
    }
}
