// Key/value storage trait backing snapshot persistence

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable string storage keyed by name.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
