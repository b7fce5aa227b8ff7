//! In-process buckets, for development setups and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::base::{ObjectStore, StoreConnector};
use super::opendal_store::OpendalStore;
use crate::errors::StorageError;
use crate::models::StorageConfig;

/// Hands out one memory-backed store per bucket name, created on first connect.
#[derive(Default)]
pub struct MemoryConnector {
    buckets: Mutex<HashMap<String, Arc<OpendalStore>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bucket's store, creating it if needed.
    pub fn bucket(&self, name: &str) -> Result<Arc<OpendalStore>, StorageError> {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(store) = buckets.get(name) {
            return Ok(store.clone());
        }
        let store = Arc::new(OpendalStore::memory(name)?);
        buckets.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Every key in the bucket; empty for buckets never connected.
    pub async fn object_keys(&self, name: &str) -> Vec<String> {
        match self.bucket(name) {
            Ok(store) => store.list_objects("").await.unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if config.bucket_name.trim().is_empty() {
            return Err(StorageError::InvalidInput("bucket name is empty".into()));
        }
        Ok(self.bucket(&config.bucket_name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;

    #[tokio::test]
    async fn connector_shares_store_per_bucket() {
        let connector = MemoryConnector::new();
        let cfg = StorageConfig::with_access_key(ProviderKind::R2, "b1", "http://unused", "a", "s");

        let first = connector.connect(&cfg).unwrap();
        first.put_object("k", b"v".to_vec(), None).await.unwrap();
        let second = connector.connect(&cfg).unwrap();
        assert_eq!(second.get_object("k").await.unwrap(), b"v".to_vec());
        assert_eq!(connector.object_keys("b1").await, vec!["k"]);
        assert!(connector.object_keys("other").await.is_empty());
    }

    #[test]
    fn connector_rejects_blank_bucket() {
        let connector = MemoryConnector::new();
        let cfg = StorageConfig::with_access_key(ProviderKind::R2, "  ", "http://unused", "a", "s");
        assert!(matches!(connector.connect(&cfg), Err(StorageError::InvalidInput(_))));
    }
}
