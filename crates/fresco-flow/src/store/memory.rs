//! In-memory ledger store for tests and single-process deployments.
//!
//! Nothing survives a restart.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::LedgerStore;
use crate::asset::AssetKey;
use crate::error::{Error, Result};
use crate::ledger::MaterializationRecord;

/// Thread-safe [`LedgerStore`] backed by a `HashMap`.
///
/// ```rust
/// use fresco_flow::store::memory::InMemoryLedgerStore;
///
/// let store = InMemoryLedgerStore::new();
/// assert_eq!(store.record_count().unwrap(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    records: RwLock<HashMap<AssetKey, MaterializationRecord>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`, as if written by a
    /// previous process.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = (AssetKey, MaterializationRecord)>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }

    /// Returns the number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn record_count(&self) -> Result<usize> {
        let count = {
            let records = self.records.read().map_err(poison_err)?;
            records.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load_record(&self, key: &AssetKey) -> Result<Option<MaterializationRecord>> {
        let records = self.records.read().map_err(poison_err)?;
        Ok(records.get(key).cloned())
    }

    async fn save_record(&self, key: &AssetKey, record: &MaterializationRecord) -> Result<()> {
        let mut records = self.records.write().map_err(poison_err)?;
        records.insert(key.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::asset::AssetDefinition;
    use crate::graph::AssetGraph;
    use crate::ledger::MaterializationLedger;

    #[tokio::test]
    async fn save_then_load() -> Result<()> {
        let key = AssetKey::new("raw", "events");
        let graph = AssetGraph::from_definitions(vec![AssetDefinition::new(key.clone())])?;
        let record =
            MaterializationLedger::new().record_success(&graph, &key, None, Utc::now())?;

        let store = InMemoryLedgerStore::new();
        assert!(store.load_record(&key).await?.is_none());

        store.save_record(&key, &record).await?;
        assert_eq!(store.load_record(&key).await?, Some(record));
        assert_eq!(store.record_count()?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn save_overwrites_previous_record() -> Result<()> {
        let key = AssetKey::new("raw", "events");
        let graph = AssetGraph::from_definitions(vec![AssetDefinition::new(key.clone())])?;
        let mut ledger = MaterializationLedger::new();
        let first = ledger.record_success(&graph, &key, Some("1".into()), Utc::now())?;
        let second = ledger.record_success(&graph, &key, Some("2".into()), Utc::now())?;

        let store = InMemoryLedgerStore::with_records([(key.clone(), first)]);
        store.save_record(&key, &second).await?;

        assert_eq!(store.load_record(&key).await?.map(|r| r.data_version), Some("2".into()));
        assert_eq!(store.record_count()?, 1);
        Ok(())
    }
}
