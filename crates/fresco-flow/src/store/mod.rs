//! Pluggable persistence for the Materialization Ledger.
//!
//! The reconciler keeps the ledger in memory and writes every new record
//! through to a [`LedgerStore`]. Records are hydrated lazily: the first
//! time an asset key appears in the graph, its record is loaded from the
//! store. An empty store is a valid cold start.

pub mod memory;

use async_trait::async_trait;

use crate::asset::AssetKey;
use crate::error::Result;
use crate::ledger::MaterializationRecord;

/// Durable storage for materialization records, keyed by asset.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; the reconciler never holds its own state
/// lock while awaiting a store call.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Loads the latest record for `key`.
    ///
    /// Returns `None` if the asset has never materialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn load_record(&self, key: &AssetKey) -> Result<Option<MaterializationRecord>>;

    /// Stores `record` as the latest record for `key`, replacing any
    /// existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn save_record(&self, key: &AssetKey, record: &MaterializationRecord) -> Result<()>;
}
