//! In-memory store implementations, for tests.

use crate::{
    BlockSource, ConsensusBlock, ReceiptStore, StateStore, StoreError, StoreResult, StoredReceipt,
    SyncInfo,
};
use alloy::primitives::{B256, Bloom};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

#[derive(Debug, Default)]
struct BlockSourceInner {
    blocks: BTreeMap<u64, ConsensusBlock>,
    by_hash: HashMap<B256, u64>,
    earliest: u64,
    latest: Option<u64>,
}

/// An in-memory [`BlockSource`].
///
/// The reported status defaults to the lowest and highest stored heights and
/// can be overridden to simulate lag or pruning.
#[derive(Debug, Clone, Default)]
pub struct MemBlockSource {
    inner: Arc<RwLock<BlockSourceInner>>,
    genesis: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl MemBlockSource {
    /// Create an empty block source with the given initial height.
    pub fn new(genesis: u64) -> Self {
        let source = Self::default();
        source.genesis.store(genesis, Ordering::Release);
        source
    }

    /// Insert a block.
    pub fn insert(&self, block: ConsensusBlock) {
        let mut inner = self.inner.write();
        inner.by_hash.insert(block.hash, block.height);
        inner.blocks.insert(block.height, block);
    }

    /// Remove a block, as if it were pruned or never written.
    pub fn remove(&self, height: u64) {
        let mut inner = self.inner.write();
        if let Some(block) = inner.blocks.remove(&height) {
            inner.by_hash.remove(&block.hash);
        }
    }

    /// Override the reported status.
    pub fn set_status(&self, earliest: u64, latest: u64) {
        let mut inner = self.inner.write();
        inner.earliest = earliest;
        inner.latest = Some(latest);
    }

    /// Make every read fail with [`StoreError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("mem block source"));
        }
        Ok(())
    }
}

impl BlockSource for MemBlockSource {
    async fn status(&self) -> StoreResult<SyncInfo> {
        self.check()?;
        let inner = self.inner.read();
        let latest = inner
            .latest
            .or_else(|| inner.blocks.last_key_value().map(|(h, _)| *h))
            .unwrap_or_default();
        Ok(SyncInfo::new(inner.earliest, latest))
    }

    async fn block(&self, height: Option<u64>) -> StoreResult<Option<ConsensusBlock>> {
        self.check()?;
        let inner = self.inner.read();
        Ok(match height {
            Some(height) => inner.blocks.get(&height).cloned(),
            None => inner.blocks.last_key_value().map(|(_, b)| b.clone()),
        })
    }

    async fn block_by_hash(&self, hash: B256) -> StoreResult<Option<ConsensusBlock>> {
        self.check()?;
        let inner = self.inner.read();
        Ok(inner.by_hash.get(&hash).and_then(|h| inner.blocks.get(h)).cloned())
    }

    async fn genesis(&self) -> StoreResult<u64> {
        self.check()?;
        Ok(self.genesis.load(Ordering::Acquire))
    }
}

/// An in-memory [`StateStore`] reporting a fixed version window.
#[derive(Debug, Clone, Default)]
pub struct MemStateStore {
    earliest: Arc<AtomicU64>,
    latest: Arc<AtomicU64>,
}

impl MemStateStore {
    /// Create a state store reporting the given window.
    pub fn new(earliest: u64, latest: u64) -> Self {
        let store = Self::default();
        store.set(earliest, latest);
        store
    }

    /// Update the reported window.
    pub fn set(&self, earliest: u64, latest: u64) {
        self.earliest.store(earliest, Ordering::Release);
        self.latest.store(latest, Ordering::Release);
    }
}

impl StateStore for MemStateStore {
    fn latest_version(&self) -> StoreResult<u64> {
        Ok(self.latest.load(Ordering::Acquire))
    }

    fn earliest_version(&self) -> StoreResult<u64> {
        Ok(self.earliest.load(Ordering::Acquire))
    }
}

#[derive(Debug, Default)]
struct ReceiptStoreInner {
    receipts: HashMap<B256, StoredReceipt>,
    blooms: BTreeMap<u64, Bloom>,
    earliest: Option<u64>,
    latest: Option<u64>,
}

/// An in-memory [`ReceiptStore`].
#[derive(Debug, Clone, Default)]
pub struct MemReceiptStore {
    inner: Arc<RwLock<ReceiptStoreInner>>,
    failing: Arc<AtomicBool>,
}

impl MemReceiptStore {
    /// Create an empty receipt store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the receipts of a block, recording the block's aggregate bloom
    /// and advancing the latest version to `height` if it is newer.
    pub fn insert_block(&self, height: u64, receipts: impl IntoIterator<Item = StoredReceipt>) {
        let mut inner = self.inner.write();
        let mut bloom = Bloom::default();
        for receipt in receipts {
            bloom.accrue_bloom(&receipt.logs_bloom);
            inner.receipts.insert(receipt.tx_hash, receipt);
        }
        inner.blooms.insert(height, bloom);
        inner.latest = Some(inner.latest.map_or(height, |l| l.max(height)));
    }

    /// Override the reported latest version.
    pub fn set_latest(&self, latest: Option<u64>) {
        self.inner.write().latest = latest;
    }

    /// Override the reported earliest version.
    pub fn set_earliest(&self, earliest: Option<u64>) {
        self.inner.write().earliest = earliest;
    }

    /// Make every read fail with [`StoreError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("mem receipt store"));
        }
        Ok(())
    }
}

impl ReceiptStore for MemReceiptStore {
    async fn latest_version(&self) -> StoreResult<Option<u64>> {
        self.check()?;
        Ok(self.inner.read().latest)
    }

    async fn earliest_version(&self) -> StoreResult<Option<u64>> {
        self.check()?;
        Ok(self.inner.read().earliest)
    }

    async fn get_receipt(&self, tx_hash: B256) -> StoreResult<Option<StoredReceipt>> {
        self.check()?;
        Ok(self.inner.read().receipts.get(&tx_hash).cloned())
    }

    async fn block_bloom(&self, height: u64) -> StoreResult<Option<Bloom>> {
        self.check()?;
        Ok(self.inner.read().blooms.get(&height).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    fn block(height: u64) -> ConsensusBlock {
        ConsensusBlock {
            height,
            hash: B256::with_last_byte(height as u8),
            parent_hash: B256::with_last_byte(height.saturating_sub(1) as u8),
            timestamp: 1_700_000_000 + height,
            proposer: Address::ZERO,
            gas_limit: 10_000_000,
            txs: vec![],
        }
    }

    #[tokio::test]
    async fn block_source_status_tracks_inserts() {
        let source = MemBlockSource::new(1);
        source.insert(block(1));
        source.insert(block(2));
        assert_eq!(source.status().await.unwrap(), SyncInfo::new(0, 2));
        assert_eq!(source.genesis().await.unwrap(), 1);

        source.set_status(2, 5);
        assert_eq!(source.status().await.unwrap(), SyncInfo::new(2, 5));

        let by_hash = source.block_by_hash(B256::with_last_byte(2)).await.unwrap();
        assert_eq!(by_hash.map(|b| b.height), Some(2));
        assert_eq!(source.block(None).await.unwrap().map(|b| b.height), Some(2));

        source.remove(2);
        assert!(source.block(Some(2)).await.unwrap().is_none());
        assert!(source.block_by_hash(B256::with_last_byte(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_store_errors() {
        let receipts = MemReceiptStore::new();
        receipts.insert_block(3, []);
        assert_eq!(receipts.latest_version().await.unwrap(), Some(3));
        receipts.set_failing(true);
        assert!(receipts.latest_version().await.is_err());
    }
}
