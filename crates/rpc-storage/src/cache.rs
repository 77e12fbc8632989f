//! In-memory LRU cache of recently scanned blocks.

use crate::metrics;
use alloy::primitives::{B256, Bloom};
use evmrpc_storage::{ConsensusBlock, StoredReceipt};
use lru::LruCache;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

/// A block together with its bloom and the receipts of its EVM transactions.
///
/// Entries are built completely before insertion and never mutated after. A
/// refetch replaces the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCacheEntry {
    block: ConsensusBlock,
    bloom: Bloom,
    evm_txs: Vec<B256>,
    receipts: HashMap<B256, StoredReceipt>,
}

impl BlockCacheEntry {
    /// Create a new entry.
    ///
    /// `evm_txs` holds the hashes of the block's EVM transactions in block
    /// order. `receipts` may lack entries for some of them.
    pub const fn new(
        block: ConsensusBlock,
        bloom: Bloom,
        evm_txs: Vec<B256>,
        receipts: HashMap<B256, StoredReceipt>,
    ) -> Self {
        Self { block, bloom, evm_txs, receipts }
    }

    /// The block.
    pub const fn block(&self) -> &ConsensusBlock {
        &self.block
    }

    /// The block height.
    pub const fn height(&self) -> u64 {
        self.block.height
    }

    /// The block's aggregate logs bloom.
    pub const fn bloom(&self) -> &Bloom {
        &self.bloom
    }

    /// Hashes of the block's EVM transactions, in block order.
    pub fn evm_txs(&self) -> &[B256] {
        &self.evm_txs
    }

    /// Get the receipt of a transaction in this block.
    pub fn receipt(&self, tx_hash: &B256) -> Option<&StoredReceipt> {
        self.receipts.get(tx_hash)
    }

    /// Receipts of the block's EVM transactions, in block order. Transactions
    /// without a receipt are skipped.
    pub fn receipts_in_order(&self) -> impl Iterator<Item = &StoredReceipt> {
        self.evm_txs.iter().filter_map(|hash| self.receipts.get(hash))
    }
}

/// Fixed-capacity cache of [`BlockCacheEntry`] by height.
///
/// Least recently used entries are evicted first. Entries older than the
/// configured TTL are treated as misses and dropped. All locking is internal.
#[derive(Debug)]
pub struct BlockCache {
    entries: Mutex<LruCache<u64, (Arc<BlockCacheEntry>, Instant)>>,
    ttl: Duration,
}

impl BlockCache {
    /// Create a cache holding at most `capacity` blocks.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)), ttl }
    }

    /// Get the entry at a height, if cached and fresh.
    pub fn get(&self, height: u64) -> Option<Arc<BlockCacheEntry>> {
        let mut entries = self.entries.lock();
        let fresh = entries.peek(&height).map(|(_, at)| at.elapsed() < self.ttl);
        match fresh {
            Some(true) => {
                metrics::inc_cache_hits();
                entries.get(&height).map(|(entry, _)| Arc::clone(entry))
            }
            Some(false) => {
                entries.pop(&height);
                metrics::inc_cache_misses();
                None
            }
            None => {
                metrics::inc_cache_misses();
                None
            }
        }
    }

    /// Insert an entry, replacing any previous entry at the same height.
    pub fn insert(&self, height: u64, entry: Arc<BlockCacheEntry>) {
        self.entries.lock().put(height, (entry, Instant::now()));
    }

    /// Number of cached entries, including stale ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(height: u64) -> Arc<BlockCacheEntry> {
        let block = ConsensusBlock {
            height,
            hash: B256::with_last_byte(height as u8),
            parent_hash: B256::ZERO,
            timestamp: 0,
            proposer: Default::default(),
            gas_limit: 0,
            txs: vec![],
        };
        Arc::new(BlockCacheEntry::new(block, Bloom::default(), vec![], HashMap::new()))
    }

    #[test]
    fn miss_is_none() {
        let cache = BlockCache::new(2, Duration::from_secs(60));
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = BlockCache::new(2, Duration::from_secs(60));
        cache.insert(1, entry(1));
        cache.insert(2, entry(2));
        assert!(cache.get(1).is_some());
        cache.insert(3, entry(3));

        assert!(cache.get(2).is_none());
        assert_eq!(cache.get(1).unwrap().height(), 1);
        assert_eq!(cache.get(3).unwrap().height(), 3);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn replaces_on_insert() {
        let cache = BlockCache::new(2, Duration::from_secs(60));
        cache.insert(1, entry(1));
        cache.insert(1, entry(9));
        assert_eq!(cache.get(1).unwrap().height(), 9);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn stale_entries_expire() {
        let cache = BlockCache::new(4, Duration::from_millis(20));
        cache.insert(1, entry(1));
        assert!(cache.get(1).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }
}
