//! Read-only contracts implemented by the node's backing stores.
//!
//! Each store advances and prunes independently. None of these traits promise
//! consistency with one another; aggregating them into a single readable
//! window is the job of the RPC layer.

use crate::{ConsensusBlock, DecodedTx, StoreResult, StoredReceipt, SyncInfo};
use alloy::primitives::{B256, Bloom};
use std::future::Future;

/// The consensus layer's block store.
///
/// All methods are async and return futures that are `Send`.
pub trait BlockSource: Send + Sync + 'static {
    /// Get the current sync status.
    fn status(&self) -> impl Future<Output = StoreResult<SyncInfo>> + Send;

    /// Get a block by height. `None` requests the newest block.
    ///
    /// Returns `Ok(None)` if the block is not present.
    fn block(
        &self,
        height: Option<u64>,
    ) -> impl Future<Output = StoreResult<Option<ConsensusBlock>>> + Send;

    /// Get a block by hash.
    ///
    /// Returns `Ok(None)` if the hash is unknown.
    fn block_by_hash(
        &self,
        hash: B256,
    ) -> impl Future<Output = StoreResult<Option<ConsensusBlock>>> + Send;

    /// Get the chain's initial height.
    fn genesis(&self) -> impl Future<Output = StoreResult<u64>> + Send;
}

/// A versioned state store.
///
/// Implemented by both the historical state store and the in-process commit
/// multistore. Versions are block heights.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait StateStore: Send + Sync {
    /// The newest committed version.
    fn latest_version(&self) -> StoreResult<u64>;

    /// The oldest version that has not been pruned.
    fn earliest_version(&self) -> StoreResult<u64>;
}

/// The EVM receipt store.
///
/// All methods are async and return futures that are `Send`.
pub trait ReceiptStore: Send + Sync + 'static {
    /// The newest height for which receipts are fully written. `None` if the
    /// store is empty.
    fn latest_version(&self) -> impl Future<Output = StoreResult<Option<u64>>> + Send;

    /// The oldest height for which receipts are retained.
    ///
    /// Receipt pruning must never outpace block and state pruning. Stores that
    /// do not track this may leave the default, which reports nothing.
    fn earliest_version(&self) -> impl Future<Output = StoreResult<Option<u64>>> + Send {
        async { Ok(None) }
    }

    /// Get a receipt by transaction hash.
    ///
    /// Returns `Ok(None)` if the receipt is not found.
    fn get_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = StoreResult<Option<StoredReceipt>>> + Send;

    /// Get the aggregate logs bloom of a block.
    ///
    /// Returns `Ok(None)` if no bloom was recorded for the height.
    fn block_bloom(&self, height: u64) -> impl Future<Output = StoreResult<Option<Bloom>>> + Send;
}

/// Decoder for raw stored transactions.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait TxDecoder: Send + Sync {
    /// Decode a raw transaction.
    fn decode(&self, raw: &[u8]) -> StoreResult<DecodedTx>;
}
