//! Data types read from the backing stores.

use alloy::primitives::{Address, B256, Bloom, Bytes, Log};
use serde::{Deserialize, Serialize};

/// Sync status reported by the consensus block source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Height of the newest block the source can serve.
    pub latest_height: u64,
    /// Height of the oldest block the source can serve. `0` means the source
    /// has not pruned and the genesis initial height applies.
    pub earliest_height: u64,
}

impl SyncInfo {
    /// Create a new sync status.
    pub const fn new(earliest_height: u64, latest_height: u64) -> Self {
        Self { latest_height, earliest_height }
    }
}

/// A block as stored by the consensus layer.
///
/// Transactions are kept in their raw wire encoding. Use a
/// [`TxDecoder`] to recognize the ones carrying EVM transactions.
///
/// [`TxDecoder`]: crate::TxDecoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusBlock {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Block timestamp, in seconds.
    pub timestamp: u64,
    /// Address of the block proposer.
    pub proposer: Address,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Raw transactions, in block order.
    pub txs: Vec<Bytes>,
}

/// An EVM transaction receipt as persisted by the receipt store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReceipt {
    /// Hash of the transaction.
    pub tx_hash: B256,
    /// EIP-2718 transaction type.
    pub tx_type: u8,
    /// `true` if the transaction succeeded.
    pub status: bool,
    /// Gas used by the transaction.
    pub gas_used: u64,
    /// Cumulative gas used in the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Effective gas price paid.
    pub effective_gas_price: u128,
    /// Height of the block that included the transaction.
    pub block_number: u64,
    /// Index of the transaction among the block's EVM transactions.
    pub transaction_index: u64,
    /// Recovered sender.
    pub from: Address,
    /// Recipient. `None` for contract creation.
    pub to: Option<Address>,
    /// Address of the created contract, if any.
    pub contract_address: Option<Address>,
    /// Logs emitted by the transaction.
    pub logs: Vec<Log>,
    /// Bloom over the logs emitted by the transaction.
    pub logs_bloom: Bloom,
}

impl StoredReceipt {
    /// Number of logs emitted by the transaction.
    pub const fn log_count(&self) -> usize {
        self.logs.len()
    }
}
