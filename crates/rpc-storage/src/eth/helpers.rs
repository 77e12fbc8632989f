//! Utility helpers for ETH RPC endpoints.

use crate::BlockCacheEntry;
use alloy::{
    consensus::{
        Eip658Value, ReceiptEnvelope, ReceiptWithBloom, Transaction as _, TxEnvelope,
        transaction::Recovered,
    },
    primitives::{B256, U256},
    rpc::types::{Block, BlockTransactions, Header, Log, Transaction, TransactionReceipt},
};
use evmrpc_storage::{DecodedTx, StoreResult, StoredReceipt, TxDecoder};

/// An iterator that yields inclusive block ranges of a given step size.
#[derive(Debug)]
pub(crate) struct BlockRangeInclusiveIter {
    iter: std::iter::StepBy<std::ops::RangeInclusive<u64>>,
    step: u64,
    end: u64,
}

impl BlockRangeInclusiveIter {
    pub(crate) fn new(range: std::ops::RangeInclusive<u64>, step: u64) -> Self {
        Self { end: *range.end(), iter: range.step_by(step as usize + 1), step }
    }
}

impl Iterator for BlockRangeInclusiveIter {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.iter.next()?;
        let end = start.saturating_add(self.step).min(self.end);
        if start > end {
            return None;
        }
        Some((start, end))
    }
}

/// Build an RPC block from a cached entry.
///
/// Only EVM transactions with a receipt are included. Senders and indexes are
/// taken from the receipts, and the header's gas used is their sum.
pub(crate) fn build_rpc_block<D>(
    entry: &BlockCacheEntry,
    decoder: &D,
    full: bool,
) -> StoreResult<Block>
where
    D: TxDecoder + ?Sized,
{
    let block = entry.block();
    let mut gas_used = 0u64;
    let mut txs = Vec::new();
    let mut hashes = Vec::new();

    for raw in &block.txs {
        let DecodedTx::Evm(tx) = decoder.decode(raw)? else { continue };
        let hash = *tx.tx_hash();
        let Some(receipt) = entry.receipt(&hash) else { continue };
        gas_used += receipt.gas_used;

        if full {
            txs.push(build_rpc_transaction(*tx, entry, receipt));
        } else {
            hashes.push(hash);
        }
    }

    let inner = alloy::consensus::Header {
        parent_hash: block.parent_hash,
        beneficiary: block.proposer,
        logs_bloom: *entry.bloom(),
        number: block.height,
        gas_limit: block.gas_limit,
        gas_used,
        timestamp: block.timestamp,
        ..Default::default()
    };
    let header = Header { hash: block.hash, inner, total_difficulty: Some(U256::ZERO), size: None };

    let transactions = if full {
        BlockTransactions::Full(txs)
    } else {
        BlockTransactions::Hashes(hashes)
    };

    Ok(Block { header, uncles: Vec::new(), transactions, withdrawals: None })
}

fn build_rpc_transaction(
    tx: TxEnvelope,
    entry: &BlockCacheEntry,
    receipt: &StoredReceipt,
) -> Transaction {
    let block = entry.block();
    let effective_gas_price = if receipt.effective_gas_price > 0 {
        receipt.effective_gas_price
    } else {
        tx.max_fee_per_gas()
    };
    Transaction {
        inner: Recovered::new_unchecked(tx, receipt.from),
        block_hash: Some(block.hash),
        block_number: Some(block.height),
        transaction_index: Some(receipt.transaction_index),
        effective_gas_price: Some(effective_gas_price),
    }
}

/// Build the RPC receipts of a cached entry, in block order.
///
/// Receipts recorded at another height belong to a transaction that was
/// retried in a later block, and are skipped. Log indexes count every log in
/// the block.
pub(crate) fn build_rpc_receipts(entry: &BlockCacheEntry) -> Vec<TransactionReceipt> {
    let block = entry.block();
    let mut log_index = 0u64;
    let mut out = Vec::new();

    for receipt in entry.receipts_in_order() {
        let offset = log_index;
        log_index += receipt.log_count() as u64;
        if receipt.block_number != block.height {
            continue;
        }

        let logs = receipt
            .logs
            .iter()
            .enumerate()
            .map(|(i, log)| Log {
                inner: log.clone(),
                block_hash: Some(block.hash),
                block_number: Some(block.height),
                block_timestamp: Some(block.timestamp),
                transaction_hash: Some(receipt.tx_hash),
                transaction_index: Some(receipt.transaction_index),
                log_index: Some(offset + i as u64),
                removed: false,
            })
            .collect();
        let rpc_receipt = alloy::rpc::types::eth::Receipt {
            status: Eip658Value::Eip658(receipt.status),
            cumulative_gas_used: receipt.cumulative_gas_used,
            logs,
        };

        out.push(TransactionReceipt {
            inner: build_receipt_envelope(
                ReceiptWithBloom { receipt: rpc_receipt, logs_bloom: receipt.logs_bloom },
                receipt.tx_type,
            ),
            transaction_hash: receipt.tx_hash,
            transaction_index: Some(receipt.transaction_index),
            block_hash: Some(block.hash),
            block_number: Some(block.height),
            from: receipt.from,
            to: receipt.to,
            gas_used: receipt.gas_used,
            contract_address: receipt.contract_address,
            effective_gas_price: receipt.effective_gas_price,
            blob_gas_price: None,
            blob_gas_used: None,
        });
    }
    out
}

/// Wrap a receipt in the envelope variant of its EIP-2718 type. Unknown
/// types are reported as legacy.
const fn build_receipt_envelope(
    receipt: ReceiptWithBloom<alloy::consensus::Receipt<Log>>,
    tx_type: u8,
) -> ReceiptEnvelope<Log> {
    match tx_type {
        1 => ReceiptEnvelope::Eip2930(receipt),
        2 => ReceiptEnvelope::Eip1559(receipt),
        3 => ReceiptEnvelope::Eip4844(receipt),
        4 => ReceiptEnvelope::Eip7702(receipt),
        _ => ReceiptEnvelope::Legacy(receipt),
    }
}

/// Number of EVM transactions in the entry that have a receipt.
pub(crate) fn evm_tx_count(entry: &BlockCacheEntry) -> usize {
    entry.evm_txs().iter().filter(|hash| entry.receipt(hash).is_some()).count()
}

/// Hash of the entry's block.
pub(crate) const fn block_hash(entry: &BlockCacheEntry) -> B256 {
    entry.block().hash
}
