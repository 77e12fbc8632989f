//! evmrpc Storage Contracts
//!
//! Read-only abstractions over the backing stores consulted by the evmrpc
//! gateway.
//!
//! ## Design Overview
//!
//! A node's data is split across several stores, each of which advances and
//! prunes on its own schedule:
//!
//! - [`BlockSource`]: the consensus layer's block store. Blocks carry raw
//!   transactions, only some of which are EVM transactions.
//! - [`StateStore`]: a versioned state store. Both the historical state store
//!   and the in-process commit multistore implement it.
//! - [`ReceiptStore`]: EVM receipts by transaction hash, plus a per-block
//!   logs bloom.
//! - [`TxDecoder`]: recognizes raw transactions carrying EVM payloads.
//!   [`Eip2718Decoder`] is provided.
//!
//! Async stores return `Send` futures so that callers may drive them from
//! any runtime worker.
//!
//! When the "test-utils" flag is enabled, in-memory implementations are
//! available in the `mem` module.
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    clippy::missing_const_for_fn,
    rustdoc::all
)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod decode;
pub use decode::{DecodedTx, Eip2718Decoder, evm_tx_hashes};

mod error;
pub use error::{StoreError, StoreResult};

/// In-memory store implementations.
#[cfg(feature = "test-utils")]
pub mod mem;

mod traits;
pub use traits::{BlockSource, ReceiptStore, StateStore, TxDecoder};

mod types;
pub use types::{ConsensusBlock, StoredReceipt, SyncInfo};
