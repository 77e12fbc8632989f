//! Read-consistency and log query core for the evmrpc gateway.
//!
//! A node's blocks, state and receipts live in separate stores that advance
//! and prune independently. This crate presents them as one window of
//! readable heights, and serves block and log queries from it.
//!
//! ## Components
//!
//! - [`WatermarkManager`] combines the stores' reported heights into a
//!   [`Watermarks`] window. It is recomputed on every call.
//! - [`BloomFilter`], [`encode_filters`] and [`match_filters`] test address
//!   and topic criteria against 2048-bit log blooms.
//! - [`BlockCache`] holds recently read blocks with their receipts.
//! - [`LogFetcher`] serves `eth_getLogs`, splitting ranges into batches that
//!   run on the [`WorkerPool`].
//! - [`FilterRegistry`] tracks polling filters and their cursors.
//! - [`WorkerPool`] bounds background work with a fixed set of workers and a
//!   bounded queue.
//!
//! [`RpcCtx`] wires these together over a set of backing stores and exposes
//! the query surface consumed by a transport layer.
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

mod bloom;
pub use bloom::{BloomFilter, BloomIndexes, bloom_indexes, encode_filters, match_filters};

mod cache;
pub use cache::{BlockCache, BlockCacheEntry};

mod config;
pub use config::StorageRpcConfig;

mod ctx;
pub use ctx::RpcCtx;

mod eth;
pub use eth::EthError;

mod interest;
pub use interest::{FilterId, FilterOutput, FilterRegistry};

mod logs;
pub use logs::{LogFetcher, LogLimits, RangeMode, ScanRange, log_matches};

mod metrics;

mod pool;
pub use pool::{PoolError, PoolStats, Task, WorkerPool};

mod watermark;
pub use watermark::{WatermarkError, WatermarkManager, Watermarks};
