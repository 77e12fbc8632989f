//! Configuration for the storage-backed RPC core.

use serde::{Deserialize, Deserializer};
use std::{num::NonZeroUsize, time::Duration};

/// Upper bound on the default worker count.
const MAX_DEFAULT_WORKERS: usize = 64;

/// Configuration for the storage-backed RPC core.
///
/// Read once at construction. Every field may be omitted when deserializing,
/// and zero values are replaced by their defaults in [`Self::normalized`].
///
/// # Example
///
/// ```
/// use evmrpc_rpc_storage::StorageRpcConfig;
///
/// let config = StorageRpcConfig::default();
/// assert_eq!(config.max_blocks_for_log, 2_000);
/// assert_eq!(config.max_log_no_block, 10_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageRpcConfig {
    /// Number of workers draining the task queue.
    ///
    /// Default: `min(64, 2 * available CPUs)`.
    pub worker_pool_size: usize,

    /// Capacity of the worker task queue. Submissions beyond it are rejected.
    ///
    /// Default: `1000`.
    pub worker_queue_size: usize,

    /// Number of heights handled by a single worker task during a log scan.
    ///
    /// Default: `100`.
    pub worker_batch_size: u64,

    /// Maximum number of logs returned for a query without an explicit
    /// `fromBlock` or `toBlock`.
    ///
    /// Default: `10_000`.
    pub max_log_no_block: usize,

    /// Maximum block range per log query.
    ///
    /// Default: `2_000`.
    pub max_blocks_for_log: u64,

    /// Maximum number of simultaneous backing store reads during log scans.
    ///
    /// Default: `16`.
    pub max_db_read_concurrency: usize,

    /// Number of blocks held in the block cache.
    ///
    /// Default: `3_000`.
    pub block_cache_size: usize,

    /// Time after which a cached block is considered stale.
    ///
    /// Default: `5 minutes`.
    #[serde(deserialize_with = "duration_secs")]
    pub block_cache_ttl: Duration,

    /// Idle time after which an unpolled filter is removed.
    ///
    /// Default: `120 seconds`.
    #[serde(deserialize_with = "duration_secs")]
    pub filter_timeout: Duration,
}

impl Default for StorageRpcConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            worker_queue_size: 1_000,
            worker_batch_size: 100,
            max_log_no_block: 10_000,
            max_blocks_for_log: 2_000,
            max_db_read_concurrency: 16,
            block_cache_size: 3_000,
            block_cache_ttl: Duration::from_secs(5 * 60),
            filter_timeout: Duration::from_secs(120),
        }
    }
}

impl StorageRpcConfig {
    /// Replace zero values with their defaults.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            worker_pool_size: or_default(self.worker_pool_size, defaults.worker_pool_size),
            worker_queue_size: or_default(self.worker_queue_size, defaults.worker_queue_size),
            worker_batch_size: or_default(self.worker_batch_size, defaults.worker_batch_size),
            max_log_no_block: or_default(self.max_log_no_block, defaults.max_log_no_block),
            max_blocks_for_log: or_default(self.max_blocks_for_log, defaults.max_blocks_for_log),
            max_db_read_concurrency: or_default(
                self.max_db_read_concurrency,
                defaults.max_db_read_concurrency,
            ),
            block_cache_size: or_default(self.block_cache_size, defaults.block_cache_size),
            block_cache_ttl: if self.block_cache_ttl.is_zero() {
                defaults.block_cache_ttl
            } else {
                self.block_cache_ttl
            },
            filter_timeout: if self.filter_timeout.is_zero() {
                defaults.filter_timeout
            } else {
                self.filter_timeout
            },
        }
    }
}

fn or_default<T: Default + PartialEq>(value: T, default: T) -> T {
    if value == T::default() { default } else { value }
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .saturating_mul(2)
        .min(MAX_DEFAULT_WORKERS)
}

fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}
