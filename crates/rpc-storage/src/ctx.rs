//! RPC context tying the watermark manager, log fetcher, filter registry and
//! worker pool to a set of backing stores.

use crate::{
    BlockCache, BlockCacheEntry, EthError, FilterId, FilterOutput, FilterRegistry, LogFetcher,
    LogLimits, PoolError, PoolStats, StorageRpcConfig, WatermarkManager, WorkerPool,
    eth::helpers::{build_rpc_block, build_rpc_receipts, evm_tx_count},
};
use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{B256, U64},
    rpc::types::{Block, Filter, Log, TransactionReceipt},
};
use evmrpc_storage::{BlockSource, ReceiptStore, StateStore, TxDecoder};
use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Query surface of the storage-backed RPC core.
///
/// Every block read is checked against a freshly computed watermark window.
/// Block rendering runs on the worker pool, and log scans split their work
/// into pool tasks.
///
/// # Construction
///
/// ```ignore
/// let ctx = RpcCtx::new(config, blocks, receipts, Some(state), None, Arc::new(Eip2718Decoder));
/// ```
pub struct RpcCtx<B, R> {
    inner: Arc<RpcCtxInner<B, R>>,
}

impl<B, R> Clone for RpcCtx<B, R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B, R> core::fmt::Debug for RpcCtx<B, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RpcCtx")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("filters", &self.inner.filters)
            .finish_non_exhaustive()
    }
}

struct RpcCtxInner<B, R> {
    config: StorageRpcConfig,
    blocks: Arc<B>,
    decoder: Arc<dyn TxDecoder>,
    watermarks: WatermarkManager<B, R>,
    fetcher: LogFetcher<B, R>,
    filters: FilterRegistry<B, R>,
    pool: Arc<WorkerPool>,
}

impl<B, R> RpcCtx<B, R>
where
    B: BlockSource,
    R: ReceiptStore,
{
    /// Create a new context.
    ///
    /// `state` is the historical state store, and `commit` the commit
    /// multistore used when no historical store is available. Zero values in
    /// `config` are replaced by their defaults.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(
        config: StorageRpcConfig,
        blocks: Arc<B>,
        receipts: Arc<R>,
        state: Option<Arc<dyn StateStore>>,
        commit: Option<Arc<dyn StateStore>>,
        decoder: Arc<dyn TxDecoder>,
    ) -> Self {
        let config = config.normalized();

        let mut watermarks = WatermarkManager::new()
            .with_block_source(Arc::clone(&blocks))
            .with_receipt_store(Arc::clone(&receipts));
        if let Some(state) = state {
            watermarks = watermarks.with_state_store(state);
        }
        if let Some(commit) = commit {
            watermarks = watermarks.with_commit_store(commit);
        }

        let pool = Arc::new(WorkerPool::new(config.worker_pool_size, config.worker_queue_size));
        let cache = Arc::new(BlockCache::new(config.block_cache_size, config.block_cache_ttl));
        let limits = LogLimits {
            max_blocks: config.max_blocks_for_log,
            max_logs: config.max_log_no_block,
            batch_size: config.worker_batch_size,
        };
        let fetcher = LogFetcher::new(
            watermarks.clone(),
            Arc::clone(&blocks),
            receipts,
            Arc::clone(&decoder),
            cache,
            Arc::clone(&pool),
            config.max_db_read_concurrency,
            limits,
        );
        let filters = FilterRegistry::new(fetcher.clone(), config.filter_timeout);

        debug!(?config, "rpc context ready");
        Self {
            inner: Arc::new(RpcCtxInner {
                config,
                blocks,
                decoder,
                watermarks,
                fetcher,
                filters,
                pool,
            }),
        }
    }

    /// The normalized configuration.
    pub fn config(&self) -> &StorageRpcConfig {
        &self.inner.config
    }

    /// The watermark manager.
    pub fn watermarks(&self) -> &WatermarkManager<B, R> {
        &self.inner.watermarks
    }

    /// The log fetcher.
    pub fn fetcher(&self) -> &LogFetcher<B, R> {
        &self.inner.fetcher
    }

    /// The filter registry.
    pub fn filters(&self) -> &FilterRegistry<B, R> {
        &self.inner.filters
    }

    /// Latest height that is safe to read.
    pub async fn block_number(&self) -> Result<U64, EthError> {
        Ok(U64::from(self.inner.watermarks.block_number().await?))
    }

    /// Get a block by number or tag. Returns `None` if the source does not
    /// have the block.
    #[instrument(skip(self))]
    pub async fn block_by_number(
        &self,
        tag: BlockNumberOrTag,
        full: bool,
    ) -> Result<Option<Block>, EthError> {
        self.block(BlockId::Number(tag), full).await
    }

    /// Get a block by hash. Returns `None` if the hash is unknown.
    #[instrument(skip(self))]
    pub async fn block_by_hash(&self, hash: B256, full: bool) -> Result<Option<Block>, EthError> {
        self.block(BlockId::from(hash), full).await
    }

    /// Number of EVM transactions in a block.
    pub async fn block_transaction_count(&self, id: BlockId) -> Result<Option<U64>, EthError> {
        let this = self.clone();
        self.run(async move {
            let entry = this.entry_for(id).await?;
            Ok(entry.map(|entry| U64::from(evm_tx_count(&entry) as u64)))
        })
        .await
    }

    /// Receipts of a block's EVM transactions, in block order. Returns `None`
    /// if the block is unknown.
    pub async fn block_receipts(
        &self,
        id: BlockId,
    ) -> Result<Option<Vec<TransactionReceipt>>, EthError> {
        let this = self.clone();
        self.run(async move {
            let entry = this.entry_for(id).await?;
            Ok(entry.map(|entry| build_rpc_receipts(&entry)))
        })
        .await
    }

    /// Retrieve every log matching the filter.
    pub async fn get_logs(
        &self,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Log>, EthError> {
        self.inner.fetcher.get_logs(filter, cancel).await
    }

    /// Install a log filter.
    pub fn new_filter(&self, filter: Filter) -> Result<FilterId, EthError> {
        self.inner.filters.new_filter(filter)
    }

    /// Install a block filter.
    pub async fn new_block_filter(&self) -> Result<FilterId, EthError> {
        self.inner.filters.new_block_filter().await
    }

    /// Poll a filter for changes since its last poll.
    pub async fn get_filter_changes(
        &self,
        id: FilterId,
        cancel: &CancellationToken,
    ) -> Result<FilterOutput, EthError> {
        self.inner.filters.get_filter_changes(id, cancel).await
    }

    /// Replay every log a filter matches.
    pub async fn get_filter_logs(
        &self,
        id: FilterId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Log>, EthError> {
        self.inner.filters.get_filter_logs(id, cancel).await
    }

    /// Remove a filter. Returns `false` if it was not installed.
    pub fn uninstall_filter(&self, id: FilterId) -> bool {
        self.inner.filters.uninstall_filter(id)
    }

    /// Submit background work to the worker pool without waiting.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.pool.submit(task)
    }

    /// Snapshot of the worker pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Stop accepting work and wait for queued tasks to finish.
    pub async fn shutdown(&self) {
        self.inner.pool.close().await;
    }

    async fn block(&self, id: BlockId, full: bool) -> Result<Option<Block>, EthError> {
        let this = self.clone();
        self.run(async move {
            let Some(entry) = this.entry_for(id).await? else {
                return Ok(None);
            };
            Ok(Some(build_rpc_block(&entry, &this.inner.decoder, full)?))
        })
        .await
    }

    /// Resolve a block ID within the window and load its entry.
    async fn entry_for(&self, id: BlockId) -> Result<Option<Arc<BlockCacheEntry>>, EthError> {
        let height = match id {
            BlockId::Hash(hash) => {
                let Some(block) = self.inner.blocks.block_by_hash(hash.block_hash).await? else {
                    return Ok(None);
                };
                self.inner.watermarks.ensure_height_available(block.height).await?;
                block.height
            }
            BlockId::Number(_) => self.inner.watermarks.resolve_height(id).await?,
        };
        self.inner.fetcher.block_entry(height).await
    }

    /// Run a request on the worker pool and wait for its result.
    async fn run<F, T>(&self, fut: F) -> Result<T, EthError>
    where
        F: Future<Output = Result<T, EthError>> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.pool.submit_with_output(fut)?.await.map_err(|_| EthError::TaskDropped)?
    }
}
