//! Ranged log retrieval.
//!
//! A query is resolved against a fresh [`Watermarks`] window, split into
//! fixed-size batches, and each batch is run as a [`WorkerPool`] task. Within
//! a batch, every height is served from the [`BlockCache`] when possible.
//! Misses take one backing store read permit, consult the block bloom, and
//! only then fetch the block and its receipts.

use crate::{
    BlockCache, BlockCacheEntry, BloomFilter, EthError, WatermarkError, WatermarkManager,
    Watermarks, WorkerPool, eth::helpers::BlockRangeInclusiveIter, metrics,
};
use alloy::{
    eips::BlockNumberOrTag,
    primitives::{B256, Bloom},
    rpc::types::{Filter, FilterBlockOption, Log},
};
use evmrpc_storage::{BlockSource, ReceiptStore, TxDecoder, evm_tx_hashes};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Bounds applied to log queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLimits {
    /// Maximum width of a block range. Filter polls narrow open-ended ranges
    /// to this width instead.
    pub max_blocks: u64,
    /// Maximum number of logs returned for an open-ended range. `0` disables
    /// the limit.
    pub max_logs: usize,
    /// Number of heights per worker task.
    pub batch_size: u64,
}

/// How a range wider than [`LogLimits::max_blocks`], or starting past the
/// chain head, is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    /// A one-shot query. Such ranges are errors.
    Query,
    /// A filter poll. Open-ended ranges are narrowed to the most recent
    /// heights, and ranges past the head resolve to nothing.
    Poll,
}

impl RangeMode {
    const fn is_poll(self) -> bool {
        matches!(self, Self::Poll)
    }
}

/// A resolved, window-clamped range of heights to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    /// First height, inclusive.
    pub start: u64,
    /// Last height, inclusive.
    pub end: u64,
    /// True if the query omitted `fromBlock` or `toBlock`.
    pub open_ended: bool,
}

impl ScanRange {
    /// Number of heights in the range.
    pub const fn width(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// True if the log satisfies the filter's address and topic criteria. The
/// block range is not checked.
pub fn log_matches(filter: &Filter, log: &alloy::primitives::Log) -> bool {
    if !filter.address.matches(&log.address) {
        return false;
    }
    filter.topics.iter().enumerate().all(|(i, position)| {
        position.is_empty() || log.topics().get(i).is_some_and(|topic| position.matches(topic))
    })
}

struct LogFetcherInner<B, R> {
    watermarks: WatermarkManager<B, R>,
    blocks: Arc<B>,
    receipts: Arc<R>,
    decoder: Arc<dyn TxDecoder>,
    cache: Arc<BlockCache>,
    pool: Arc<WorkerPool>,
    db_permits: Semaphore,
    limits: LogLimits,
}

/// Orchestrates ranged log queries.
///
/// Cheap to clone. All clones share the cache, pool, and read permits.
pub struct LogFetcher<B, R> {
    inner: Arc<LogFetcherInner<B, R>>,
}

impl<B, R> Clone for LogFetcher<B, R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<B, R> core::fmt::Debug for LogFetcher<B, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogFetcher")
            .field("limits", &self.inner.limits)
            .field("db_permits", &self.inner.db_permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl<B, R> LogFetcher<B, R>
where
    B: BlockSource,
    R: ReceiptStore,
{
    /// Create a new log fetcher.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        watermarks: WatermarkManager<B, R>,
        blocks: Arc<B>,
        receipts: Arc<R>,
        decoder: Arc<dyn TxDecoder>,
        cache: Arc<BlockCache>,
        pool: Arc<WorkerPool>,
        max_db_reads: usize,
        limits: LogLimits,
    ) -> Self {
        let limits = LogLimits { batch_size: limits.batch_size.max(1), ..limits };
        Self {
            inner: Arc::new(LogFetcherInner {
                watermarks,
                blocks,
                receipts,
                decoder,
                cache,
                pool,
                db_permits: Semaphore::new(max_db_reads.max(1)),
                limits,
            }),
        }
    }

    /// The watermark manager used to clamp ranges.
    pub fn watermarks(&self) -> &WatermarkManager<B, R> {
        &self.inner.watermarks
    }

    /// The configured limits.
    pub fn limits(&self) -> LogLimits {
        self.inner.limits
    }

    /// Retrieve every log matching the filter.
    ///
    /// Logs are ordered by block number, then log index.
    #[instrument(skip_all, fields(filter = ?filter.block_option))]
    pub async fn get_logs(
        &self,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Log>, EthError> {
        metrics::inc_logs_requests();
        let start = Instant::now();
        let res = self
            .logs_after(filter, 0, RangeMode::Query, cancel)
            .await
            .map(|res| res.map(|(logs, _)| logs));
        metrics::record_logs_latency(start.elapsed());
        match res {
            Ok(logs) => Ok(logs.unwrap_or_default()),
            Err(err) => {
                metrics::inc_logs_errors(err.kind());
                debug!(%err, "log query failed");
                Err(err)
            }
        }
    }

    /// Retrieve matching logs at heights no lower than `cursor`.
    ///
    /// Returns `None` if there is nothing to scan at or after the cursor.
    /// Otherwise returns the logs and the scanned range.
    pub async fn logs_after(
        &self,
        filter: &Filter,
        cursor: u64,
        mode: RangeMode,
        cancel: &CancellationToken,
    ) -> Result<Option<(Vec<Log>, ScanRange)>, EthError> {
        let Some(range) = self.resolve_range(filter, cursor, mode).await? else {
            return Ok(None);
        };
        let logs = self.scan(filter, range, cancel).await?;
        Ok(Some((logs, range)))
    }

    /// Resolve the heights a filter covers, starting no lower than `cursor`.
    ///
    /// Block hash filters cover that block's height, or nothing when the hash
    /// is zero or unknown. Range filters follow `eth_getLogs` rules: a missing
    /// `fromBlock` or `toBlock` defaults to the latest height and ranges wider
    /// than the limit are rejected. In [`RangeMode::Poll`], open-ended ranges
    /// are narrowed to the limit instead, and a range starting past the chain
    /// head resolves to nothing. The result is clamped to the current window.
    /// A range lying entirely outside it is an error.
    ///
    /// Returns `None` if there is nothing at or after the cursor.
    pub async fn resolve_range(
        &self,
        filter: &Filter,
        cursor: u64,
        mode: RangeMode,
    ) -> Result<Option<ScanRange>, EthError> {
        let (from, to) = match filter.block_option {
            FilterBlockOption::AtBlockHash(hash) => return self.resolve_hash(hash, cursor).await,
            FilterBlockOption::Range { from_block, to_block } => (from_block, to_block),
        };
        let window = self.inner.watermarks.watermarks().await?;
        self.clamp_range(from, to, cursor, mode, window)
    }

    async fn resolve_hash(&self, hash: B256, cursor: u64) -> Result<Option<ScanRange>, EthError> {
        if hash.is_zero() {
            return Ok(None);
        }
        let Some(block) = self.inner.blocks.block_by_hash(hash).await? else {
            trace!(%hash, "unknown block hash, no logs");
            return Ok(None);
        };
        if block.height < cursor {
            return Ok(None);
        }
        self.inner.watermarks.ensure_height_available(block.height).await?;
        Ok(Some(ScanRange { start: block.height, end: block.height, open_ended: false }))
    }

    fn clamp_range(
        &self,
        from: Option<BlockNumberOrTag>,
        to: Option<BlockNumberOrTag>,
        cursor: u64,
        mode: RangeMode,
        window: Watermarks,
    ) -> Result<Option<ScanRange>, EthError> {
        let limits = self.inner.limits;
        let open_ended = from.is_none() || to.is_none();

        let mut begin = from.map_or(window.latest, |tag| window.resolve_tag(tag));
        let end = to.map_or(window.latest, |tag| window.resolve_tag(tag));
        if from.is_none() && begin > end {
            begin = end;
        }
        let mut resumed = false;
        if cursor > begin {
            begin = cursor;
            resumed = true;
        }

        if begin > end {
            if resumed {
                return Ok(None);
            }
            if to.is_some() {
                return Err(EthError::InvalidRange { from: begin, to: end });
            }
            // `toBlock` defaulted to the head, so `fromBlock` is past it.
        } else {
            let width = end - begin + 1;
            if width > limits.max_blocks {
                if !(open_ended && mode.is_poll()) {
                    return Err(EthError::RangeTooLarge {
                        requested: width,
                        max: limits.max_blocks,
                    });
                }
                begin = (end + 1).saturating_sub(limits.max_blocks).max(1);
            }
        }

        if begin > window.latest {
            // A poll waits for the chain to reach its range.
            if resumed || mode.is_poll() {
                return Ok(None);
            }
            return Err(WatermarkError::HeightNotYetAvailable {
                requested: begin,
                latest: window.latest,
            }
            .into());
        }
        if end < window.earliest {
            return Err(
                WatermarkError::HeightPruned { requested: end, earliest: window.earliest }.into()
            );
        }

        Ok(Some(ScanRange {
            start: begin.max(window.earliest),
            end: end.min(window.latest),
            open_ended,
        }))
    }

    /// Scan a resolved range for matching logs.
    ///
    /// Cancellation is observed between batches. If any batch fails, the
    /// batches still running are cancelled.
    pub async fn scan(
        &self,
        filter: &Filter,
        range: ScanRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<Log>, EthError> {
        let batches = cancel.child_token();
        let _guard = batches.clone().drop_guard();
        self.scan_batches(filter, range, &batches).await
    }

    async fn scan_batches(
        &self,
        filter: &Filter,
        range: ScanRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<Log>, EthError> {
        metrics::record_logs_range(range.width());
        let filter = Arc::new(filter.clone());
        let bloom = Arc::new(BloomFilter::from_filter(&filter));
        let step = self.inner.limits.batch_size - 1;

        let mut pending = Vec::new();
        for (start, end) in BlockRangeInclusiveIter::new(range.start..=range.end, step) {
            if cancel.is_cancelled() {
                return Err(EthError::Cancelled);
            }
            let this = self.clone();
            let (filter, bloom, cancel) = (Arc::clone(&filter), Arc::clone(&bloom), cancel.clone());
            let rx = self.inner.pool.submit_with_output(async move {
                this.scan_batch(start, end, &filter, &bloom, &cancel).await
            })?;
            pending.push(rx);
        }

        let mut logs = Vec::new();
        for rx in pending {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EthError::Cancelled),
                res = rx => res.map_err(|_| EthError::TaskDropped)??,
            };
            logs.extend(batch);
        }

        let max_logs = self.inner.limits.max_logs;
        if range.open_ended && max_logs > 0 && logs.len() > max_logs {
            logs.truncate(max_logs);
        }
        debug!(start = range.start, end = range.end, count = logs.len(), "scanned logs");
        Ok(logs)
    }

    async fn scan_batch(
        &self,
        start: u64,
        end: u64,
        filter: &Filter,
        bloom: &BloomFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Log>, EthError> {
        if cancel.is_cancelled() {
            return Err(EthError::Cancelled);
        }
        let window = self.inner.watermarks.watermarks().await?;
        let mut logs = Vec::new();
        for height in start..=end {
            if height == 0 {
                continue;
            }
            if !window.contains(height) {
                debug!(height, ?window, "height left the window mid-scan, skipping");
                continue;
            }
            let Some(entry) = self.entry_for_scan(height, bloom).await? else { continue };
            collect_logs(&entry, filter, bloom, &mut logs);
        }
        Ok(logs)
    }

    /// Get the entry at a height if its bloom may match.
    async fn entry_for_scan(
        &self,
        height: u64,
        bloom: &BloomFilter,
    ) -> Result<Option<Arc<BlockCacheEntry>>, EthError> {
        let may_match = |b: &Bloom| bloom.is_empty() || bloom.matches(b);

        if let Some(entry) = self.inner.cache.get(height) {
            return Ok(may_match(entry.bloom()).then_some(entry));
        }

        let waited = Instant::now();
        // The semaphore is never closed.
        let _permit = self.inner.db_permits.acquire().await.map_err(|_| EthError::Cancelled)?;
        metrics::record_db_permit_wait(waited.elapsed());

        if let Some(entry) = self.inner.cache.get(height) {
            return Ok(may_match(entry.bloom()).then_some(entry));
        }

        let block_bloom = self.inner.receipts.block_bloom(height).await?;
        if let Some(b) = &block_bloom
            && !may_match(b)
        {
            return Ok(None);
        }

        let entry = self.load_entry(height, block_bloom).await?;
        if entry.is_none() {
            warn!(height, "block missing from source within window, skipping");
        }
        Ok(entry)
    }

    /// Get the entry at a height, from the cache or the backing stores.
    pub(crate) async fn block_entry(
        &self,
        height: u64,
    ) -> Result<Option<Arc<BlockCacheEntry>>, EthError> {
        if let Some(entry) = self.inner.cache.get(height) {
            return Ok(Some(entry));
        }
        let _permit = self.inner.db_permits.acquire().await.map_err(|_| EthError::Cancelled)?;
        if let Some(entry) = self.inner.cache.get(height) {
            return Ok(Some(entry));
        }
        let bloom = self.inner.receipts.block_bloom(height).await?;
        self.load_entry(height, bloom).await
    }

    /// Fetch a block and its receipts, and cache the result.
    async fn load_entry(
        &self,
        height: u64,
        bloom: Option<Bloom>,
    ) -> Result<Option<Arc<BlockCacheEntry>>, EthError> {
        let Some(block) = self.inner.blocks.block(Some(height)).await? else {
            return Ok(None);
        };
        let evm_txs = evm_tx_hashes(&self.inner.decoder, &block.txs)?;

        let mut receipts = HashMap::with_capacity(evm_txs.len());
        for hash in &evm_txs {
            match self.inner.receipts.get_receipt(*hash).await? {
                Some(receipt) => {
                    receipts.insert(*hash, receipt);
                }
                None => trace!(height, tx = %hash, "no receipt for evm transaction"),
            }
        }

        let bloom = bloom.unwrap_or_else(|| {
            receipts.values().fold(Bloom::default(), |mut acc, r| {
                acc.accrue_bloom(&r.logs_bloom);
                acc
            })
        });
        let entry = Arc::new(BlockCacheEntry::new(block, bloom, evm_txs, receipts));
        self.inner.cache.insert(height, Arc::clone(&entry));
        Ok(Some(entry))
    }
}

/// Append the block's logs matching the filter.
///
/// Log indexes count every log in the block. Transaction indexes count EVM
/// transactions with a receipt.
fn collect_logs(entry: &BlockCacheEntry, filter: &Filter, bloom: &BloomFilter, out: &mut Vec<Log>) {
    let block = entry.block();
    let mut log_index = 0u64;
    for (tx_index, receipt) in entry.receipts_in_order().enumerate() {
        if bloom.is_empty() || bloom.matches(&receipt.logs_bloom) {
            for (offset, log) in receipt.logs.iter().enumerate() {
                if !log_matches(filter, log) {
                    continue;
                }
                out.push(Log {
                    inner: log.clone(),
                    block_hash: Some(block.hash),
                    block_number: Some(block.height),
                    block_timestamp: Some(block.timestamp),
                    transaction_hash: Some(receipt.tx_hash),
                    transaction_index: Some(tx_index as u64),
                    log_index: Some(log_index + offset as u64),
                    removed: false,
                });
            }
        }
        log_index += receipt.log_count() as u64;
    }
}
