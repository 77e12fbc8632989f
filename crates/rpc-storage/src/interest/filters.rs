//! Filter management for `eth_newFilter` / `eth_getFilterChanges`.

use crate::{
    EthError, LogFetcher, RangeMode, ScanRange,
    eth::helpers::block_hash,
    interest::{FilterOutput, InterestKind},
    metrics,
};
use alloy::{
    eips::BlockNumberOrTag,
    primitives::{B256, U64},
    rpc::types::{Filter, FilterBlockOption, Log},
};
use dashmap::DashMap;
use evmrpc_storage::{BlockSource, ReceiptStore};
use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

/// Identifier of an installed filter.
pub type FilterId = U64;

/// An active filter.
///
/// Records the filter details, the [`Instant`] at which the filter was last
/// polled, and the first height whose contents have not been delivered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActiveFilter {
    cursor: u64,
    last_poll_time: Instant,
    kind: InterestKind,
}

impl ActiveFilter {
    fn new(cursor: u64, kind: InterestKind) -> Self {
        Self { cursor, last_poll_time: Instant::now(), kind }
    }

    /// Get the duration since the filter was last polled.
    fn time_since_last_poll(&self) -> Duration {
        self.last_poll_time.elapsed()
    }
}

/// Filter table shared between a [`FilterRegistry`] and its sweeper.
#[derive(Debug)]
pub(crate) struct FilterTable {
    current_id: AtomicU64,
    filters: DashMap<FilterId, ActiveFilter>,
    timeout: Duration,
}

impl FilterTable {
    fn new(timeout: Duration) -> Self {
        // Start from 1, as 0 is weird in quantity encoding.
        Self { current_id: AtomicU64::new(1), filters: DashMap::new(), timeout }
    }

    fn next_id(&self) -> FilterId {
        FilterId::from(self.current_id.fetch_add(1, Ordering::Relaxed))
    }

    fn install(&self, cursor: u64, kind: InterestKind) -> FilterId {
        let id = self.next_id();
        metrics::inc_filters_installed(kind.label());
        debug!(%id, cursor, kind = kind.label(), "installed filter");
        self.filters.insert(id, ActiveFilter::new(cursor, kind));
        id
    }

    fn is_expired(&self, filter: &ActiveFilter) -> bool {
        filter.time_since_last_poll() > self.timeout
    }

    /// Look up a filter and mark it as polled.
    ///
    /// Returns the cursor and kind. A filter idle for longer than the timeout
    /// is removed and reported as not found.
    fn touch(&self, id: FilterId) -> Result<(u64, InterestKind), EthError> {
        match self.filters.get_mut(&id) {
            None => return Err(EthError::FilterNotFound),
            Some(mut filter) if !self.is_expired(&filter) => {
                filter.last_poll_time = Instant::now();
                return Ok((filter.cursor, filter.kind.clone()));
            }
            Some(_) => {}
        }

        // The guard is released above, so removing here cannot deadlock.
        if self.filters.remove_if(&id, |_, f| self.is_expired(f)).is_some() {
            metrics::inc_filters_expired(1);
            debug!(%id, "filter expired on lookup");
        }
        Err(EthError::FilterNotFound)
    }

    /// Move the cursor from `from` to `next` if no other poller has moved it.
    fn claim(&self, id: FilterId, from: u64, next: u64) -> Result<bool, EthError> {
        let mut filter = self.filters.get_mut(&id).ok_or(EthError::FilterNotFound)?;
        if filter.cursor != from {
            return Ok(false);
        }
        filter.cursor = next;
        Ok(true)
    }

    /// Undo a claim, unless a later poller has already claimed past it.
    fn release(&self, id: FilterId, from: u64, next: u64) {
        if let Some(mut filter) = self.filters.get_mut(&id)
            && filter.cursor == next
        {
            filter.cursor = from;
        }
    }

    fn uninstall(&self, id: FilterId) -> bool {
        self.filters.remove(&id).is_some()
    }

    fn cursor(&self, id: FilterId) -> Option<u64> {
        self.filters.get(&id).map(|f| f.cursor)
    }

    /// Remove filters that have not been polled within the timeout.
    fn clean_stale(&self) -> usize {
        let before = self.filters.len();
        self.filters.retain(|_, filter| !self.is_expired(filter));
        let removed = before.saturating_sub(self.filters.len());
        if removed > 0 {
            metrics::inc_filters_expired(removed as u64);
        }
        removed
    }
}

/// Registry of installed polling filters.
///
/// Filters are stored in a [`DashMap`] that maps filter IDs to active
/// filters. IDs are assigned sequentially, starting from 1.
///
/// Each filter carries a cursor, the first height not yet delivered. A poll
/// claims the heights it is about to return by moving the cursor before it
/// reads anything, so concurrent polls of one filter never return the same
/// item twice. If the read fails, the claim is released.
///
/// Calling [`Self::new`] spawns a thread that removes filters idle for longer
/// than the timeout, checking every half timeout. Lookups also treat idle
/// filters as gone. The thread exits once every clone of the registry has
/// been dropped.
pub struct FilterRegistry<B, R> {
    table: Arc<FilterTable>,
    fetcher: LogFetcher<B, R>,
}

impl<B, R> Clone for FilterRegistry<B, R> {
    fn clone(&self) -> Self {
        Self { table: Arc::clone(&self.table), fetcher: self.fetcher.clone() }
    }
}

impl<B, R> core::fmt::Debug for FilterRegistry<B, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.table.filters.len())
            .field("timeout", &self.table.timeout)
            .finish_non_exhaustive()
    }
}

impl<B, R> FilterRegistry<B, R>
where
    B: BlockSource,
    R: ReceiptStore,
{
    /// Create a new registry and spawn its sweeper thread.
    pub fn new(fetcher: LogFetcher<B, R>, timeout: Duration) -> Self {
        let table = Arc::new(FilterTable::new(timeout));
        let sleep = (timeout / 2).max(Duration::from_millis(1));
        FilterCleanTask::new(Arc::downgrade(&table), sleep).spawn();
        Self { table, fetcher }
    }

    /// Install a log filter.
    ///
    /// Fails if both range bounds are numbers and `fromBlock` is after
    /// `toBlock`.
    pub fn new_filter(&self, filter: Filter) -> Result<FilterId, EthError> {
        if let FilterBlockOption::Range {
            from_block: Some(BlockNumberOrTag::Number(from)),
            to_block: Some(BlockNumberOrTag::Number(to)),
        } = filter.block_option
            && from > to
        {
            return Err(EthError::InvalidRange { from, to });
        }
        Ok(self.table.install(0, InterestKind::Log(Box::new(filter))))
    }

    /// Install a block filter. It reports blocks after the current latest
    /// height.
    pub async fn new_block_filter(&self) -> Result<FilterId, EthError> {
        let latest = self.fetcher.watermarks().block_number().await?;
        Ok(self.table.install(latest + 1, InterestKind::Block))
    }

    /// Return what the filter matched since its last poll, and advance it.
    ///
    /// Log filters return logs, block filters return block hashes.
    #[instrument(skip(self, cancel))]
    pub async fn get_filter_changes(
        &self,
        id: FilterId,
        cancel: &CancellationToken,
    ) -> Result<FilterOutput, EthError> {
        loop {
            let (cursor, kind) = self.table.touch(id)?;

            let range = match kind.as_filter() {
                Some(filter) => self.fetcher.resolve_range(filter, cursor, RangeMode::Poll).await?,
                None => self.block_range(cursor).await?,
            };
            let Some(range) = range else {
                trace!(cursor, "no new heights");
                return Ok(kind.empty_output());
            };

            let next = range.end + 1;
            if !self.table.claim(id, cursor, next)? {
                trace!(cursor, "cursor moved by a concurrent poll, retrying");
                continue;
            }

            let res = match kind.as_filter() {
                Some(filter) => self.fetcher.scan(filter, range, cancel).await.map(FilterOutput::from),
                None => self.block_hashes(range, cancel).await.map(FilterOutput::from),
            };
            return match res {
                Ok(out) => {
                    debug!(start = range.start, end = range.end, count = out.len(), "polled filter");
                    Ok(out)
                }
                Err(err) => {
                    self.table.release(id, cursor, next);
                    debug!(%err, cursor, "filter poll failed, released claim");
                    Err(err)
                }
            };
        }
    }

    /// Return every log the filter matches over its full range. The cursor
    /// is left untouched.
    ///
    /// Block filters have no logs, and return an empty list.
    #[instrument(skip(self, cancel))]
    pub async fn get_filter_logs(
        &self,
        id: FilterId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Log>, EthError> {
        let (_, kind) = self.table.touch(id)?;
        let Some(filter) = kind.as_filter() else {
            return Ok(Vec::new());
        };
        let logs = self.fetcher.logs_after(filter, 0, RangeMode::Query, cancel).await?;
        Ok(logs.map(|(logs, _)| logs).unwrap_or_default())
    }

    /// Remove a filter. Returns `false` if it was not installed.
    pub fn uninstall_filter(&self, id: FilterId) -> bool {
        let removed = self.table.uninstall(id);
        if removed {
            metrics::inc_filters_uninstalled();
            debug!(%id, "uninstalled filter");
        }
        removed
    }

    /// Remove every filter idle for longer than the timeout, returning how
    /// many were removed.
    pub fn clean_stale(&self) -> usize {
        self.table.clean_stale()
    }

    /// The cursor of an installed filter.
    pub fn cursor(&self, id: FilterId) -> Option<u64> {
        self.table.cursor(id)
    }

    /// Number of installed filters.
    pub fn len(&self) -> usize {
        self.table.filters.len()
    }

    /// True if no filters are installed.
    pub fn is_empty(&self) -> bool {
        self.table.filters.is_empty()
    }

    /// Heights a block filter should report next, at most one log range
    /// wide.
    async fn block_range(&self, cursor: u64) -> Result<Option<ScanRange>, EthError> {
        let window = self.fetcher.watermarks().watermarks().await?;
        let start = cursor.max(window.earliest);
        if start > window.latest {
            return Ok(None);
        }
        let width = self.fetcher.limits().max_blocks.max(1);
        let end = window.latest.min(start.saturating_add(width - 1));
        Ok(Some(ScanRange { start, end, open_ended: true }))
    }

    async fn block_hashes(
        &self,
        range: ScanRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<B256>, EthError> {
        let mut hashes = Vec::new();
        for height in range.start..=range.end {
            if cancel.is_cancelled() {
                return Err(EthError::Cancelled);
            }
            match self.fetcher.block_entry(height).await? {
                Some(entry) => hashes.push(block_hash(&entry)),
                None => debug!(height, "block missing from source, skipping"),
            }
        }
        Ok(hashes)
    }
}

/// Task to clean up unpolled filters.
///
/// This task runs on a separate thread to avoid [`DashMap::retain`] deadlocks.
#[derive(Debug)]
struct FilterCleanTask {
    table: Weak<FilterTable>,
    sleep: Duration,
}

impl FilterCleanTask {
    /// Create a new filter cleaner task.
    const fn new(table: Weak<FilterTable>, sleep: Duration) -> Self {
        Self { table, sleep }
    }

    /// Run the task. This task runs on a separate thread, which ensures that
    /// [`DashMap::retain`]'s deadlock condition is not met. See [`DashMap`]
    /// documentation for more information.
    fn spawn(self) {
        std::thread::spawn(move || {
            loop {
                std::thread::sleep(self.sleep);
                let Some(table) = self.table.upgrade() else { break };
                let removed = table.clean_stale();
                trace!(removed, "cleaned stale filters");
            }
        });
    }
}


// Some code in this file has been copied and modified from reth
// <https://github.com/paradigmxyz/reth>
// The original license is included below:
//
// The MIT License (MIT)
//
// Copyright (c) 2022-2025 Reth Contributors
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.
