//! Queryable height window and [`BlockId`] resolution.
//!
//! [`WatermarkManager`] aggregates the availability readings of every
//! configured backing store into one `[earliest, latest]` window. The window
//! is re-derived on every call and never cached, so a caller never observes a
//! window older than its own request.

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::B256,
};
use evmrpc_storage::{BlockSource, ReceiptStore, StateStore, StoreError};
use std::sync::Arc;
use tracing::trace;

/// Error computing or checking against the queryable window.
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    /// No backing store is configured.
    #[error("no height source available")]
    NoHeightSource,
    /// The requested height is above the latest available height.
    #[error("requested height {requested} is not yet available, latest is {latest}")]
    HeightNotYetAvailable {
        /// The requested height.
        requested: u64,
        /// The latest available height.
        latest: u64,
    },
    /// The requested height is below the earliest available height.
    #[error("requested height {requested} has been pruned, earliest is {earliest}")]
    HeightPruned {
        /// The requested height.
        requested: u64,
        /// The earliest available height.
        earliest: u64,
    },
    /// The aggregated readings do not form a window.
    #[error("invalid height window: earliest {earliest} is above latest {latest}")]
    InvalidWindow {
        /// Aggregated earliest height.
        earliest: u64,
        /// Aggregated latest height.
        latest: u64,
    },
    /// The receipt store pruned past the block and state stores.
    #[error("receipts pruned up to {receipts}, ahead of earliest height {earliest}")]
    ReceiptsPrunedAhead {
        /// Earliest height reported by the receipt store.
        receipts: u64,
        /// Aggregated earliest height of the block and state stores.
        earliest: u64,
    },
    /// Block hash not found.
    #[error("block hash not found: {0}")]
    BlockHashNotFound(B256),
    /// Backing store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An inclusive `[earliest, latest]` window of queryable heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// Lowest fully available height.
    pub earliest: u64,
    /// Highest fully available height.
    pub latest: u64,
}

impl Watermarks {
    /// True if the height lies within the window.
    pub const fn contains(&self, height: u64) -> bool {
        self.earliest <= height && height <= self.latest
    }

    /// Check that the height lies within the window.
    pub const fn check(&self, height: u64) -> Result<(), WatermarkError> {
        if height > self.latest {
            return Err(WatermarkError::HeightNotYetAvailable {
                requested: height,
                latest: self.latest,
            });
        }
        if height < self.earliest {
            return Err(WatermarkError::HeightPruned { requested: height, earliest: self.earliest });
        }
        Ok(())
    }

    /// Resolve a tag against this window without bounds-checking numbers.
    ///
    /// - `Latest` / `Safe` / `Finalized` / `Pending` → `latest`
    /// - `Earliest` → `earliest`
    /// - `Number(n)` → `n`
    pub const fn resolve_tag(&self, tag: BlockNumberOrTag) -> u64 {
        match tag {
            BlockNumberOrTag::Latest
            | BlockNumberOrTag::Safe
            | BlockNumberOrTag::Finalized
            | BlockNumberOrTag::Pending => self.latest,
            BlockNumberOrTag::Earliest => self.earliest,
            BlockNumberOrTag::Number(n) => n,
        }
    }
}

/// Aggregates store readings into a single queryable window.
///
/// Sources are optional and attached with the `with_*` builders:
///
/// - the block source contributes `(earliest, latest)` from its sync status;
/// - the historical state store contributes `(earliest, latest)` versions,
///   and the commit multistore stands in for it when it is absent;
/// - the receipt store contributes `latest` only.
///
/// `latest` is the minimum of all latest readings and `earliest` the maximum
/// of the block and state earliest readings.
///
/// # Example
///
/// ```ignore
/// let watermarks = WatermarkManager::new()
///     .with_block_source(blocks)
///     .with_state_store(state)
///     .with_receipt_store(receipts);
/// let height = watermarks.resolve_height(BlockId::latest()).await?;
/// ```
pub struct WatermarkManager<B, R> {
    blocks: Option<Arc<B>>,
    state: Option<Arc<dyn StateStore>>,
    commit: Option<Arc<dyn StateStore>>,
    receipts: Option<Arc<R>>,
}

impl<B, R> core::fmt::Debug for WatermarkManager<B, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WatermarkManager")
            .field("blocks", &self.blocks.is_some())
            .field("state", &self.state.is_some())
            .field("commit", &self.commit.is_some())
            .field("receipts", &self.receipts.is_some())
            .finish()
    }
}

impl<B, R> Default for WatermarkManager<B, R> {
    fn default() -> Self {
        Self { blocks: None, state: None, commit: None, receipts: None }
    }
}

impl<B, R> Clone for WatermarkManager<B, R> {
    fn clone(&self) -> Self {
        Self {
            blocks: self.blocks.clone(),
            state: self.state.clone(),
            commit: self.commit.clone(),
            receipts: self.receipts.clone(),
        }
    }
}

impl<B, R> WatermarkManager<B, R>
where
    B: BlockSource,
    R: ReceiptStore,
{
    /// Create a manager with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the consensus block source.
    pub fn with_block_source(mut self, blocks: Arc<B>) -> Self {
        self.blocks = Some(blocks);
        self
    }

    /// Attach the historical state store.
    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Attach the commit multistore, used when no historical state store is
    /// attached.
    pub fn with_commit_store(mut self, commit: Arc<dyn StateStore>) -> Self {
        self.commit = Some(commit);
        self
    }

    /// Attach the receipt store.
    pub fn with_receipt_store(mut self, receipts: Arc<R>) -> Self {
        self.receipts = Some(receipts);
        self
    }

    /// Compute the current window.
    pub async fn watermarks(&self) -> Result<Watermarks, WatermarkError> {
        let mut earliest: Option<u64> = None;
        let mut latest: Option<u64> = None;

        let mut block_reading = None;
        if let Some(blocks) = &self.blocks {
            let status = blocks.status().await?;
            let earliest_blocks = match status.earliest_height {
                0 => blocks.genesis().await?,
                h => h,
            };
            earliest = Some(earliest_blocks);
            latest = Some(status.latest_height);
            block_reading = Some((earliest_blocks, status.latest_height));
        }

        let mut state_reading = None;
        if let Some(state) = self.state.as_ref().or(self.commit.as_ref()) {
            let (e, l) = (state.earliest_version()?, state.latest_version()?);
            earliest = Some(earliest.map_or(e, |cur| cur.max(e)));
            latest = Some(latest.map_or(l, |cur| cur.min(l)));
            state_reading = Some((e, l));
        }

        let mut receipts_latest = None;
        if let Some(receipts) = &self.receipts
            && let Some(l) = receipts.latest_version().await?
        {
            latest = Some(latest.map_or(l, |cur| cur.min(l)));
            receipts_latest = Some(l);
        }

        trace!(
            ?block_reading,
            ?state_reading,
            ?receipts_latest,
            ?earliest,
            ?latest,
            "computed watermarks"
        );

        let (Some(earliest), Some(latest)) = (earliest, latest) else {
            return Err(WatermarkError::NoHeightSource);
        };

        if let Some(receipts) = &self.receipts
            && let Some(receipts_earliest) = receipts.earliest_version().await?
            && receipts_earliest > earliest
        {
            return Err(WatermarkError::ReceiptsPrunedAhead { receipts: receipts_earliest, earliest });
        }

        if earliest > latest {
            return Err(WatermarkError::InvalidWindow { earliest, latest });
        }

        Ok(Watermarks { earliest, latest })
    }

    /// The latest queryable height.
    pub async fn block_number(&self) -> Result<u64, WatermarkError> {
        self.watermarks().await.map(|w| w.latest)
    }

    /// Resolve a [`BlockId`] to an available height.
    ///
    /// - `Latest` / `Safe` / `Finalized` / `Pending` → the window's latest
    /// - `Earliest` → the window's earliest
    /// - `Number(n)` → `n`, bounds-checked
    /// - `Hash(h)` → block source lookup, bounds-checked
    pub async fn resolve_height(&self, id: BlockId) -> Result<u64, WatermarkError> {
        match id {
            BlockId::Number(tag) => {
                let window = self.watermarks().await?;
                let height = window.resolve_tag(tag);
                window.check(height)?;
                Ok(height)
            }
            BlockId::Hash(h) => {
                let blocks = self.blocks.as_ref().ok_or(WatermarkError::NoHeightSource)?;
                let block = blocks
                    .block_by_hash(h.block_hash)
                    .await?
                    .ok_or(WatermarkError::BlockHashNotFound(h.block_hash))?;
                self.ensure_height_available(block.height).await?;
                Ok(block.height)
            }
        }
    }

    /// Check that the height lies within the current window.
    pub async fn ensure_height_available(&self, height: u64) -> Result<(), WatermarkError> {
        self.watermarks().await?.check(height)
    }
}
