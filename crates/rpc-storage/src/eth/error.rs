//! Error types for the storage-backed ETH RPC.

use crate::{PoolError, WatermarkError};
use evmrpc_storage::StoreError;

/// Errors from the storage-backed ETH RPC.
#[derive(Debug, thiserror::Error)]
pub enum EthError {
    /// Height window error.
    #[error(transparent)]
    Watermark(#[from] WatermarkError),
    /// Backing store error.
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    /// Worker pool backpressure.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Bounded block range exceeds the configured maximum.
    #[error("block range too large ({requested}), maximum allowed is {max} blocks")]
    RangeTooLarge {
        /// Width of the requested range.
        requested: u64,
        /// Configured maximum width.
        max: u64,
    },
    /// Range start is after range end.
    #[error("fromBlock {from} is after toBlock {to}")]
    InvalidRange {
        /// Range start.
        from: u64,
        /// Range end.
        to: u64,
    },
    /// Unknown or expired filter ID.
    #[error("filter not found")]
    FilterNotFound,
    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,
    /// A pool task ended without reporting a result.
    #[error("task panicked or cancelled")]
    TaskDropped,
}

impl EthError {
    /// Convert the error to a string for JSON-RPC responses.
    pub fn into_string(self) -> String {
        self.to_string()
    }

    /// A short label naming the error kind, for metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Watermark(WatermarkError::HeightNotYetAvailable { .. }) => "not_yet_available",
            Self::Watermark(WatermarkError::HeightPruned { .. }) => "pruned",
            Self::Watermark(WatermarkError::Store(_)) | Self::Store(_) => "store",
            Self::Watermark(_) => "watermark",
            Self::Pool(PoolError::QueueFull) => "queue_full",
            Self::Pool(PoolError::PoolClosing) => "pool_closing",
            Self::RangeTooLarge { .. } => "range_too_large",
            Self::InvalidRange { .. } => "invalid_range",
            Self::FilterNotFound => "filter_not_found",
            Self::Cancelled => "cancelled",
            Self::TaskDropped => "task_dropped",
        }
    }
}
