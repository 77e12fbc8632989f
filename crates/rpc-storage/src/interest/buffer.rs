//! Output of a polled filter.

use alloy::{primitives::B256, rpc::types::Log};
use serde::Serialize;

/// Output of a polled filter: log entries for log filters, block hashes for
/// block filters.
///
/// Serializes as a bare JSON array, as `eth_getFilterChanges` expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilterOutput {
    /// Log entries.
    Log(Vec<Log>),
    /// Block hashes.
    Block(Vec<B256>),
}

impl FilterOutput {
    /// True if the output contains no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events in the output.
    pub fn len(&self) -> usize {
        match self {
            Self::Log(logs) => logs.len(),
            Self::Block(hashes) => hashes.len(),
        }
    }

    /// Fallible cast to block hashes.
    pub fn as_hashes(&self) -> Option<&[B256]> {
        match self {
            Self::Block(hashes) => Some(hashes),
            Self::Log(_) => None,
        }
    }
}

impl From<Vec<B256>> for FilterOutput {
    fn from(hashes: Vec<B256>) -> Self {
        Self::Block(hashes)
    }
}

impl From<Vec<Log>> for FilterOutput {
    fn from(logs: Vec<Log>) -> Self {
        Self::Log(logs)
    }
}
