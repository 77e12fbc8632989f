//! Filter kinds for polling filters.

use crate::interest::FilterOutput;
use alloy::rpc::types::Filter;

/// The different kinds of filters that can be created.
///
/// Pending transaction filters are not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InterestKind {
    /// Log filter with a user-supplied [`Filter`].
    Log(Box<Filter>),
    /// New-block filter.
    Block,
}

impl InterestKind {
    /// Fallible cast to a filter.
    pub(crate) const fn as_filter(&self) -> Option<&Filter> {
        match self {
            Self::Log(f) => Some(f),
            Self::Block => None,
        }
    }

    /// Metric label for this kind.
    pub(crate) const fn label(&self) -> &'static str {
        match self {
            Self::Log(_) => "log",
            Self::Block => "block",
        }
    }

    /// Return an empty output of the same kind as this filter.
    pub(crate) const fn empty_output(&self) -> FilterOutput {
        match self {
            Self::Log(_) => FilterOutput::Log(Vec::new()),
            Self::Block => FilterOutput::Block(Vec::new()),
        }
    }
}
