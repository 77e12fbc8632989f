//! Polling filters for `eth_newFilter`, `eth_newBlockFilter` and friends.

mod buffer;
pub use buffer::FilterOutput;
mod filters;
pub use filters::{FilterId, FilterRegistry};
mod kind;
pub(crate) use kind::InterestKind;
