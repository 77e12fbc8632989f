//! ETH namespace errors and rendering helpers.

mod error;
pub use error::EthError;

pub(crate) mod helpers;
