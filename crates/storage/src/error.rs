/// Error type for backing store reads.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Boxed error. Indicates an issue with the store backend.
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// Decoding error. Indicates stored bytes could not be interpreted.
    #[error("decode error: {0}")]
    Decode(String),

    /// The store is not reachable, e.g. the node has not finished starting.
    #[error("store unavailable: {0}")]
    Unavailable(&'static str),
}

impl StoreError {
    /// Helper to create a `StoreError::Backend` from any error.
    pub fn from_err<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

impl From<alloy::eips::eip2718::Eip2718Error> for StoreError {
    fn from(err: alloy::eips::eip2718::Eip2718Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type for backing store reads.
pub type StoreResult<T> = Result<T, StoreError>;
