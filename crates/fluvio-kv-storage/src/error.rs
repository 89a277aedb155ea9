use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum KvError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("store error: {0}")]
    Other(String),
}

impl KvError {
    /// true if the store could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::PoolClosed
        )
    }
}
