use fluvio_kv_storage::KvError;

pub type Result<T, E = CheckpointStoreError> = core::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum CheckpointStoreError {
    /// another writer won the race for this partition
    #[error("ownership of partition {partition_id} was claimed by another writer")]
    ClaimConflict { partition_id: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// store can't be reached or didn't answer in time, not retried here
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Store(KvError),
}

impl CheckpointStoreError {
    pub fn claim_conflict(partition_id: impl Into<String>) -> Self {
        Self::ClaimConflict {
            partition_id: partition_id.into(),
        }
    }

    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, Self::ClaimConflict { .. })
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<KvError> for CheckpointStoreError {
    fn from(err: KvError) -> Self {
        if err.is_unavailable() {
            Self::StoreUnavailable(err.to_string())
        } else {
            Self::Store(err)
        }
    }
}
