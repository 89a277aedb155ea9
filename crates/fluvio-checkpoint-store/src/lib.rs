//! Partition ownership and checkpoint store for consumer groups.
//!
//! Consumers of a partitioned stream use [`CheckpointStore`] to agree on
//! which of them reads each partition and to remember how far each
//! partition has been processed. Records live in a key value store that
//! supports field watches and transactions, see [`fluvio_kv_storage`].

mod claim;
mod codec;
mod config;
mod error;
mod key;
mod model;
mod recorder;
mod store;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use fluvio_kv_storage::KvConnector;

pub use codec::{JsonCodec, RecordCodec};
pub use config::{CheckpointStoreConfig, CheckpointStoreConfigBuilder, ConfigError};
pub use error::{CheckpointStoreError, Result};
pub use key::{CHECKPOINT_FIELD, KEY_DELIMITER, OWNERSHIP_FIELD, partition_key, prefix_key};
pub use model::{Checkpoint, PartitionOwnership};
pub use store::KvCheckpointStore;

/// Ownership claims and checkpoints of consumer groups
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Attempt to claim each requested partition.
    ///
    /// Claims are independent: the stream yields one item per request, either
    /// the ownership as stored (with fresh `last_modified_time` and `etag`)
    /// or the error for that partition. A lost race is a `ClaimConflict`.
    fn claim_ownership(
        &self,
        requested: Vec<PartitionOwnership>,
    ) -> BoxStream<'_, Result<PartitionOwnership>>;

    /// all ownership records of a consumer group, in no particular order
    fn list_ownership(
        &self,
        namespace: &str,
        stream: &str,
        consumer_group: &str,
    ) -> BoxStream<'_, Result<PartitionOwnership>>;

    /// all checkpoints of a consumer group, in no particular order
    fn list_checkpoints(
        &self,
        namespace: &str,
        stream: &str,
        consumer_group: &str,
    ) -> BoxStream<'_, Result<Checkpoint>>;

    /// Overwrite the checkpoint of a partition.
    /// Fails with `InvalidArgument` before touching the store if it carries no position.
    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
}

#[async_trait]
impl<C, S> CheckpointStore for KvCheckpointStore<C, S>
where
    C: KvConnector,
    S: RecordCodec,
{
    fn claim_ownership(
        &self,
        requested: Vec<PartitionOwnership>,
    ) -> BoxStream<'_, Result<PartitionOwnership>> {
        self.claim_all(requested)
    }

    fn list_ownership(
        &self,
        namespace: &str,
        stream: &str,
        consumer_group: &str,
    ) -> BoxStream<'_, Result<PartitionOwnership>> {
        self.ownerships(namespace, stream, consumer_group)
    }

    fn list_checkpoints(
        &self,
        namespace: &str,
        stream: &str,
        consumer_group: &str,
    ) -> BoxStream<'_, Result<Checkpoint>> {
        self.checkpoints(namespace, stream, consumer_group)
    }

    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.record_checkpoint(checkpoint).await
    }
}
