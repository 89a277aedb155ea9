use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, instrument, trace};

use fluvio_kv_storage::{KvConnection, KvConnector, Versioned};

use crate::codec::RecordCodec;
use crate::key::{CHECKPOINT_FIELD, OWNERSHIP_FIELD, prefix_key};
use crate::model::{Checkpoint, PartitionOwnership};
use crate::store::{ConnectionResultExt, KvCheckpointStore};
use crate::Result;

impl<C, S> KvCheckpointStore<C, S>
where
    C: KvConnector,
    S: RecordCodec,
{
    /// Persist checkpoint, registering the partition in the membership set on first write
    #[instrument(skip(self, checkpoint), fields(partition = %checkpoint.partition_id))]
    pub(crate) async fn record_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.validate()?;

        let prefix = checkpoint.prefix_key();
        let key = checkpoint.partition_key();
        let payload = self.codec().encode(checkpoint)?;

        self.bounded(async {
            let mut conn = self.connection().await?;
            if !conn.is_member(&prefix, &key).await.or_discard(&mut conn)? {
                debug!(%key, "first checkpoint for partition");
                conn.add_to_set(&prefix, &key).await.or_discard(&mut conn)?;
            }
            let revision = conn
                .set_field(&key, CHECKPOINT_FIELD, payload)
                .await
                .or_discard(&mut conn)?;
            trace!(%revision, "checkpoint written");
            Ok(())
        })
        .await
    }

    pub(crate) fn checkpoints(
        &self,
        namespace: &str,
        stream: &str,
        consumer_group: &str,
    ) -> BoxStream<'_, Result<Checkpoint>> {
        self.list_records::<Checkpoint>(
            prefix_key(namespace, stream, consumer_group),
            CHECKPOINT_FIELD,
        )
        .map(|record| record.map(|Versioned { value, .. }| value))
        .boxed()
    }

    /// listed ownership carries the revision of the stored record as etag
    pub(crate) fn ownerships(
        &self,
        namespace: &str,
        stream: &str,
        consumer_group: &str,
    ) -> BoxStream<'_, Result<PartitionOwnership>> {
        self.list_records::<PartitionOwnership>(
            prefix_key(namespace, stream, consumer_group),
            OWNERSHIP_FIELD,
        )
        .map(|record| {
            record.map(|Versioned { mut value, revision }| {
                value.etag = Some(revision.to_string());
                value
            })
        })
        .boxed()
    }
}
