use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tracing::{debug, instrument, warn};

use fluvio_kv_storage::{KvConnection, KvConnector, Revision, Transaction, TxnResult};

use crate::codec::RecordCodec;
use crate::key::{OWNERSHIP_FIELD, partition_key, prefix_key};
use crate::model::PartitionOwnership;
use crate::store::{ConnectionResultExt, KvCheckpointStore};
use crate::{CheckpointStoreError, Result};

impl<C, S> KvCheckpointStore<C, S>
where
    C: KvConnector,
    S: RecordCodec,
{
    /// Try to claim every requested partition.
    ///
    /// Each claim runs independently with its own connection; the stream yields
    /// the claimed ownership or the reason the claim failed, in completion order.
    pub(crate) fn claim_all(
        &self,
        requested: Vec<PartitionOwnership>,
    ) -> BoxStream<'_, Result<PartitionOwnership>> {
        debug!(count = requested.len(), "claiming ownership");
        stream::iter(requested)
            .map(move |ownership| self.bounded(self.claim_partition(ownership)))
            .buffer_unordered(self.config().claim_concurrency)
            .boxed()
    }

    #[instrument(
        skip(self, ownership),
        fields(partition = %ownership.partition_id, owner = %ownership.owner_id)
    )]
    async fn claim_partition(&self, mut ownership: PartitionOwnership) -> Result<PartitionOwnership> {
        let prefix = prefix_key(
            &ownership.namespace,
            &ownership.stream,
            &ownership.consumer_group,
        );
        let key = partition_key(&prefix, &ownership.partition_id);
        let conflict = || CheckpointStoreError::claim_conflict(ownership.partition_id.clone());
        let expected_etag = ownership.etag.take();

        let mut conn = self.connection().await?;
        conn.watch(&key, OWNERSHIP_FIELD)
            .await
            .or_discard(&mut conn)?;
        let current = conn
            .get_field(&key, OWNERSHIP_FIELD)
            .await
            .or_discard(&mut conn)?;

        let claimed_at = conn.time().await.or_discard(&mut conn)?;
        let mut record = ownership.clone();
        record.last_modified_time = Some(claimed_at);
        let payload = self.codec().encode(&record)?;

        if let Some(current) = &current
            && let Some(expected) = expected_etag.as_deref()
            && expected != current.revision.to_string()
        {
            debug!(expected, current = %current.revision, "stale etag");
            return Err(conflict());
        }

        // membership precedes the ownership field
        conn.add_to_set(&prefix, &key).await.or_discard(&mut conn)?;

        let revision = match current {
            None => {
                conn.unwatch().await.or_discard(&mut conn)?;
                conn.set_field_if_absent(&key, OWNERSHIP_FIELD, payload)
                    .await
                    .or_discard(&mut conn)?
                    .ok_or_else(|| {
                        debug!("ownership created concurrently by another writer");
                        conflict()
                    })?
            }
            Some(_) => {
                let mut txn = Transaction::new();
                txn.set_field(key.as_str(), OWNERSHIP_FIELD, payload);
                let results = conn
                    .exec(txn)
                    .await
                    .or_discard(&mut conn)?
                    .ok_or_else(|| {
                        debug!("ownership changed while watched, transaction aborted");
                        conflict()
                    })?;
                write_revision(&results).ok_or_else(|| {
                    warn!(?results, "transaction committed without write result");
                    conflict()
                })?
            }
        };
        drop(conn);

        debug!(%revision, "ownership claimed");
        record.etag = Some(revision.to_string());
        Ok(record)
    }
}

fn write_revision(results: &[TxnResult]) -> Option<Revision> {
    results.first().and_then(TxnResult::revision)
}
