use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use fluvio_future::future::timeout;
use fluvio_kv_storage::{
    KvConnection, KvConnector, KvError, KvPool, PooledConnection, Result as KvResult, Versioned,
};

use crate::codec::{JsonCodec, RecordCodec};
use crate::config::CheckpointStoreConfig;
use crate::{CheckpointStoreError, Result};

/// Checkpoint store over any `KvConnector`.
///
/// Every operation checks out its own pooled connection and releases it
/// when done, so no connection (or watch) outlives the operation.
pub struct KvCheckpointStore<C: KvConnector, S = JsonCodec> {
    pool: Arc<KvPool<C>>,
    codec: S,
    config: CheckpointStoreConfig,
}

impl<C: KvConnector> KvCheckpointStore<C, JsonCodec> {
    pub fn new(connector: C, config: CheckpointStoreConfig) -> Self {
        Self::with_codec(connector, config, JsonCodec)
    }
}

impl<C, S> KvCheckpointStore<C, S>
where
    C: KvConnector,
    S: RecordCodec,
{
    pub fn with_codec(connector: C, config: CheckpointStoreConfig, codec: S) -> Self {
        let pool = KvPool::new_shared(connector, config.pool_config());
        Self {
            pool,
            codec,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<KvPool<C>> {
        &self.pool
    }

    pub fn config(&self) -> &CheckpointStoreConfig {
        &self.config
    }

    pub(crate) fn codec(&self) -> &S {
        &self.codec
    }

    pub(crate) async fn connection(&self) -> Result<PooledConnection<C>> {
        Ok(self.pool.checkout().await?)
    }

    /// run one store operation within `operation_timeout`
    pub(crate) async fn bounded<F, T>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        T: Send + 'static,
    {
        let limit = self.config.operation_timeout;
        timeout(limit, op).await.map_err(|_| {
            CheckpointStoreError::StoreUnavailable(format!("operation timed out after {limit:?}"))
        })?
    }

    /// Lazily read `field` of every member of the membership set at `prefix`.
    /// Members without the field are skipped.
    pub(crate) fn list_records<T>(
        &self,
        prefix: String,
        field: &'static str,
    ) -> BoxStream<'_, Result<Versioned<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let concurrency = self.config.list_concurrency;
        stream::once(self.members(prefix))
            .flat_map(move |members| match members {
                Ok(members) => stream::iter(members)
                    .map(move |member| self.bounded(self.read_record::<T>(member, field)))
                    .buffer_unordered(concurrency)
                    .filter_map(|record| async move { record.transpose() })
                    .boxed(),
                Err(err) => stream::once(async move { Err(err) }).boxed(),
            })
            .boxed()
    }

    async fn members(&self, prefix: String) -> Result<Vec<String>> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let members = conn.set_members(&prefix).await.or_discard(&mut conn)?;
            debug!(%prefix, count = members.len(), "membership set read");
            Ok(members)
        })
        .await
    }

    async fn read_record<T: DeserializeOwned>(
        &self,
        key: String,
        field: &'static str,
    ) -> Result<Option<Versioned<T>>> {
        let mut conn = self.connection().await?;
        let Some(raw) = conn.get_field(&key, field).await.or_discard(&mut conn)? else {
            trace!(%key, field, "member without record, skipped");
            return Ok(None);
        };
        drop(conn);

        let (bytes, revision) = raw.into_parts();
        let record = self.codec.decode(&bytes)?;
        Ok(Some(Versioned::new(record, revision)))
    }
}

impl<C: KvConnector, S> fmt::Debug for KvCheckpointStore<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvCheckpointStore")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}

/// Converts store results, taking the connection out of rotation
/// when the store is unreachable through it.
pub(crate) trait ConnectionResultExt<T> {
    fn or_discard<C: KvConnector>(self, conn: &mut PooledConnection<C>) -> Result<T>;
}

impl<T> ConnectionResultExt<T> for KvResult<T> {
    fn or_discard<C: KvConnector>(self, conn: &mut PooledConnection<C>) -> Result<T> {
        self.map_err(|err: KvError| {
            if err.is_unavailable() {
                conn.mark_broken();
            }
            err.into()
        })
    }
}
