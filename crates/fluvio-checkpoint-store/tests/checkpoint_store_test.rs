use std::sync::Arc;
use std::time::Duration;

use async_lock::Barrier;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::future::join;

use fluvio_kv_storage::{
    KvConnection, KvConnector, KvError, MemoryConnection, MemoryKvStore, Result as KvResult,
    Revision, Timestamp, Transaction, TxnResult, Versioned,
};
use fluvio_checkpoint_store::{
    CHECKPOINT_FIELD, Checkpoint, CheckpointStore, CheckpointStoreConfig, CheckpointStoreError,
    KvCheckpointStore, OWNERSHIP_FIELD, PartitionOwnership,
};

const NS: &str = "ns1";
const STREAM: &str = "stream1";
const GROUP: &str = "group1";

/// Connector whose connections wait on a shared barrier right before
/// committing a write, so tests can line up competing writers.
/// Optionally every membership set update fails.
struct GatedConnector {
    store: MemoryKvStore,
    gate: Arc<Barrier>,
    reject_membership: bool,
}

struct GatedConnection {
    inner: MemoryConnection,
    gate: Arc<Barrier>,
    reject_membership: bool,
}

#[async_trait]
impl KvConnector for GatedConnector {
    type Connection = GatedConnection;

    async fn connect(&self) -> KvResult<Self::Connection> {
        Ok(GatedConnection {
            inner: self.store.connect().await?,
            gate: self.gate.clone(),
            reject_membership: self.reject_membership,
        })
    }
}

#[async_trait]
impl KvConnection for GatedConnection {
    async fn get_field(&mut self, key: &str, field: &str) -> KvResult<Option<Versioned<Bytes>>> {
        self.inner.get_field(key, field).await
    }

    async fn set_field(&mut self, key: &str, field: &str, value: Bytes) -> KvResult<Revision> {
        self.inner.set_field(key, field, value).await
    }

    async fn set_field_if_absent(
        &mut self,
        key: &str,
        field: &str,
        value: Bytes,
    ) -> KvResult<Option<Revision>> {
        self.gate.wait().await;
        self.inner.set_field_if_absent(key, field, value).await
    }

    async fn watch(&mut self, key: &str, field: &str) -> KvResult<()> {
        self.inner.watch(key, field).await
    }

    async fn unwatch(&mut self) -> KvResult<()> {
        self.inner.unwatch().await
    }

    async fn exec(&mut self, txn: Transaction) -> KvResult<Option<Vec<TxnResult>>> {
        self.gate.wait().await;
        self.inner.exec(txn).await
    }

    async fn add_to_set(&mut self, set_key: &str, member: &str) -> KvResult<bool> {
        if self.reject_membership {
            return Err(KvError::Other("membership update rejected".to_owned()));
        }
        self.inner.add_to_set(set_key, member).await
    }

    async fn is_member(&mut self, set_key: &str, member: &str) -> KvResult<bool> {
        self.inner.is_member(set_key, member).await
    }

    async fn set_members(&mut self, set_key: &str) -> KvResult<Vec<String>> {
        self.inner.set_members(set_key).await
    }

    async fn exists(&mut self, key: &str) -> KvResult<bool> {
        self.inner.exists(key).await
    }

    async fn time(&mut self) -> KvResult<Timestamp> {
        self.inner.time().await
    }

    fn reset_state(&mut self) {
        self.inner.reset_state()
    }
}

fn gated_store(
    store: &MemoryKvStore,
    gate: &Arc<Barrier>,
    config: CheckpointStoreConfig,
) -> KvCheckpointStore<GatedConnector> {
    KvCheckpointStore::new(
        GatedConnector {
            store: store.clone(),
            gate: gate.clone(),
            reject_membership: false,
        },
        config,
    )
}

fn ownership(partition_id: &str, owner_id: &str) -> PartitionOwnership {
    PartitionOwnership::new(NS, STREAM, GROUP, partition_id, owner_id)
}

async fn claim_one<S: CheckpointStore>(
    store: &S,
    request: PartitionOwnership,
) -> fluvio_checkpoint_store::Result<PartitionOwnership> {
    let mut results: Vec<_> = store.claim_ownership(vec![request]).collect().await;
    assert_eq!(results.len(), 1);
    results.remove(0)
}

async fn list_ownership<S: CheckpointStore>(store: &S) -> Vec<PartitionOwnership> {
    let mut records: Vec<_> = store
        .list_ownership(NS, STREAM, GROUP)
        .map(|record| record.expect("ownership listed"))
        .collect()
        .await;
    records.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
    records
}

async fn list_checkpoints<S: CheckpointStore>(store: &S) -> Vec<Checkpoint> {
    let mut records: Vec<_> = store
        .list_checkpoints(NS, STREAM, GROUP)
        .map(|record| record.expect("checkpoint listed"))
        .collect()
        .await;
    records.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
    records
}

#[fluvio_future::test]
async fn test_competing_first_claims_single_winner() {
    //given
    let memory = MemoryKvStore::new();
    let gate = Arc::new(Barrier::new(2));
    let store_a = gated_store(&memory, &gate, CheckpointStoreConfig::default());
    let store_b = gated_store(&memory, &gate, CheckpointStoreConfig::default());

    //when
    let (result_a, result_b) = join(
        claim_one(&store_a, ownership("0", "owner-a")),
        claim_one(&store_b, ownership("0", "owner-b")),
    )
    .await;

    //then
    let (winner, loser) = match (result_a, result_b) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("expected exactly one winner: {other:?}"),
    };
    assert!(loser.is_claim_conflict());

    let listed = list_ownership(&store_a).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].owner_id, winner.owner_id);
    assert_eq!(listed[0].etag, winner.etag);
}

#[fluvio_future::test]
async fn test_competing_reclaims_single_winner() {
    //given
    let memory = MemoryKvStore::new();
    let plain = KvCheckpointStore::new(memory.clone(), CheckpointStoreConfig::default());
    let previous = claim_one(&plain, ownership("1", "owner-old"))
        .await
        .expect("initial claim");

    let gate = Arc::new(Barrier::new(2));
    let store_a = gated_store(&memory, &gate, CheckpointStoreConfig::default());
    let store_b = gated_store(&memory, &gate, CheckpointStoreConfig::default());

    //when
    let (result_a, result_b) = join(
        claim_one(&store_a, ownership("1", "owner-a")),
        claim_one(&store_b, ownership("1", "owner-b")),
    )
    .await;

    //then
    let winners: Vec<_> = [&result_a, &result_b]
        .into_iter()
        .filter_map(|result| result.as_ref().ok())
        .cloned()
        .collect();
    assert_eq!(winners.len(), 1);
    assert_ne!(winners[0].etag, previous.etag);
    assert!(
        [result_a, result_b]
            .into_iter()
            .filter_map(Result::err)
            .all(|err| err.is_claim_conflict())
    );

    let listed = list_ownership(&plain).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].owner_id, winners[0].owner_id);
}

#[fluvio_future::test]
async fn test_failed_claim_does_not_affect_others() {
    //given
    let store = KvCheckpointStore::new(MemoryKvStore::new(), CheckpointStoreConfig::default());
    let first = claim_one(&store, ownership("0", "owner-a"))
        .await
        .expect("first claim");
    let stale_etag = first.etag.clone().expect("etag");
    claim_one(&store, first).await.expect("renewed");

    //when
    let results: Vec<_> = store
        .claim_ownership(vec![
            ownership("0", "owner-b").with_etag(stale_etag),
            ownership("1", "owner-b"),
        ])
        .collect()
        .await;

    //then
    assert_eq!(results.len(), 2);
    let (claimed, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    let claimed = claimed
        .into_iter()
        .map(|result| result.expect("claimed"))
        .collect::<Vec<_>>();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].partition_id, "1");
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        &failed[0],
        Err(CheckpointStoreError::ClaimConflict { partition_id }) if partition_id == "0"
    ));

    let listed = list_ownership(&store).await;
    assert_eq!(listed[0].owner_id, "owner-a");
    assert_eq!(listed[1].owner_id, "owner-b");
}

#[fluvio_future::test]
async fn test_reclaim_is_idempotent() {
    //given
    let store = KvCheckpointStore::new(MemoryKvStore::new(), CheckpointStoreConfig::default());
    let first = claim_one(&store, ownership("2", "owner-a"))
        .await
        .expect("first claim");

    //when
    let second = claim_one(&store, first.clone())
        .await
        .expect("second claim");

    //then
    assert_eq!(second.owner_id, "owner-a");
    assert!(second.last_modified_time >= first.last_modified_time);
    assert_ne!(second.etag, first.etag);

    let listed = list_ownership(&store).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].etag, second.etag);
}

#[fluvio_future::test]
async fn test_overlapping_claims_cover_union() {
    //given
    let store = KvCheckpointStore::new(MemoryKvStore::new(), CheckpointStoreConfig::default());
    let requests_a = ["0", "1", "2"].map(|p| ownership(p, "owner-a"));
    let requests_b = ["1", "2", "3"].map(|p| ownership(p, "owner-b"));

    //when
    let (results_a, results_b) = join(
        store.claim_ownership(requests_a.to_vec()).collect::<Vec<_>>(),
        store.claim_ownership(requests_b.to_vec()).collect::<Vec<_>>(),
    )
    .await;

    //then
    assert_eq!(results_a.len(), 3);
    assert_eq!(results_b.len(), 3);
    let succeeded: Vec<_> = results_a
        .into_iter()
        .chain(results_b)
        .filter_map(|result| match result {
            Ok(ownership) => Some(ownership),
            Err(err) => {
                assert!(err.is_claim_conflict(), "unexpected error: {err}");
                None
            }
        })
        .collect();

    let listed = list_ownership(&store).await;
    let partitions: Vec<_> = listed.iter().map(|o| o.partition_id.as_str()).collect();
    assert_eq!(partitions, ["0", "1", "2", "3"]);
    for record in &listed {
        assert!(
            succeeded
                .iter()
                .any(|o| o.partition_id == record.partition_id && o.owner_id == record.owner_id),
            "listed owner of {} never claimed it",
            record.partition_id
        );
    }
}

#[fluvio_future::test]
async fn test_invalid_checkpoint_rejected_without_writes() {
    //given
    let memory = MemoryKvStore::new();
    let store = KvCheckpointStore::new(memory.clone(), CheckpointStoreConfig::default());
    let checkpoint = Checkpoint::new(NS, STREAM, GROUP, "0");

    //when
    let result = store.update_checkpoint(&checkpoint).await;

    //then
    assert!(matches!(
        result,
        Err(CheckpointStoreError::InvalidArgument(_))
    ));
    assert_eq!(memory.revision().await, Revision::ABSENT);
    assert_eq!(memory.key_count().await, 0);
    assert!(list_checkpoints(&store).await.is_empty());
}

#[fluvio_future::test]
async fn test_checkpoint_round_trip() {
    //given
    let store = KvCheckpointStore::new(MemoryKvStore::new(), CheckpointStoreConfig::default());
    let checkpoint = Checkpoint::new(NS, STREAM, GROUP, "0")
        .with_offset(100)
        .with_sequence_number(10);

    //when
    store
        .update_checkpoint(&checkpoint)
        .await
        .expect("checkpoint updated");

    //then
    assert_eq!(list_checkpoints(&store).await, vec![checkpoint.clone()]);

    //when
    let advanced = checkpoint.with_offset(200).with_sequence_number(20);
    store
        .update_checkpoint(&advanced)
        .await
        .expect("checkpoint updated");

    //then
    assert_eq!(list_checkpoints(&store).await, vec![advanced]);
}

#[fluvio_future::test]
async fn test_empty_listing() {
    let store = KvCheckpointStore::new(MemoryKvStore::new(), CheckpointStoreConfig::default());

    assert!(list_ownership(&store).await.is_empty());
    assert!(list_checkpoints(&store).await.is_empty());
}

#[fluvio_future::test]
async fn test_listing_skips_members_without_record() {
    //given
    let store = KvCheckpointStore::new(MemoryKvStore::new(), CheckpointStoreConfig::default());
    claim_one(&store, ownership("0", "owner-a"))
        .await
        .expect("claimed");
    store
        .update_checkpoint(&Checkpoint::new(NS, STREAM, GROUP, "5").with_offset(1))
        .await
        .expect("checkpoint updated");

    //when
    let ownerships = list_ownership(&store).await;
    let checkpoints = list_checkpoints(&store).await;

    //then
    assert_eq!(ownerships.len(), 1);
    assert_eq!(ownerships[0].partition_id, "0");
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].partition_id, "5");
}

#[fluvio_future::test]
async fn test_checkpoint_write_does_not_break_claim() {
    //given
    let memory = MemoryKvStore::new();
    let plain = KvCheckpointStore::new(memory.clone(), CheckpointStoreConfig::default());
    let first = claim_one(&plain, ownership("0", "owner-a"))
        .await
        .expect("claimed");

    let gate = Arc::new(Barrier::new(2));
    let gated = gated_store(&memory, &gate, CheckpointStoreConfig::default());

    //when
    let (renewed, _) = join(claim_one(&gated, first), async {
        plain
            .update_checkpoint(&Checkpoint::new(NS, STREAM, GROUP, "0").with_offset(42))
            .await
            .expect("checkpoint updated");
        gate.wait().await;
    })
    .await;

    //then
    let renewed = renewed.expect("claim survives checkpoint write");
    assert_eq!(list_ownership(&plain).await[0].etag, renewed.etag);
    assert_eq!(list_checkpoints(&plain).await[0].offset, Some(42));
}

#[fluvio_future::test]
async fn test_store_unavailable() {
    //given
    let memory = MemoryKvStore::new();
    let store = KvCheckpointStore::new(memory.clone(), CheckpointStoreConfig::default());
    memory.set_available(false);

    //when
    let claim = claim_one(&store, ownership("0", "owner-a")).await;
    let update = store
        .update_checkpoint(&Checkpoint::new(NS, STREAM, GROUP, "0").with_offset(1))
        .await;
    let listed: Vec<_> = store.list_checkpoints(NS, STREAM, GROUP).collect().await;

    //then
    assert!(claim.expect_err("claim fails").is_store_unavailable());
    assert!(update.expect_err("update fails").is_store_unavailable());
    assert_eq!(listed.len(), 1);
    assert!(matches!(
        &listed[0],
        Err(CheckpointStoreError::StoreUnavailable(_))
    ));

    //when
    memory.set_available(true);

    //then
    claim_one(&store, ownership("0", "owner-a"))
        .await
        .expect("claim after recovery");
}

#[fluvio_future::test]
async fn test_operation_timeout() {
    //given
    let memory = MemoryKvStore::new();
    let gate = Arc::new(Barrier::new(2));
    let config = CheckpointStoreConfig::builder()
        .operation_timeout(Duration::from_millis(100))
        .build()
        .expect("config");
    let store = gated_store(&memory, &gate, config);

    //when
    let result = claim_one(&store, ownership("0", "owner-a")).await;

    //then
    assert!(result.expect_err("claim times out").is_store_unavailable());
    assert_eq!(memory.revision().await, Revision::ABSENT);
    assert_eq!(store.pool().in_use(), 0);
}

#[fluvio_future::test]
async fn test_stored_record_layout() {
    //given
    let memory = MemoryKvStore::new();
    let store = KvCheckpointStore::new(memory.clone(), CheckpointStoreConfig::default());
    let checkpoint = Checkpoint::new(NS, STREAM, GROUP, "7").with_sequence_number(3);

    //when
    store
        .update_checkpoint(&checkpoint)
        .await
        .expect("checkpoint updated");

    //then
    let mut conn = memory.connect().await.expect("connection");
    assert!(
        conn.is_member("ns1/stream1/group1", "ns1/stream1/group1/7")
            .await
            .expect("set read")
    );
    let raw = conn
        .get_field("ns1/stream1/group1/7", CHECKPOINT_FIELD)
        .await
        .expect("field read")
        .expect("field present");
    let json: serde_json::Value = serde_json::from_slice(&raw.value).expect("json");
    assert_eq!(json["partitionId"], "7");
    assert_eq!(json["sequenceNumber"], 3);
    assert_eq!(json["eventHubName"], "stream1");
}

#[fluvio_future::test]
async fn test_claim_not_written_when_membership_fails() {
    //given
    let memory = MemoryKvStore::new();
    let store = KvCheckpointStore::new(
        GatedConnector {
            store: memory.clone(),
            gate: Arc::new(Barrier::new(1)),
            reject_membership: true,
        },
        CheckpointStoreConfig::default(),
    );

    //when
    let result = claim_one(&store, ownership("0", "owner-a")).await;

    //then
    assert!(matches!(
        result,
        Err(CheckpointStoreError::Store(KvError::Other(_)))
    ));
    let mut conn = memory.connect().await.expect("connection");
    assert!(
        conn.get_field("ns1/stream1/group1/0", OWNERSHIP_FIELD)
            .await
            .expect("field read")
            .is_none()
    );
    assert!(list_ownership(&store).await.is_empty());
}

#[fluvio_future::test]
async fn test_listing_surfaces_undecodable_record() {
    //given
    let memory = MemoryKvStore::new();
    let store = KvCheckpointStore::new(memory.clone(), CheckpointStoreConfig::default());
    store
        .update_checkpoint(&Checkpoint::new(NS, STREAM, GROUP, "0").with_offset(5))
        .await
        .expect("checkpoint updated");

    let mut conn = memory.connect().await.expect("connection");
    conn.add_to_set("ns1/stream1/group1", "ns1/stream1/group1/1")
        .await
        .expect("member added");
    conn.set_field(
        "ns1/stream1/group1/1",
        CHECKPOINT_FIELD,
        Bytes::from_static(b"{not json"),
    )
    .await
    .expect("field written");

    //when
    let listed: Vec<_> = store.list_checkpoints(NS, STREAM, GROUP).collect().await;

    //then
    assert_eq!(listed.len(), 2);
    assert!(
        listed
            .iter()
            .any(|record| matches!(record, Err(CheckpointStoreError::Codec(_))))
    );
    assert!(listed.iter().any(|record| matches!(
        record,
        Ok(checkpoint) if checkpoint.partition_id == "0" && checkpoint.offset == Some(5)
    )));
}
