use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use futures_util::StreamExt;
use futures_util::future::join_all;
use tracing::info;

use fluvio_future::task::run_block_on;
use fluvio_kv_storage::MemoryKvStore;
use fluvio_checkpoint_store::{
    Checkpoint, CheckpointStore, CheckpointStoreConfig, KvCheckpointStore, PartitionOwnership,
};

const NAMESPACE: &str = "local";
const STREAM: &str = "events";
const CONSUMER_GROUP: &str = "default";

///
/// Checkpoint store utilities:
///
/// simulation: `cargo run --bin checkpoint-cli --features=cli simulate --consumers 3 --partitions 8`
#[derive(Debug, Parser)]
#[clap(name = "checkpoint", about = "Fluvio Checkpoint Store CLI")]
enum Main {
    /// race consumers for partitions against an in-memory store
    #[clap(name = "simulate")]
    Simulate(SimulateOpt),

    /// print default configuration
    #[clap(name = "config")]
    Config,
}

fn main() {
    fluvio_future::subscriber::init_logger();

    let opt = Main::parse();

    let result = run_block_on(async {
        match opt {
            Main::Simulate(opt) => simulate(opt).await,
            Main::Config => print_config(),
        }
    });
    if let Err(err) = result {
        println!("error in async: {:#?}", err)
    };
}

#[derive(Debug, Parser)]
pub(crate) struct SimulateOpt {
    /// number of competing consumers
    #[clap(long, default_value = "2")]
    consumers: usize,

    /// number of partitions in the stream
    #[clap(long, default_value = "4")]
    partitions: usize,

    /// config file, defaults are used if not set
    #[clap(long, value_parser)]
    config: Option<PathBuf>,
}

async fn simulate(opt: SimulateOpt) -> Result<()> {
    if opt.consumers == 0 || opt.partitions == 0 {
        return Err(anyhow!("consumers and partitions must be at least 1"));
    }

    let config = match opt.config {
        Some(path) => CheckpointStoreConfig::load_from(path)?,
        None => CheckpointStoreConfig::default(),
    };
    let store = KvCheckpointStore::new(MemoryKvStore::new(), config);

    let consumers = (0..opt.consumers).map(|consumer| {
        let owner_id = format!("consumer-{consumer}");
        let requested = (0..opt.partitions)
            .map(|partition| {
                PartitionOwnership::new(
                    NAMESPACE,
                    STREAM,
                    CONSUMER_GROUP,
                    partition.to_string(),
                    owner_id.as_str(),
                )
            })
            .collect();
        let store = &store;
        async move {
            let results: Vec<_> = store.claim_ownership(requested).collect().await;
            (owner_id, results)
        }
    });

    for (owner_id, results) in join_all(consumers).await {
        let mut owned = vec![];
        let mut lost = 0;
        for result in results {
            match result {
                Ok(ownership) => owned.push(ownership),
                Err(err) if err.is_claim_conflict() => lost += 1,
                Err(err) => return Err(err.into()),
            }
        }
        info!(%owner_id, owned = owned.len(), lost, "claims finished");

        for ownership in &owned {
            let checkpoint = Checkpoint::new(
                NAMESPACE,
                STREAM,
                CONSUMER_GROUP,
                ownership.partition_id.as_str(),
            )
            .with_offset(0)
            .with_sequence_number(0);
            store.update_checkpoint(&checkpoint).await?;
        }
    }

    let mut ownerships = store
        .list_ownership(NAMESPACE, STREAM, CONSUMER_GROUP)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    ownerships.sort_by_key(|ownership| partition_order(&ownership.partition_id));

    let checkpoints = store
        .list_checkpoints(NAMESPACE, STREAM, CONSUMER_GROUP)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    println!("{:<10} {:<14} {:<8} {:<8}", "PARTITION", "OWNER", "ETAG", "OFFSET");
    for ownership in ownerships {
        let offset = checkpoints
            .iter()
            .find(|checkpoint| checkpoint.partition_id == ownership.partition_id)
            .and_then(|checkpoint| checkpoint.offset)
            .map(|offset| offset.to_string())
            .unwrap_or_else(|| "-".to_owned());
        println!(
            "{:<10} {:<14} {:<8} {:<8}",
            ownership.partition_id,
            ownership.owner_id,
            ownership.etag.unwrap_or_default(),
            offset
        );
    }

    Ok(())
}

fn print_config() -> Result<()> {
    print!("{}", CheckpointStoreConfig::default().to_toml()?);
    Ok(())
}

fn partition_order(partition_id: &str) -> (usize, String) {
    (partition_id.len(), partition_id.to_owned())
}
