use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_lock::RwLock;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::{
    KvConnection, KvConnector, KvError, Result, Revision, Timestamp, Transaction, TxnCommand,
    TxnResult, Versioned,
};

#[derive(Debug, Clone)]
struct FieldEntry {
    value: Bytes,
    revision: Revision,
}

/// hashes and sets sharing one revision counter
#[derive(Debug, Default)]
struct Dataset {
    revision: u64,
    hashes: HashMap<String, HashMap<String, FieldEntry>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Dataset {
    fn field(&self, key: &str, field: &str) -> Option<&FieldEntry> {
        self.hashes.get(key).and_then(|hash| hash.get(field))
    }

    fn field_revision(&self, key: &str, field: &str) -> Revision {
        self.field(key, field)
            .map(|entry| entry.revision)
            .unwrap_or(Revision::ABSENT)
    }

    fn write_field(&mut self, key: &str, field: &str, value: Bytes) -> Revision {
        self.revision += 1;
        let revision = Revision::new(self.revision);
        self.hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), FieldEntry { value, revision });
        revision
    }

    fn add_member(&mut self, set_key: &str, member: &str) -> bool {
        let added = self
            .sets
            .entry(set_key.to_owned())
            .or_default()
            .insert(member.to_owned());
        if added {
            self.revision += 1;
        }
        added
    }

    fn apply(&mut self, command: TxnCommand) -> TxnResult {
        match command {
            TxnCommand::SetField { key, field, value } => {
                TxnResult::Set(self.write_field(&key, &field, value))
            }
            TxnCommand::AddToSet { set_key, member } => {
                TxnResult::Added(self.add_member(&set_key, &member))
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    data: RwLock<Dataset>,
    offline: AtomicBool,
}

/// In process store with per field revisions.
/// Cloning is cheap, all clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    state: Arc<MemoryState>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// simulate outage, every connect and operation fails while unavailable
    pub fn set_available(&self, available: bool) {
        debug!(available, "memory store availability changed");
        self.state.offline.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.state.offline.load(Ordering::SeqCst)
    }

    /// last revision handed out by the store
    pub async fn revision(&self) -> Revision {
        Revision::new(self.state.data.read().await.revision)
    }

    /// number of hash keys
    pub async fn key_count(&self) -> usize {
        self.state.data.read().await.hashes.len()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(KvError::Unavailable("memory store is offline".to_owned()))
        }
    }
}

#[async_trait]
impl KvConnector for MemoryKvStore {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<Self::Connection> {
        self.ensure_available()?;
        Ok(MemoryConnection {
            store: self.clone(),
            watched: HashMap::new(),
        })
    }
}

/// Connection to `MemoryKvStore`, keeps its own watch list
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryKvStore,
    watched: HashMap<(String, String), Revision>,
}

impl MemoryConnection {
    pub fn watch_count(&self) -> usize {
        self.watched.len()
    }
}

#[async_trait]
impl KvConnection for MemoryConnection {
    async fn get_field(&mut self, key: &str, field: &str) -> Result<Option<Versioned<Bytes>>> {
        self.store.ensure_available()?;
        let data = self.store.state.data.read().await;
        Ok(data
            .field(key, field)
            .map(|entry| Versioned::new(entry.value.clone(), entry.revision)))
    }

    async fn set_field(&mut self, key: &str, field: &str, value: Bytes) -> Result<Revision> {
        self.store.ensure_available()?;
        let mut data = self.store.state.data.write().await;
        let revision = data.write_field(key, field, value);
        trace!(key, field, %revision, "field set");
        Ok(revision)
    }

    async fn set_field_if_absent(
        &mut self,
        key: &str,
        field: &str,
        value: Bytes,
    ) -> Result<Option<Revision>> {
        self.store.ensure_available()?;
        let mut data = self.store.state.data.write().await;
        if data.field(key, field).is_some() {
            trace!(key, field, "field already present");
            return Ok(None);
        }
        let revision = data.write_field(key, field, value);
        trace!(key, field, %revision, "field created");
        Ok(Some(revision))
    }

    async fn watch(&mut self, key: &str, field: &str) -> Result<()> {
        self.store.ensure_available()?;
        let revision = self.store.state.data.read().await.field_revision(key, field);
        trace!(key, field, %revision, "watching");
        self.watched
            .insert((key.to_owned(), field.to_owned()), revision);
        Ok(())
    }

    async fn unwatch(&mut self) -> Result<()> {
        self.watched.clear();
        Ok(())
    }

    async fn exec(&mut self, txn: Transaction) -> Result<Option<Vec<TxnResult>>> {
        let watched = std::mem::take(&mut self.watched);
        self.store.ensure_available()?;
        let mut data = self.store.state.data.write().await;

        if let Some(((key, field), _)) = watched
            .iter()
            .find(|((key, field), rev)| data.field_revision(key, field) != **rev)
        {
            debug!(key, field, "watched field changed, transaction aborted");
            return Ok(None);
        }

        let results = txn
            .into_commands()
            .into_iter()
            .map(|command| data.apply(command))
            .collect();
        Ok(Some(results))
    }

    async fn add_to_set(&mut self, set_key: &str, member: &str) -> Result<bool> {
        self.store.ensure_available()?;
        Ok(self
            .store
            .state
            .data
            .write()
            .await
            .add_member(set_key, member))
    }

    async fn is_member(&mut self, set_key: &str, member: &str) -> Result<bool> {
        self.store.ensure_available()?;
        Ok(self
            .store
            .state
            .data
            .read()
            .await
            .sets
            .get(set_key)
            .is_some_and(|set| set.contains(member)))
    }

    async fn set_members(&mut self, set_key: &str) -> Result<Vec<String>> {
        self.store.ensure_available()?;
        Ok(self
            .store
            .state
            .data
            .read()
            .await
            .sets
            .get(set_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        self.store.ensure_available()?;
        let data = self.store.state.data.read().await;
        Ok(data.hashes.contains_key(key) || data.sets.contains_key(key))
    }

    async fn time(&mut self) -> Result<Timestamp> {
        self.store.ensure_available()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| KvError::Other(format!("system clock before unix epoch: {err}")))?;
        epoch_millis(now)
    }

    fn reset_state(&mut self) {
        self.watched.clear();
    }
}

fn epoch_millis(since_epoch: Duration) -> Result<Timestamp> {
    Timestamp::try_from(since_epoch.as_millis())
        .map_err(|err| KvError::Other(format!("store time out of range: {err}")))
}
