mod error;
mod memory;
mod pool;
mod transaction;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::KvError;
pub use memory::{MemoryKvStore, MemoryConnection};
pub use pool::{KvPool, PoolConfig, PoolConfigBuilder, PooledConnection};
pub use transaction::{Transaction, TxnCommand, TxnResult};

pub type Result<T, E = KvError> = std::result::Result<T, E>;

/// Milliseconds since unix epoch, as reported by the store clock
pub type Timestamp = i64;

/// Store assigned revision of a single hash field.
/// Revision 0 means the field has never been written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(u64);

impl Revision {
    pub const ABSENT: Revision = Revision(0);

    pub fn new(rev: u64) -> Self {
        Self(rev)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Revision {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

/// value together with the revision it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<V> {
    pub value: V,
    pub revision: Revision,
}

impl<V> Versioned<V> {
    pub fn new(value: V, revision: Revision) -> Self {
        Self { value, revision }
    }

    pub fn into_parts(self) -> (V, Revision) {
        (self.value, self.revision)
    }
}

/// Single connection to a hash/set store with watch + transaction semantics.
///
/// Watches belong to the connection: they are dropped by `unwatch`, by `exec`
/// (whether it commits or aborts) and by `reset_state` when the connection
/// goes back to the pool.
#[async_trait]
pub trait KvConnection: Send {
    /// read one field of the hash stored at `key`
    async fn get_field(&mut self, key: &str, field: &str) -> Result<Option<Versioned<Bytes>>>;

    /// unconditional write, returns the new revision of the field
    async fn set_field(&mut self, key: &str, field: &str, value: Bytes) -> Result<Revision>;

    /// write only if the field doesn't exist yet.
    /// `None` means some other writer created it first
    async fn set_field_if_absent(
        &mut self,
        key: &str,
        field: &str,
        value: Bytes,
    ) -> Result<Option<Revision>>;

    /// start watching a field; subsequent `exec` aborts if it changes
    async fn watch(&mut self, key: &str, field: &str) -> Result<()>;

    /// forget every watch held by this connection
    async fn unwatch(&mut self) -> Result<()>;

    /// execute transaction atomically.
    /// returns `None` if any watched field was modified since it was watched
    async fn exec(&mut self, txn: Transaction) -> Result<Option<Vec<TxnResult>>>;

    /// add member to set, true if it was not there before
    async fn add_to_set(&mut self, set_key: &str, member: &str) -> Result<bool>;

    async fn is_member(&mut self, set_key: &str, member: &str) -> Result<bool>;

    async fn set_members(&mut self, set_key: &str) -> Result<Vec<String>>;

    /// true if either a hash or a set exists at `key`
    async fn exists(&mut self, key: &str) -> Result<bool>;

    /// current time of the store
    async fn time(&mut self) -> Result<Timestamp>;

    /// clear per connection state before it is handed to another user
    fn reset_state(&mut self);
}

/// Creates new connections for the pool
#[async_trait]
pub trait KvConnector: Send + Sync {
    type Connection: KvConnection + 'static;

    async fn connect(&self) -> Result<Self::Connection>;
}
