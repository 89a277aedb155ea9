use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

/// Serialization of ownership and checkpoint records.
/// Format must stay stable for the lifetime of a deployment.
pub trait RecordCodec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, record: &T) -> Result<Bytes>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON records, interchangeable with other checkpoint store clients
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl RecordCodec for JsonCodec {
    fn encode<T: Serialize>(&self, record: &T) -> Result<Bytes> {
        Ok(serde_json::to_vec(record)?.into())
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
