use serde::{Deserialize, Serialize};

use fluvio_kv_storage::Timestamp;

use crate::CheckpointStoreError;
use crate::key::{partition_key, prefix_key};

/// Claim of one consumer over one partition of a stream within a consumer group
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionOwnership {
    #[serde(rename = "fullyQualifiedNamespace")]
    pub namespace: String,
    #[serde(rename = "eventHubName")]
    pub stream: String,
    pub consumer_group: String,
    pub partition_id: String,
    pub owner_id: String,
    /// store time of the last successful claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_time: Option<Timestamp>,
    /// store revision of the ownership record, opaque to callers
    #[serde(rename = "eTag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl PartitionOwnership {
    pub fn new(
        namespace: impl Into<String>,
        stream: impl Into<String>,
        consumer_group: impl Into<String>,
        partition_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            stream: stream.into(),
            consumer_group: consumer_group.into(),
            partition_id: partition_id.into(),
            owner_id: owner_id.into(),
            last_modified_time: None,
            etag: None,
        }
    }

    /// only claim if the stored record still has this etag
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn prefix_key(&self) -> String {
        prefix_key(&self.namespace, &self.stream, &self.consumer_group)
    }

    pub fn partition_key(&self) -> String {
        partition_key(&self.prefix_key(), &self.partition_id)
    }
}

/// Last processed position of a partition
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(rename = "fullyQualifiedNamespace")]
    pub namespace: String,
    #[serde(rename = "eventHubName")]
    pub stream: String,
    pub consumer_group: String,
    pub partition_id: String,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub sequence_number: Option<i64>,
}

impl Checkpoint {
    pub fn new(
        namespace: impl Into<String>,
        stream: impl Into<String>,
        consumer_group: impl Into<String>,
        partition_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            stream: stream.into(),
            consumer_group: consumer_group.into(),
            partition_id: partition_id.into(),
            offset: None,
            sequence_number: None,
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_sequence_number(mut self, sequence_number: i64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    /// checkpoint must carry at least one position
    pub fn validate(&self) -> Result<(), CheckpointStoreError> {
        if self.offset.is_none() && self.sequence_number.is_none() {
            return Err(CheckpointStoreError::InvalidArgument(format!(
                "checkpoint for partition {} has neither offset nor sequence number",
                self.partition_id
            )));
        }
        Ok(())
    }

    pub fn prefix_key(&self) -> String {
        prefix_key(&self.namespace, &self.stream, &self.consumer_group)
    }

    pub fn partition_key(&self) -> String {
        partition_key(&self.prefix_key(), &self.partition_id)
    }
}
