//! Store key layout.
//!
//! `namespace/stream/group` is the prefix key. It also names the membership
//! set that indexes every partition key known for the group.
//! `namespace/stream/group/partition` is the partition key, a hash holding
//! the ownership and checkpoint records as separate fields.

pub const KEY_DELIMITER: &str = "/";

/// hash field holding the serialized `PartitionOwnership`
pub const OWNERSHIP_FIELD: &str = "partitionOwnership";

/// hash field holding the serialized `Checkpoint`
pub const CHECKPOINT_FIELD: &str = "checkpoint";

pub fn prefix_key(namespace: &str, stream: &str, consumer_group: &str) -> String {
    [namespace, stream, consumer_group].join(KEY_DELIMITER)
}

pub fn partition_key(prefix: &str, partition_id: &str) -> String {
    format!("{prefix}{KEY_DELIMITER}{partition_id}")
}
