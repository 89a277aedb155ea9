use bytes::Bytes;

use crate::Revision;

/// Commands queued in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnCommand {
    SetField {
        key: String,
        field: String,
        value: Bytes,
    },
    AddToSet {
        set_key: String,
        member: String,
    },
}

/// Result of each command, same order as queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnResult {
    /// new revision of the written field
    Set(Revision),
    /// true if member was added
    Added(bool),
}

impl TxnResult {
    pub fn revision(&self) -> Option<Revision> {
        match self {
            Self::Set(rev) => Some(*rev),
            Self::Added(_) => None,
        }
    }
}

/// Buffered list of commands, executed atomically by `KvConnection::exec`
#[derive(Debug, Default, Clone)]
pub struct Transaction {
    commands: Vec<TxnCommand>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: Bytes,
    ) -> &mut Self {
        self.commands.push(TxnCommand::SetField {
            key: key.into(),
            field: field.into(),
            value,
        });
        self
    }

    pub fn add_to_set(&mut self, set_key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.commands.push(TxnCommand::AddToSet {
            set_key: set_key.into(),
            member: member.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_commands(self) -> Vec<TxnCommand> {
        self.commands
    }
}
