//! Store-level write instructions. A [MutationMapper](crate::mapper::MutationMapper) turns a record
//! into a row key and a [ColumnList], the write client turns those into one or more [Mutation]s
//! tagged with the sink's [Durability].

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::Error;

/// Identifies the target row. Several records in a batch may target the same row.
pub type RowKey = Bytes;

/// Whether a mutation is written to the write-ahead log before it is considered applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Durability {
    /// Synchronously write to the WAL.
    #[default]
    SyncWal,
    /// Skip the WAL, trading durability for throughput.
    SkipWal,
}

impl Durability {
    pub fn from_write_to_wal(write_to_wal: bool) -> Self {
        if write_to_wal {
            Durability::SyncWal
        } else {
            Durability::SkipWal
        }
    }
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Durability::SyncWal => write!(f, "SYNC_WAL"),
            Durability::SkipWal => write!(f, "SKIP_WAL"),
        }
    }
}

/// A single cell write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub family: Bytes,
    pub qualifier: Bytes,
    pub value: Bytes,
    /// explicit cell timestamp, the store assigns one when absent.
    pub timestamp: Option<i64>,
}

/// An atomic increment of a counter cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub family: Bytes,
    pub qualifier: Bytes,
    pub increment: i64,
}

/// Removal of a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDelete {
    pub family: Bytes,
    pub qualifier: Bytes,
}

/// The set of writes, increments and deletes derived from one record for one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnList {
    columns: Vec<Column>,
    counters: Vec<Counter>,
    deletes: Vec<ColumnDelete>,
}

impl ColumnList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(
        mut self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        self.columns.push(Column {
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            timestamp: None,
        });
        self
    }

    pub fn add_column_with_ts(
        mut self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        value: impl Into<Bytes>,
        timestamp: i64,
    ) -> Self {
        self.columns.push(Column {
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
            timestamp: Some(timestamp),
        });
        self
    }

    pub fn add_counter(
        mut self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        increment: i64,
    ) -> Self {
        self.counters.push(Counter {
            family: family.into(),
            qualifier: qualifier.into(),
            increment,
        });
        self
    }

    pub fn add_delete(mut self, family: impl Into<Bytes>, qualifier: impl Into<Bytes>) -> Self {
        self.deletes.push(ColumnDelete {
            family: family.into(),
            qualifier: qualifier.into(),
        });
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn counters(&self) -> &[Counter] {
        &self.counters
    }

    pub fn deletes(&self) -> &[ColumnDelete] {
        &self.deletes
    }

    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn has_counters(&self) -> bool {
        !self.counters.is_empty()
    }

    pub fn has_deletes(&self) -> bool {
        !self.deletes.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_columns() && !self.has_counters() && !self.has_deletes()
    }
}

/// One store-level write instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put {
        row: RowKey,
        columns: Vec<Column>,
        durability: Durability,
    },
    Increment {
        row: RowKey,
        counters: Vec<Counter>,
        durability: Durability,
    },
    Delete {
        row: RowKey,
        columns: Vec<ColumnDelete>,
        durability: Durability,
    },
}

impl Mutation {
    pub fn row(&self) -> &RowKey {
        match self {
            Mutation::Put { row, .. }
            | Mutation::Increment { row, .. }
            | Mutation::Delete { row, .. } => row,
        }
    }

    pub fn durability(&self) -> Durability {
        match self {
            Mutation::Put { durability, .. }
            | Mutation::Increment { durability, .. }
            | Mutation::Delete { durability, .. } => *durability,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Put { .. } => "put",
            Mutation::Increment { .. } => "increment",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// Builds the mutations for one row: a put when there are columns, an increment when there are
/// counters and a delete when there are deletes, in that order. All of them carry `durability`.
pub fn build_mutations(
    row_key: &RowKey,
    cols: &ColumnList,
    durability: Durability,
) -> Result<Vec<Mutation>> {
    if row_key.is_empty() {
        return Err(Error::Mutation("row key is empty".to_string()));
    }

    let mut mutations = Vec::with_capacity(3);
    if cols.has_columns() {
        mutations.push(Mutation::Put {
            row: row_key.clone(),
            columns: cols.columns.clone(),
            durability,
        });
    }
    if cols.has_counters() {
        mutations.push(Mutation::Increment {
            row: row_key.clone(),
            counters: cols.counters.clone(),
            durability,
        });
    }
    if cols.has_deletes() {
        mutations.push(Mutation::Delete {
            row: row_key.clone(),
            columns: cols.deletes.clone(),
            durability,
        });
    }
    Ok(mutations)
}
