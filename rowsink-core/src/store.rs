//! The store is the downstream system the sink commits to. The sink only needs two things from its
//! client: turning a row key and a [ColumnList] into [Mutation]s, and committing a batch of
//! mutations as a unit. Everything store specific lives behind [WriteClient].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::Result;
use crate::error::Error;
use crate::mutation::{ColumnList, Durability, Mutation, RowKey, build_mutations};

/// [log] store prints out the mutations it is asked to commit.
#[path = "store/log.rs"]
mod log;

/// In-memory table, applies a batch atomically. Comes with error injection for negative tests.
#[path = "store/memory.rs"]
pub mod memory;

pub use log::LogStore;
pub use memory::{MemoryStore, Row, StoreErrorInjector};

/// Connection settings of the store, looked up from the engine configuration by key.
pub type StoreSettings = HashMap<String, Value>;

/// Client of the downstream store.
#[trait_variant::make(WriteClient: Send)]
#[allow(dead_code)]
pub trait LocalWriteClient {
    /// Turns a row key and its column set into store mutations. Must not do any I/O.
    fn construct_mutations(
        &self,
        row_key: &RowKey,
        cols: &ColumnList,
        durability: Durability,
    ) -> Result<Vec<Mutation>> {
        build_mutations(row_key, cols, durability)
    }

    /// Commits the mutations. Either all of them are applied or the call fails.
    async fn batch_mutate(&mut self, mutations: &[Mutation]) -> Result<()>;
}

/// Builtin stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Log,
    Memory,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Log => write!(f, "log"),
            StoreType::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StoreType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "log" => Ok(StoreType::Log),
            "memory" => Ok(StoreType::Memory),
            other => Err(Error::Config(format!("unknown store type {other:?}"))),
        }
    }
}

/// A connected builtin store.
#[derive(Debug, Clone)]
pub enum StoreClient {
    Log(LogStore),
    Memory(MemoryStore),
}

impl WriteClient for StoreClient {
    fn construct_mutations(
        &self,
        row_key: &RowKey,
        cols: &ColumnList,
        durability: Durability,
    ) -> Result<Vec<Mutation>> {
        match self {
            StoreClient::Log(store) => {
                WriteClient::construct_mutations(store, row_key, cols, durability)
            }
            StoreClient::Memory(store) => {
                WriteClient::construct_mutations(store, row_key, cols, durability)
            }
        }
    }

    async fn batch_mutate(&mut self, mutations: &[Mutation]) -> Result<()> {
        match self {
            StoreClient::Log(store) => WriteClient::batch_mutate(store, mutations).await,
            StoreClient::Memory(store) => WriteClient::batch_mutate(store, mutations).await,
        }
    }
}

/// Connects to the builtin store for `table`.
pub fn connect(
    table: &str,
    settings: &StoreSettings,
    store_type: StoreType,
) -> Result<StoreClient> {
    if table.is_empty() {
        return Err(Error::Config("table name is empty".to_string()));
    }
    let mut keys: Vec<_> = settings.keys().collect();
    keys.sort();
    info!(%table, %store_type, settings = ?keys, "Connecting to store");

    Ok(match store_type {
        StoreType::Log => StoreClient::Log(LogStore::new(table)),
        StoreType::Memory => StoreClient::Memory(MemoryStore::new(table)),
    })
}
