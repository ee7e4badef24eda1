//! Batching row sink. Records coming from an upstream stream-processing engine are mapped to row
//! mutations, buffered, and committed to a wide-column store in batches. Every record is acked once
//! its batch is committed, or failed (for the upstream to redeliver) when the batch could not be.
//!
//! The building blocks:
//! - [MutationMapper] derives the row key and columns of a record.
//! - [WriteClient] turns those into [Mutation]s and commits a batch of them.
//! - [Acknowledger] reports every record's outcome back upstream.
//! - [SinkWriter] ties them together, flushing on batch size or on a tick.

pub(crate) use self::error::Result;

mod error;
pub use crate::error::Error;

mod message;
pub use crate::message::{Event, ReadAck, Record, RecordId};

mod mutation;
pub use crate::mutation::{
    Column, ColumnDelete, ColumnList, Counter, Durability, Mutation, RowKey, build_mutations,
};

mod mapper;
pub use crate::mapper::{JsonFieldMapper, JsonFieldMapperConfig, MutationMapper};

pub mod store;
pub use crate::store::{LocalWriteClient, StoreClient, StoreType, WriteClient};

mod ack;
pub use crate::ack::{AckMessage, Acknowledger, ChannelAcknowledger, LogAcknowledger};

pub mod config;
pub use crate::config::{EngineConfig, ResolvedSinkConfig, Settings, SinkConfig};

/// Pending records and their mutations.
mod batch;

/// Decides when the pending batch is committed.
mod trigger;

mod sinker;
pub use crate::sinker::{CommitState, FlushOutcome, SinkWriter, spawn_ticker};

mod metrics;
pub use crate::metrics::metrics_text;

#[cfg(test)]
mod test_utils;
