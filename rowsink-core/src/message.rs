//! Record is the unit of work handed to the sink by the upstream engine. It is retained in the
//! pending batch until the batch is committed, because the upstream engine acknowledges (or fails)
//! records, not the mutations derived from them.
//!
//! Records and timer ticks arrive on the same stream as an [Event], so the sink never has to guess
//! what kind of input it is looking at.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// The record that is passed from the upstream engine to the sink.
/// NOTE: It is cheap to clone.
#[derive(Debug, Clone)]
pub struct Record {
    /// id assigned by the upstream engine, used to route the ack/nak back.
    pub id: RecordId,
    /// keys of the record
    pub keys: Arc<[String]>,
    /// actual payload of the record
    pub value: Bytes,
    /// event time of the record
    pub event_time: DateTime<Utc>,
    /// headers of the record
    pub headers: Arc<HashMap<String, String>>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            id: Default::default(),
            keys: Arc::new([]),
            value: Bytes::new(),
            event_time: Utc::now(),
            headers: Arc::new(HashMap::new()),
        }
    }
}

impl Record {
    /// Creates a record with the given id and payload, everything else defaulted.
    pub fn new(id: impl Into<RecordId>, value: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Identifier of a [Record] within the upstream engine, usually the read offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub source: Arc<str>,
    pub offset: u64,
}

impl RecordId {
    pub fn new(source: impl Into<Arc<str>>, offset: u64) -> Self {
        Self {
            source: source.into(),
            offset,
        }
    }
}

impl From<u64> for RecordId {
    fn from(offset: u64) -> Self {
        Self {
            source: Arc::from(""),
            offset,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{}", self.offset)
        } else {
            write!(f, "{}-{}", self.source, self.offset)
        }
    }
}

/// Input of the sink. The variant is decided once, when the event is handed over, and the sink
/// dispatches on it.
#[derive(Debug, Clone)]
pub enum Event {
    /// A regular record to be written.
    Record(Record),
    /// Periodic timer signal, forces a flush of whatever is pending.
    Tick,
}

impl Event {
    pub fn is_tick(&self) -> bool {
        matches!(self, Event::Tick)
    }
}

impl From<Record> for Event {
    fn from(record: Record) -> Self {
        Event::Record(record)
    }
}

/// Outcome of a record as reported back to the upstream engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAck {
    /// Record was durably committed.
    Ack,
    /// Record was not committed, upstream should redeliver it.
    Nak,
}

impl fmt::Display for ReadAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadAck::Ack => write!(f, "Ack"),
            ReadAck::Nak => write!(f, "Nak"),
        }
    }
}
