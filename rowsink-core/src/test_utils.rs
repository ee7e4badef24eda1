use std::sync::Arc;

use bytes::Bytes;

use crate::Result;
use crate::ack::Acknowledger;
use crate::error::Error;
use crate::mapper::MutationMapper;
use crate::message::Record;
use crate::mutation::{ColumnList, RowKey};

pub(crate) fn record(offset: u64, payload: &str) -> Record {
    Record::new(offset, payload.to_string())
}

/// Writes every record to the row named by its payload, one `cf:value` cell per record. An empty
/// payload cannot be mapped.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RowPerRecordMapper;

impl MutationMapper for RowPerRecordMapper {
    fn row_key(&self, record: &Record) -> Result<RowKey> {
        if record.value.is_empty() {
            return Err(Error::Mapping(format!("record {} is empty", record.id)));
        }
        Ok(record.value.clone())
    }

    fn columns(&self, record: &Record) -> Result<ColumnList> {
        Ok(ColumnList::new().add_column("cf", "value", record.value.clone()))
    }
}

#[derive(Debug, Default)]
pub(crate) struct AckLog {
    pub(crate) acked: Vec<u64>,
    pub(crate) failed: Vec<u64>,
    pub(crate) errors: Vec<Error>,
}

/// Remembers every outcome it is told about. Clones share the log.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingAcknowledger {
    log: Arc<parking_lot::Mutex<AckLog>>,
}

impl RecordingAcknowledger {
    pub(crate) fn acked(&self) -> Vec<u64> {
        self.log.lock().acked.clone()
    }

    pub(crate) fn failed(&self) -> Vec<u64> {
        self.log.lock().failed.clone()
    }

    pub(crate) fn errors(&self) -> Vec<Error> {
        self.log.lock().errors.clone()
    }
}

impl Acknowledger for RecordingAcknowledger {
    fn ack(&mut self, record: &Record) {
        self.log.lock().acked.push(record.id.offset);
    }

    fn fail(&mut self, record: &Record) {
        self.log.lock().failed.push(record.id.offset);
    }

    fn report_error(&mut self, err: &Error) {
        self.log.lock().errors.push(err.clone());
    }
}

pub(crate) fn row_key(name: &str) -> RowKey {
    Bytes::from(name.to_string())
}
