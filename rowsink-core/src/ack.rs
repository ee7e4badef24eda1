//! Acknowledgment back to the upstream engine. The sink never decides what happens to a failed
//! record, it only reports the outcome: `ack` once the record's batch is committed, `fail` when
//! the batch could not be committed (upstream redelivers), and `report_error` once per failed
//! cycle on the engine's diagnostic channel.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::message::{ReadAck, Record, RecordId};

/// Capability handed to the sink at construction to report record outcomes.
pub trait Acknowledger: Send {
    /// Record was committed.
    fn ack(&mut self, record: &Record);

    /// Record was not committed.
    fn fail(&mut self, record: &Record);

    /// A flush cycle failed with `err`. Called once per failed cycle.
    fn report_error(&mut self, err: &Error);
}

/// What the [ChannelAcknowledger] sends to the upstream engine.
#[derive(Debug, Clone, PartialEq)]
pub enum AckMessage {
    Record { id: RecordId, ack: ReadAck },
    Error(Error),
}

/// Sends the outcomes over a channel to the upstream engine.
#[derive(Debug, Clone)]
pub struct ChannelAcknowledger {
    tx: mpsc::UnboundedSender<AckMessage>,
}

impl ChannelAcknowledger {
    pub fn new(tx: mpsc::UnboundedSender<AckMessage>) -> Self {
        Self { tx }
    }

    /// Creates the acknowledger and the receiving end the upstream engine listens on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AckMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, msg: AckMessage) {
        // the upstream engine went away, it will redeliver whatever it did not hear about
        if let Err(e) = self.tx.send(msg) {
            warn!(msg = ?e.0, "Ack channel is closed, dropping acknowledgment");
        }
    }
}

impl Acknowledger for ChannelAcknowledger {
    fn ack(&mut self, record: &Record) {
        self.send(AckMessage::Record {
            id: record.id.clone(),
            ack: ReadAck::Ack,
        });
    }

    fn fail(&mut self, record: &Record) {
        self.send(AckMessage::Record {
            id: record.id.clone(),
            ack: ReadAck::Nak,
        });
    }

    fn report_error(&mut self, err: &Error) {
        self.send(AckMessage::Error(err.clone()));
    }
}

/// Writes the outcomes to the log. Used when the upstream has no way to redeliver.
#[derive(Debug, Clone, Default)]
pub struct LogAcknowledger;

impl Acknowledger for LogAcknowledger {
    fn ack(&mut self, record: &Record) {
        info!(id = %record.id, "ack");
    }

    fn fail(&mut self, record: &Record) {
        warn!(id = %record.id, "fail");
    }

    fn report_error(&mut self, err: &Error) {
        error!(?err, "Flush failed");
    }
}
