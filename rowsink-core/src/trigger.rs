use crate::message::Event;

/// Decides whether the pending batch has to be committed after an event was processed. There are
/// two independent triggers: the batch reached `batch_size` records, or a tick arrived. Ticks
/// come through the same event stream as records, so no timer runs inside the sink.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushTrigger {
    batch_size: usize,
}

impl FlushTrigger {
    pub(crate) fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }

    /// `pending` is the batch size after the event was applied.
    pub(crate) fn should_flush(&self, event: &Event, pending: usize) -> bool {
        match event {
            Event::Tick => true,
            Event::Record(_) => pending >= self.batch_size,
        }
    }
}
