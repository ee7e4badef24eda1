//! The [SinkWriter] buffers records, commits them to the store in batches and reports the outcome
//! of every record back to the upstream engine.
//!
//! A flush is triggered by the batch reaching its size threshold or by a tick, whichever comes
//! first. A flush commits every pending mutation with a single call to the store. If the commit
//! succeeds every pending record is acked in arrival order; if anything in the cycle fails (mapping
//! a record, building its mutations, or the commit) the error is reported once and every pending
//! record is failed so the upstream can redeliver it. Either way the batch is emptied and the next
//! cycle starts from scratch. There are no retries in the sink, redelivery is the upstream's job.
//!
//! The writer is driven by a single task (see [SinkWriter::streaming_write]) so records, ticks and
//! commits never interleave. Ticks are merged into the same event stream as records, see
//! [spawn_ticker].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::ack::Acknowledger;
use crate::batch::Batch;
use crate::config::SinkConfig;
use crate::error::Error;
use crate::mapper::MutationMapper;
use crate::message::Event;
use crate::metrics::{sink_metrics, table_labels};
use crate::mutation::Durability;
use crate::store::WriteClient;
use crate::trigger::FlushTrigger;

/// Where the writer is in its flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// Accumulating records.
    Idle,
    /// The batch has been handed to the store.
    Committing,
    /// The commit succeeded, records are being acked.
    Acked,
    /// The cycle failed, records are being failed.
    Failed,
}

/// What processing an event did to the pending batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No flush happened, the records (if any) stay pending.
    Skipped,
    /// The batch was committed and this many records were acked.
    Acked(usize),
    /// The cycle failed and this many records were failed.
    Failed(usize),
}

/// Batches records into store mutations and commits them. See the [module](self) docs.
pub struct SinkWriter<M, C, A> {
    table: Arc<str>,
    durability: Durability,
    batch_size: usize,
    trigger: FlushTrigger,
    batch: Batch,
    state: CommitState,
    mapper: M,
    client: C,
    acknowledger: A,
    labels: Vec<(String, String)>,
}

impl<M, C, A> SinkWriter<M, C, A>
where
    M: MutationMapper,
    C: WriteClient,
    A: Acknowledger,
{
    pub fn new(config: &SinkConfig, mapper: M, client: C, acknowledger: A) -> Self {
        Self {
            table: Arc::from(config.table()),
            durability: config.durability(),
            batch_size: config.batch_size(),
            trigger: FlushTrigger::new(config.batch_size()),
            batch: Batch::new(),
            state: CommitState::Idle,
            mapper,
            client,
            acknowledger,
            labels: table_labels(config.table()),
        }
    }

    /// Number of records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.batch.size()
    }

    /// Outside of [Self::process] this is always [CommitState::Idle], a cycle ends within the
    /// call that started it.
    pub fn state(&self) -> CommitState {
        self.state
    }

    fn transition(&mut self, next: CommitState) {
        debug!(from = ?self.state, to = ?next, table = %self.table, "Commit state changed");
        self.state = next;
    }

    /// Applies one event. A record is mapped and appended to the batch, then the batch is flushed
    /// if the event triggers a flush. Processing never fails, failures are reported through the
    /// acknowledger and the returned [FlushOutcome].
    pub async fn process(&mut self, event: Event) -> FlushOutcome {
        let outcome = match self.stage(&event) {
            Err(e) => self.fail_pending(e),
            Ok(pending) if self.trigger.should_flush(&event, pending) => self.flush().await,
            Ok(_) => FlushOutcome::Skipped,
        };

        sink_metrics()
            .pending
            .get_or_create(&self.labels)
            .set(self.batch.size() as i64);
        outcome
    }

    fn stage(&mut self, event: &Event) -> Result<usize> {
        match event {
            Event::Tick => {
                debug!(pending = self.batch.size(), "Tick received");
            }
            Event::Record(record) => {
                self.batch.append(
                    record.clone(),
                    &self.mapper,
                    &self.client,
                    self.durability,
                )?;
            }
        }
        Ok(self.batch.size())
    }

    async fn flush(&mut self) -> FlushOutcome {
        if self.batch.is_empty() {
            return FlushOutcome::Skipped;
        }

        self.transition(CommitState::Committing);
        let start = Instant::now();
        let result = self.client.batch_mutate(self.batch.mutations()).await;
        sink_metrics()
            .commit_time
            .get_or_create(&self.labels)
            .observe(start.elapsed().as_micros() as f64);

        if let Err(e) = result {
            return self.fail_pending(e);
        }

        self.transition(CommitState::Acked);
        let count = self.batch.size();
        debug!(
            count,
            mutations = self.batch.mutations().len(),
            "Batch committed, acknowledging records"
        );
        for record in self.batch.records() {
            self.acknowledger.ack(record);
        }

        let metrics = sink_metrics();
        metrics
            .ack_total
            .get_or_create(&self.labels)
            .inc_by(count as u64);
        metrics.flush_total.get_or_create(&self.labels).inc();

        self.batch.clear();
        self.transition(CommitState::Idle);
        FlushOutcome::Acked(count)
    }

    /// Ends the current cycle as failed: reports `err` once and fails every pending record.
    fn fail_pending(&mut self, err: Error) -> FlushOutcome {
        self.transition(CommitState::Failed);
        let count = self.batch.size();
        error!(?err, count, table = %self.table, "Flush failed, failing pending records");

        self.acknowledger.report_error(&err);
        for record in self.batch.records() {
            self.acknowledger.fail(record);
        }

        let metrics = sink_metrics();
        metrics
            .fail_total
            .get_or_create(&self.labels)
            .inc_by(count as u64);
        metrics.commit_error_total.get_or_create(&self.labels).inc();

        self.batch.clear();
        self.transition(CommitState::Idle);
        FlushOutcome::Failed(count)
    }

    /// Fails the pending records without trying to commit them.
    fn abandon(&mut self) -> usize {
        let count = self.batch.size();
        if count == 0 {
            return 0;
        }

        warn!(count, table = %self.table, "Failing pending records without committing");
        for record in self.batch.records() {
            self.acknowledger.fail(record);
        }
        sink_metrics()
            .fail_total
            .get_or_create(&self.labels)
            .inc_by(count as u64);
        sink_metrics().pending.get_or_create(&self.labels).set(0);
        self.batch.clear();
        count
    }
}

impl<M, C, A> SinkWriter<M, C, A>
where
    M: MutationMapper + 'static,
    C: WriteClient + 'static,
    A: Acknowledger + 'static,
{
    /// Processes the events until the stream is closed or the cancellation token is triggered.
    /// When the stream closes, whatever is still pending gets one final flush and the handle
    /// resolves to an error if that flush failed. On cancellation the pending records are failed
    /// without a commit.
    pub fn streaming_write(
        mut self,
        mut events: ReceiverStream<Event>,
        cln_token: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            info!(
                table = %self.table,
                batch_size = self.batch_size,
                durability = %self.durability,
                "Starting sink writer"
            );

            loop {
                let event = tokio::select! {
                    biased;
                    _ = cln_token.cancelled() => {
                        let failed = self.abandon();
                        info!(failed, "Cancellation token triggered, stopping sink writer");
                        return Ok(());
                    }
                    event = events.next() => event,
                };

                let Some(event) = event else {
                    break;
                };
                self.process(event).await;
            }

            info!(
                pending = self.batch.size(),
                "Input stream closed, flushing pending records"
            );
            match self.process(Event::Tick).await {
                FlushOutcome::Failed(count) => Err(Error::Commit(format!(
                    "final flush failed, {count} records were not committed"
                ))),
                FlushOutcome::Acked(_) | FlushOutcome::Skipped => Ok(()),
            }
        })
    }
}

/// Sends an [Event::Tick] every `interval` until the token is cancelled or the receiving end is
/// dropped. The first tick is sent one full interval after the start.
///
/// A zero `interval` sends no ticks at all: the returned task drops `tx` and finishes right away.
pub fn spawn_ticker(
    tx: mpsc::Sender<Event>,
    interval: Duration,
    cln_token: CancellationToken,
) -> JoinHandle<()> {
    if interval.is_zero() {
        warn!("Flush interval is zero, not sending ticks");
        drop(tx);
        return tokio::spawn(async {});
    }

    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cln_token.cancelled() => break,
                _ = ticker.tick() => {
                    if tx.send(Event::Tick).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Ticker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{Mutation, RowKey};
    use crate::store::MemoryStore;
    use crate::test_utils::{RecordingAcknowledger, RowPerRecordMapper, record, row_key};

    type TestWriter = SinkWriter<RowPerRecordMapper, MemoryStore, RecordingAcknowledger>;

    fn writer(batch_size: usize) -> (TestWriter, MemoryStore, RecordingAcknowledger) {
        let config = SinkConfig::builder("words")
            .batch_size(batch_size)
            .build()
            .unwrap();
        let store = MemoryStore::new("words");
        let acker = RecordingAcknowledger::default();
        let writer = SinkWriter::new(&config, RowPerRecordMapper, store.clone(), acker.clone());
        (writer, store, acker)
    }

    fn rows(mutations: &[Mutation]) -> Vec<RowKey> {
        mutations.iter().map(|m| m.row().clone()).collect()
    }

    #[tokio::test]
    async fn test_flush_on_batch_size() {
        let (mut writer, store, acker) = writer(3);

        assert_eq!(
            writer.process(record(0, "a").into()).await,
            FlushOutcome::Skipped
        );
        assert_eq!(
            writer.process(record(1, "b").into()).await,
            FlushOutcome::Skipped
        );
        assert!(store.commits().is_empty());
        assert!(acker.acked().is_empty());

        assert_eq!(
            writer.process(record(2, "c").into()).await,
            FlushOutcome::Acked(3)
        );

        let commits = store.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(
            rows(&commits[0]),
            vec![row_key("a"), row_key("b"), row_key("c")]
        );
        assert_eq!(acker.acked(), vec![0, 1, 2]);
        assert!(acker.failed().is_empty());
        assert!(acker.errors().is_empty());
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.state(), CommitState::Idle);
    }

    #[tokio::test]
    async fn test_one_flush_per_threshold() {
        for batch_size in [1, 2, 5, 10] {
            let (mut writer, store, acker) = writer(batch_size);
            let mut flushes = 0;
            for i in 0..batch_size {
                let outcome = writer.process(record(i as u64, "row").into()).await;
                if outcome != FlushOutcome::Skipped {
                    flushes += 1;
                    assert_eq!(outcome, FlushOutcome::Acked(batch_size));
                }
            }
            assert_eq!(flushes, 1);
            assert_eq!(store.commits().len(), 1);
            assert_eq!(acker.acked().len(), batch_size);
            assert_eq!(writer.pending(), 0);
        }
    }

    #[tokio::test]
    async fn test_flush_on_tick() {
        let (mut writer, store, acker) = writer(100);

        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            assert_eq!(
                writer.process(record(i as u64, name).into()).await,
                FlushOutcome::Skipped
            );
        }
        assert!(store.commits().is_empty());
        assert_eq!(writer.pending(), 3);

        assert_eq!(writer.process(Event::Tick).await, FlushOutcome::Acked(3));
        assert_eq!(store.commits().len(), 1);
        assert_eq!(store.commits()[0].len(), 3);
        assert_eq!(acker.acked(), vec![0, 1, 2]);
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn test_tick_on_empty_batch() {
        let (mut writer, store, acker) = writer(100);

        assert_eq!(writer.process(Event::Tick).await, FlushOutcome::Skipped);
        assert!(store.commits().is_empty());
        assert!(acker.acked().is_empty());
        assert!(acker.failed().is_empty());
        assert!(acker.errors().is_empty());
        assert_eq!(writer.state(), CommitState::Idle);
    }

    #[tokio::test]
    async fn test_commit_failure_fails_batch() {
        let (mut writer, store, acker) = writer(2);
        store.error_injector().fail_commits(1);

        assert_eq!(
            writer.process(record(0, "a").into()).await,
            FlushOutcome::Skipped
        );
        assert_eq!(
            writer.process(record(1, "b").into()).await,
            FlushOutcome::Failed(2)
        );
        assert_eq!(acker.failed(), vec![0, 1]);
        assert!(acker.acked().is_empty());
        assert_eq!(acker.errors().len(), 1);
        assert!(matches!(acker.errors()[0], Error::Commit(_)));
        assert_eq!(store.row_count(), 0);
        assert_eq!(writer.pending(), 0);

        // the next cycle starts from scratch
        assert_eq!(
            writer.process(record(2, "c").into()).await,
            FlushOutcome::Skipped
        );
        assert_eq!(writer.process(Event::Tick).await, FlushOutcome::Acked(1));
        assert_eq!(acker.acked(), vec![2]);
        assert_eq!(acker.failed(), vec![0, 1]);
        assert_eq!(acker.errors().len(), 1);

        let commits = store.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(rows(&commits[0]), vec![row_key("c")]);
        assert!(store.row(&row_key("a")).is_none());
        assert!(store.row(&row_key("c")).is_some());
    }

    #[tokio::test]
    async fn test_failure_leaves_committed_records_alone() {
        let (mut writer, store, acker) = writer(2);

        writer.process(record(0, "a").into()).await;
        assert_eq!(
            writer.process(record(1, "b").into()).await,
            FlushOutcome::Acked(2)
        );

        store.error_injector().fail_commits(1);
        assert_eq!(
            writer.process(record(2, "c").into()).await,
            FlushOutcome::Skipped
        );
        assert_eq!(writer.process(Event::Tick).await, FlushOutcome::Failed(1));

        // only the record of the failed cycle is failed
        assert_eq!(acker.acked(), vec![0, 1]);
        assert_eq!(acker.failed(), vec![2]);
        assert_eq!(acker.errors().len(), 1);
        assert!(matches!(acker.errors()[0], Error::Commit(_)));

        let commits = store.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(rows(&commits[0]), vec![row_key("a"), row_key("b")]);
        assert!(store.row(&row_key("a")).is_some());
        assert!(store.row(&row_key("c")).is_none());
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.state(), CommitState::Idle);
    }

    #[tokio::test]
    async fn test_state_is_idle_between_events() {
        let (mut writer, store, _) = writer(1);

        writer.process(record(0, "a").into()).await;
        assert_eq!(writer.state(), CommitState::Idle);

        store.error_injector().fail_commits(1);
        writer.process(record(1, "b").into()).await;
        assert_eq!(writer.state(), CommitState::Idle);

        writer.process(record(2, "").into()).await;
        assert_eq!(writer.state(), CommitState::Idle);
    }

    #[tokio::test]
    async fn test_mapping_failure_fails_batch() {
        let (mut writer, store, acker) = writer(100);

        assert_eq!(
            writer.process(record(0, "a").into()).await,
            FlushOutcome::Skipped
        );
        // empty payload cannot be mapped
        assert_eq!(
            writer.process(record(1, "").into()).await,
            FlushOutcome::Failed(2)
        );
        assert_eq!(acker.failed(), vec![0, 1]);
        assert_eq!(acker.errors().len(), 1);
        assert!(matches!(acker.errors()[0], Error::Mapping(_)));
        assert!(store.commits().is_empty());

        // nothing left to flush
        assert_eq!(writer.process(Event::Tick).await, FlushOutcome::Skipped);
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn test_construct_failure_fails_batch() {
        let (mut writer, store, acker) = writer(100);
        store.error_injector().fail_constructs(1);

        assert_eq!(
            writer.process(record(0, "a").into()).await,
            FlushOutcome::Failed(1)
        );
        assert_eq!(acker.failed(), vec![0]);
        assert!(matches!(acker.errors()[0], Error::Mutation(_)));

        assert_eq!(
            writer.process(record(1, "b").into()).await,
            FlushOutcome::Skipped
        );
        assert_eq!(writer.process(Event::Tick).await, FlushOutcome::Acked(1));
        assert_eq!(acker.acked(), vec![1]);
    }

    #[tokio::test]
    async fn test_same_row_in_one_batch() {
        let (mut writer, store, acker) = writer(2);

        writer.process(record(0, "a").into()).await;
        assert_eq!(
            writer.process(record(1, "a").into()).await,
            FlushOutcome::Acked(2)
        );
        assert_eq!(store.commits()[0].len(), 2);
        assert_eq!(store.row_count(), 1);
        assert_eq!(acker.acked(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_streaming_write_flushes_on_close() {
        let (writer, store, acker) = writer(100);
        let (tx, rx) = mpsc::channel(10);
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            tx.send(record(i as u64, name).into()).await.unwrap();
        }
        drop(tx);

        let handle = writer.streaming_write(ReceiverStream::new(rx), CancellationToken::new());
        handle.await.unwrap().unwrap();

        assert_eq!(acker.acked(), vec![0, 1, 2]);
        assert_eq!(store.commits().len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_write_final_flush_failure() {
        let (writer, store, acker) = writer(100);
        store.error_injector().fail_commits(1);
        let (tx, rx) = mpsc::channel(10);
        tx.send(record(0, "a").into()).await.unwrap();
        drop(tx);

        let handle = writer.streaming_write(ReceiverStream::new(rx), CancellationToken::new());
        let err = handle.await.unwrap().unwrap_err();

        assert!(matches!(err, Error::Commit(_)));
        assert_eq!(acker.failed(), vec![0]);
    }

    #[tokio::test]
    async fn test_streaming_write_cancel_fails_pending() {
        let (writer, store, acker) = writer(100);
        let cln_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(10);

        let handle = writer.streaming_write(ReceiverStream::new(rx), cln_token.clone());
        tx.send(record(0, "a").into()).await.unwrap();
        tx.send(record(1, "b").into()).await.unwrap();

        // give the writer time to pick up both records
        tokio::time::sleep(Duration::from_millis(100)).await;
        cln_token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(acker.failed(), vec![0, 1]);
        assert!(acker.acked().is_empty());
        assert!(acker.errors().is_empty());
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn test_streaming_write_with_ticker() {
        let (writer, store, acker) = writer(100);
        let cln_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(10);

        let ticker = spawn_ticker(tx.clone(), Duration::from_millis(20), cln_token.clone());
        let handle = writer.streaming_write(ReceiverStream::new(rx), CancellationToken::new());

        tx.send(record(0, "a").into()).await.unwrap();
        tx.send(record(1, "b").into()).await.unwrap();

        // wait for a tick to commit the records
        let mut committed = false;
        for _ in 0..100 {
            if acker.acked().len() == 2 {
                committed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(committed);

        cln_token.cancel();
        ticker.await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        assert_eq!(acker.acked(), vec![0, 1]);
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_interval() {
        let cln_token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(10);
        let start = Instant::now();

        let ticker = spawn_ticker(tx, Duration::from_secs(5), cln_token.clone());
        assert!(rx.recv().await.unwrap().is_tick());
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(rx.recv().await.unwrap().is_tick());
        assert!(start.elapsed() >= Duration::from_secs(10));

        cln_token.cancel();
        ticker.await.unwrap();
        // the ticker owned the only sender, the channel closes once it stops
        while let Some(event) = rx.recv().await {
            assert!(event.is_tick());
        }
    }

    #[tokio::test]
    async fn test_ticker_zero_interval() {
        let (tx, mut rx) = mpsc::channel(10);

        let ticker = spawn_ticker(tx, Duration::ZERO, CancellationToken::new());
        ticker.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
