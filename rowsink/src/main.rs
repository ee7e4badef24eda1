use std::env;
use std::error::Error;

use bytes::Bytes;
use chrono::Utc;
use clap::ArgMatches;
use rowsink_core::config::ENGINE_MESSAGE_TIMEOUT_SECS;
use rowsink_core::{
    AckMessage, ChannelAcknowledger, EngineConfig, Event, JsonFieldMapper, JsonFieldMapperConfig,
    ReadAck, Record, RecordId, Settings, SinkConfig, SinkWriter, StoreType, spawn_ticker, store,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod cmdline;
mod setup_tracing;

/// source name of the records read from stdin
const STDIN_SOURCE: &str = "stdin";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    let cli = cmdline::root_cli().get_matches();
    let result = match cli.subcommand() {
        Some(("run", args)) => run(args).await,
        other => Err(format!("Invalid subcommand {:?}", other.map(|(name, _)| name)).into()),
    };

    if let Err(e) = result {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");
    Ok(())
}

async fn run(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let settings = if args.get_flag("from-env") {
        Settings::load(env::vars())?
    } else {
        settings_from_args(args)?
    };
    let sink = &settings.sink;

    let resolved = sink.resolve(&settings.engine)?;
    let engine = resolved.component_configuration(&settings.engine);
    info!(
        table = sink.table(),
        batch_size = sink.batch_size(),
        tick_freq_secs = ?engine.tick_freq_secs(),
        "Resolved sink configuration"
    );

    let mapper_config = sink
        .mapper()
        .cloned()
        .ok_or("mapper is not configured")?;
    let mapper = JsonFieldMapper::new(mapper_config)?;
    let client = store::connect(sink.table(), &resolved.store_settings, sink.store_type())?;
    let (acknowledger, ack_rx) = ChannelAcknowledger::channel();
    let ack_handle = tokio::spawn(log_acks(ack_rx));

    let cln_token = CancellationToken::new();
    let shutdown_handle = tokio::spawn(shutdown_signal(cln_token.clone()));

    let (tx, rx) = mpsc::channel(sink.batch_size().min(1000));
    let writer = SinkWriter::new(sink, mapper, client, acknowledger);
    let sink_handle = writer.streaming_write(ReceiverStream::new(rx), cln_token.clone());

    // the ticker gets its own token, it has to stop as soon as the input is exhausted so the
    // event channel can close
    let ticker_token = CancellationToken::new();
    let ticker_handle = spawn_ticker(tx.clone(), resolved.flush_interval, ticker_token.clone());

    let read = read_stdin(tx, cln_token.clone()).await;
    ticker_token.cancel();
    ticker_handle.await?;

    let written = sink_handle.await?;
    shutdown_handle.abort();
    let (acked, failed) = ack_handle.await?;
    info!(acked, failed, "Sink stopped");

    if args.get_flag("metrics") {
        println!("{}", rowsink_core::metrics_text()?);
    }

    read?;
    written?;
    Ok(())
}

fn settings_from_args(args: &ArgMatches) -> Result<Settings, Box<dyn Error>> {
    let table = arg::<String>(args, "table")?;
    let store_type: StoreType = arg::<String>(args, "store")?.parse()?;
    let mapper = JsonFieldMapperConfig {
        row_key_field: arg(args, "row-key-field")?,
        column_family: arg(args, "column-family")?,
        column_fields: many(args, "columns"),
        counter_fields: many(args, "counters"),
    };

    let sink = SinkConfig::builder(table)
        .batch_size(arg(args, "batch-size")?)
        .flush_interval_secs(arg(args, "flush-interval-secs")?)
        .write_to_wal(!args.get_flag("skip-wal"))
        .store_type(store_type)
        .mapper(mapper)
        .build()?;

    // builtin stores have no connection settings
    let engine = EngineConfig::new()
        .with(
            ENGINE_MESSAGE_TIMEOUT_SECS,
            arg::<u64>(args, "message-timeout-secs")?,
        )
        .with(sink.store_config_key(), serde_json::json!({}));

    Ok(Settings { sink, engine })
}

fn arg<T: Clone + Send + Sync + 'static>(
    args: &ArgMatches,
    name: &str,
) -> Result<T, Box<dyn Error>> {
    args.get_one::<T>(name)
        .cloned()
        .ok_or_else(|| format!("--{name} is not set").into())
}

fn many(args: &ArgMatches, name: &str) -> Vec<String> {
    args.get_many::<String>(name)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

/// Plays the upstream engine: every non-empty stdin line becomes a record. Returns when stdin is
/// exhausted or the token is cancelled, dropping the sender.
async fn read_stdin(
    tx: mpsc::Sender<Event>,
    cln_token: CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut offset = 0;

    loop {
        let line = tokio::select! {
            _ = cln_token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!(records = offset, "Reached end of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let record = Record {
            id: RecordId::new(STDIN_SOURCE, offset),
            value: Bytes::from(line),
            event_time: Utc::now(),
            ..Default::default()
        };
        offset += 1;
        if tx.send(record.into()).await.is_err() {
            warn!("Sink writer stopped, no longer reading input");
            break;
        }
    }
    Ok(())
}

/// Logs the outcome of every record and counts the acks and fails.
async fn log_acks(mut ack_rx: mpsc::UnboundedReceiver<AckMessage>) -> (u64, u64) {
    let (mut acked, mut failed) = (0, 0);
    while let Some(msg) = ack_rx.recv().await {
        match msg {
            AckMessage::Record {
                ack: ReadAck::Ack, ..
            } => acked += 1,
            AckMessage::Record {
                id,
                ack: ReadAck::Nak,
            } => {
                failed += 1;
                warn!(%id, "Record was not written");
            }
            AckMessage::Error(e) => error!(?e, "Flush failed"),
        }
    }
    (acked, failed)
}

async fn shutdown_signal(cln_token: CancellationToken) {
    if let Err(e) = signal::ctrl_c().await {
        error!(?e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Received Ctrl-C, shutting down");
    cln_token.cancel();
}
