//! Prometheus metrics of the sink. All metrics live in one global registry and are labeled by the
//! target table, so several sinks in one process can be told apart.

use std::fmt;
use std::iter;
use std::sync::OnceLock;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

// The top-level metric registry is created with the GLOBAL_PREFIX
const REGISTRY_GLOBAL_PREFIX: &str = "rowsink";

const TABLE_LABEL: &str = "table";

// counters, the `_total` suffix is added by the prometheus client based on the metric type
const ACK_TOTAL: &str = "ack";
const FAIL_TOTAL: &str = "fail";
const FLUSH_TOTAL: &str = "flush";
const COMMIT_ERROR_TOTAL: &str = "commit_error";

// gauge
const PENDING: &str = "pending";

// timer
const COMMIT_TIME: &str = "commit_time";

/// The global register of all metrics.
#[derive(Default)]
struct GlobalRegistry {
    // It is okay to use a sync mutex because each metric is registered only once.
    registry: parking_lot::Mutex<Registry>,
}

static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(GlobalRegistry::default)
}

type Labels = Vec<(String, String)>;

/// Metrics of the sink writer. Each metric is a family differentiated by the [table_labels].
pub(crate) struct SinkMetrics {
    /// records acknowledged after a successful commit
    pub(crate) ack_total: Family<Labels, Counter>,
    /// records failed because their flush cycle failed, or the sink was cancelled
    pub(crate) fail_total: Family<Labels, Counter>,
    /// flush cycles which committed at least one record
    pub(crate) flush_total: Family<Labels, Counter>,
    /// flush cycles which failed
    pub(crate) commit_error_total: Family<Labels, Counter>,
    /// records buffered, waiting for the next flush
    pub(crate) pending: Family<Labels, Gauge>,
    /// time taken by the store to commit a batch, in microseconds
    pub(crate) commit_time: Family<Labels, Histogram>,
}

impl SinkMetrics {
    fn new() -> Self {
        let metrics = Self {
            ack_total: Family::<Labels, Counter>::default(),
            fail_total: Family::<Labels, Counter>::default(),
            flush_total: Family::<Labels, Counter>::default(),
            commit_error_total: Family::<Labels, Counter>::default(),
            pending: Family::<Labels, Gauge>::default(),
            // 100 microseconds to 2 minutes
            commit_time: Family::<Labels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets_range(100.0, 60_000_000.0 * 2.0, 10))
            }),
        };

        let mut registry = global_registry().registry.lock();
        let registry = registry.sub_registry_with_prefix(REGISTRY_GLOBAL_PREFIX);
        registry.register(
            ACK_TOTAL,
            "A Counter to keep track of the total number of records acknowledged after a commit",
            metrics.ack_total.clone(),
        );
        registry.register(
            FAIL_TOTAL,
            "A Counter to keep track of the total number of records failed back to the upstream",
            metrics.fail_total.clone(),
        );
        registry.register(
            FLUSH_TOTAL,
            "A Counter to keep track of the total number of successful flushes",
            metrics.flush_total.clone(),
        );
        registry.register(
            COMMIT_ERROR_TOTAL,
            "A Counter to keep track of the total number of failed flushes",
            metrics.commit_error_total.clone(),
        );
        registry.register(
            PENDING,
            "A Gauge to keep track of the number of records waiting for the next flush",
            metrics.pending.clone(),
        );
        registry.register(
            COMMIT_TIME,
            "A Histogram to keep track of the time taken to commit a batch, in microseconds",
            metrics.commit_time.clone(),
        );
        metrics
    }
}

static SINK_METRICS: OnceLock<SinkMetrics> = OnceLock::new();

pub(crate) fn sink_metrics() -> &'static SinkMetrics {
    SINK_METRICS.get_or_init(SinkMetrics::new)
}

pub(crate) fn table_labels(table: &str) -> Labels {
    vec![(TABLE_LABEL.to_string(), table.to_string())]
}

/// Renders a snapshot of every registered metric in the OpenMetrics text format.
pub fn metrics_text() -> Result<String, fmt::Error> {
    // make sure the sink metrics are registered even if no sink ran yet
    sink_metrics();
    let state = global_registry().registry.lock();
    let mut buffer = String::new();
    encode(&mut buffer, &state)?;
    Ok(buffer)
}

/// Creates `length` exponential buckets, the lowest is `min` and the highest is `max`. The +Inf
/// bucket is implicit.
fn exponential_buckets_range(min: f64, max: f64, length: u16) -> impl Iterator<Item = f64> {
    assert!(length > 1, "bucket range needs at least two buckets");
    assert!(min > 0.0, "bucket range min needs to be greater than 0");

    let growth_factor = (max / min).powf(1.0 / (length as f64 - 1.0));
    iter::successors(Some(min), move |bucket| Some(bucket * growth_factor)).take(length.into())
}
