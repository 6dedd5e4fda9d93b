//! Prometheus metrics for the custody node
//!
//! Registered in the default registry; [`encode`] renders them in the text
//! exposition format for whatever scrape endpoint embeds the node.

use eyre::{Result, WrapErr};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // Consensus ingress
    pub static ref TXS_DELIVERED: CounterVec = register_counter_vec!(
        "custody_txs_delivered_total",
        "Total number of transactions delivered",
        &["kind", "result"]
    ).expect("metric registration");

    pub static ref LATEST_HEIGHT: Gauge = register_gauge!(
        "custody_latest_height",
        "Height of the last applied block"
    ).expect("metric registration");

    pub static ref INTERNAL_BROADCASTS: CounterVec = register_counter_vec!(
        "custody_internal_broadcasts_total",
        "Transactions submitted through the internal broadcast path",
        &["kind", "result"]
    ).expect("metric registration");

    // Jobs
    pub static ref JOBS_EXECUTED: CounterVec = register_counter_vec!(
        "custody_jobs_executed_total",
        "Total number of job executions",
        &["kind", "outcome"]
    ).expect("metric registration");

    pub static ref JOBS_PENDING: GaugeVec = register_gauge_vec!(
        "custody_jobs_pending",
        "Number of open jobs in the job store",
        &["status"]
    ).expect("metric registration");

    pub static ref JOB_LATENCY: HistogramVec = register_histogram_vec!(
        "custody_job_latency_seconds",
        "Time spent executing a single job",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).expect("metric registration");

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "custody_node_up",
        "Whether the node is up and running"
    ).expect("metric registration");

    pub static ref LAST_SUCCESSFUL_POLL: Gauge = register_gauge!(
        "custody_last_successful_poll_timestamp",
        "Unix timestamp of last successful scheduler poll"
    ).expect("metric registration");
}

pub fn record_tx_delivered(kind: &str, ok: bool) {
    TXS_DELIVERED
        .with_label_values(&[kind, if ok { "ok" } else { "rejected" }])
        .inc();
}

pub fn record_block_applied(height: u64) {
    LATEST_HEIGHT.set(height as f64);
}

pub fn record_internal_broadcast(kind: &str, result: &str) {
    INTERNAL_BROADCASTS.with_label_values(&[kind, result]).inc();
}

pub fn record_job(kind: &str, outcome: &str, seconds: f64) {
    JOBS_EXECUTED.with_label_values(&[kind, outcome]).inc();
    JOB_LATENCY.with_label_values(&[kind]).observe(seconds);
}

pub fn set_jobs_pending(new: i64, in_progress: i64) {
    JOBS_PENDING.with_label_values(&["new"]).set(new as f64);
    JOBS_PENDING
        .with_label_values(&["in_progress"])
        .set(in_progress as f64);
}

pub fn record_successful_poll() {
    LAST_SUCCESSFUL_POLL.set(chrono::Utc::now().timestamp() as f64);
}

pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}

/// Render every registered metric in the text exposition format.
pub fn encode() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .wrap_err("Failed to encode metrics")?;
    String::from_utf8(buffer).wrap_err("Metrics are not valid UTF-8")
}
