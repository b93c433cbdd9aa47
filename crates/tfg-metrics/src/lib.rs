// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Prometheus metrics for the TrustFabric gateway."]
#![deny(unsafe_code)]

//! All gateway metrics live on one dedicated [`Registry`] and follow the
//! naming convention `tfg_<metric>_<unit>`. Collection is external; this
//! crate only exposes the text exposition for `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramVec, Opts, Registry, TextEncoder,
};

/// Errors from metrics exposition.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus encoder failed.
    #[error("metrics encoding failed: {0}")]
    Encode(#[from] prometheus::Error),

    /// The encoded exposition was not valid UTF-8.
    #[error("metrics exposition was not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

lazy_static! {
    /// Registry holding every gateway metric.
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Exchange counters ──────────────────────────────────────────

    /// Total verified exchanges.
    pub static ref EXCHANGES_TOTAL: Counter = register_counter(
        "tfg_exchanges_total",
        "Total verified exchanges"
    );

    /// Denied exchanges by reason code.
    pub static ref DENIED_TOTAL: CounterVec = register_counter_vec(
        "tfg_denied_total",
        "Total denied exchanges",
        &["reason"]
    );

    /// Forwarded exchanges by downstream host.
    pub static ref FORWARD_TOTAL: CounterVec = register_counter_vec(
        "tfg_forward_total",
        "Total forwarded exchanges",
        &["host"]
    );

    /// Idempotency cache hits.
    pub static ref IDEMPOTENT_HITS_TOTAL: Counter = register_counter(
        "tfg_idempotent_hits_total",
        "Total idempotency cache hits"
    );

    // ── Repair / fallback counters ─────────────────────────────────

    /// Repair attempts (heuristic ladder entered).
    pub static ref REPAIR_ATTEMPTS_TOTAL: Counter = register_counter(
        "tfg_repair_attempts_total",
        "Total repair attempts"
    );

    /// Repairs that produced valid JSON.
    pub static ref REPAIR_SUCCESS_TOTAL: Counter = register_counter(
        "tfg_repair_success_total",
        "Successful repairs producing valid JSON"
    );

    /// Exchanges that consumed the LLM fallback.
    pub static ref FALLBACK_USED_TOTAL: Counter = register_counter(
        "tfg_fallback_used_total",
        "Total fallback used"
    );

    /// Semantic-invariant violations raised by fallback repairs.
    pub static ref SEMANTIC_VIOLATION_TOTAL: Counter = register_counter(
        "tfg_semantic_violation_total",
        "Semantic invariant violations during fallback repair"
    );

    // ── Billing / usage counters ───────────────────────────────────

    /// Verified Exchange units billed.
    pub static ref VEX_UNITS_TOTAL: Counter = register_counter(
        "tfg_vex_units_total",
        "Total Verified Exchange (VEx) units billed"
    );

    /// Fallback Unit tokens consumed.
    pub static ref FU_TOKENS_TOTAL: Counter = register_counter(
        "tfg_fu_tokens_total",
        "Total Fallback Unit (FU) tokens consumed"
    );

    /// Billing enqueue operations by type (`vex` or `fu`).
    pub static ref BILLING_ENQUEUE_TOTAL: CounterVec = register_counter_vec(
        "tfg_billing_enqueue_total",
        "Billing enqueue operations",
        &["type"]
    );

    // ── Latency histograms ─────────────────────────────────────────

    /// End-to-end exchange latency.
    pub static ref EXCHANGE_LATENCY: Histogram = register_histogram(
        "tfg_exchange_total_latency_seconds",
        "End-to-end exchange latency in seconds"
    );

    /// Per-phase exchange latency.
    pub static ref PHASE_LATENCY: HistogramVec = register_histogram_vec(
        "tfg_exchange_phase_latency_seconds",
        "Per-phase exchange latency in seconds",
        &["phase"]
    );

    // ── Capacity gauges ────────────────────────────────────────────

    /// Reserved VEx capacity per tenant.
    pub static ref RESERVED_VEX_CAPACITY: GaugeVec = register_gauge_vec(
        "tfg_reserved_vex_capacity",
        "Reserved VEx capacity per tenant",
        &["tenant"]
    );

    /// Reserved FU capacity per tenant.
    pub static ref RESERVED_FU_CAPACITY: GaugeVec = register_gauge_vec(
        "tfg_reserved_fu_capacity",
        "Reserved FU capacity per tenant",
        &["tenant"]
    );
}

fn register_counter(name: &str, help: &str) -> Counter {
    let c = Counter::new(name, help).expect("counter options are static");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric registered once");
    c
}

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter options are static");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric registered once");
    c
}

fn register_histogram(name: &str, help: &str) -> Histogram {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(name, help))
        .expect("histogram options are static");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric registered once");
    h
}

fn register_histogram_vec(name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(prometheus::HistogramOpts::new(name, help), labels)
        .expect("histogram options are static");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric registered once");
    h
}

fn register_gauge_vec(name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge options are static");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric registered once");
    g
}

/// Publish the reserved-capacity gauges for a tenant.
///
/// Metrics failures must never break the request path, so this swallows
/// label errors (there are none with static label sets).
pub fn update_reserved_capacity(tenant: &str, vex: u64, fu: u64) {
    RESERVED_VEX_CAPACITY
        .with_label_values(&[tenant])
        .set(vex as f64);
    RESERVED_FU_CAPACITY
        .with_label_values(&[tenant])
        .set(fu as f64);
}

/// Observe one phase duration in seconds.
pub fn observe_phase(phase: &str, seconds: f64) {
    PHASE_LATENCY.with_label_values(&[phase]).observe(seconds);
}

/// Render the full registry in Prometheus text exposition format.
///
/// # Errors
///
/// Returns [`MetricsError`] if encoding fails.
pub fn gather_text() -> Result<String, MetricsError> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
