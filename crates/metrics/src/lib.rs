#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Prometheus metrics for the prime-cluster miner.
//!
//! - `prime_sieved_bits_total`: candidates covered by completed sieve windows
//! - `prime_tests_total`: primality tests run by compaction and testing
//! - `prime_candidates_checked_total{offset}` / `prime_candidates_found_total{offset}`
//! - `prime_chains_total{length}`: scored chains by length
//! - `prime_largest_difficulty`: best chain difficulty seen
//! - `prime_sieve_rate` / `prime_test_rate`: rolling rates per second
//! - `prime_work_queue_depth`, `prime_rounds_total`, `prime_blocks_found_total`
//! - worker gauges and `miner_effective_cpus`
//!
//! Counters are fed from cumulative totals: callers report the running total
//! and the registry advances by the difference.
//!
//! Optionally runs a Warp-based HTTP endpoint (`/metrics`) when the
//! `http-exporter` feature is enabled.

use once_cell::sync::Lazy;
use anyhow::Result;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Mutex;
use std::time::Instant;

#[cfg(feature = "http-exporter")]
use {std::net::SocketAddr, warp::Filter};

// ---------------------------------------------------------------------------
// Global Registry
// ---------------------------------------------------------------------------

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn int_counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("create int counter");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("register int counter");
    c
}

fn int_gauge(name: &str, help: &str) -> IntGauge {
    let g = IntGauge::new(name, help).expect("create int gauge");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("register int gauge");
    g
}

fn gauge(name: &str, help: &str) -> Gauge {
    let g = Gauge::new(name, help).expect("create gauge");
    REGISTRY.register(Box::new(g.clone())).expect("register gauge");
    g
}

fn int_counter_vec(name: &str, help: &str, label: &str) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), &[label]).expect("create counter vec");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("register counter vec");
    c
}

// ---------------------------------------------------------------------------
// Search Counters
// ---------------------------------------------------------------------------

static SIEVED_BITS: Lazy<IntCounter> = Lazy::new(|| {
    int_counter(
        "prime_sieved_bits_total",
        "Candidates covered by completed sieve windows",
    )
});

static TESTS: Lazy<IntCounter> =
    Lazy::new(|| int_counter("prime_tests_total", "Primality tests run"));

static CANDIDATES_CHECKED: Lazy<IntCounterVec> = Lazy::new(|| {
    int_counter_vec(
        "prime_candidates_checked_total",
        "Primality tests per offset-pattern slot",
        "offset",
    )
});

static CANDIDATES_FOUND: Lazy<IntCounterVec> = Lazy::new(|| {
    int_counter_vec(
        "prime_candidates_found_total",
        "Passed primality tests per offset-pattern slot",
        "offset",
    )
});

static CHAINS: Lazy<IntCounterVec> =
    Lazy::new(|| int_counter_vec("prime_chains_total", "Scored chains by length", "length"));

static ROUNDS: Lazy<IntCounter> =
    Lazy::new(|| int_counter("prime_rounds_total", "Mining rounds started"));

static BLOCKS_FOUND: Lazy<IntCounter> =
    Lazy::new(|| int_counter("prime_blocks_found_total", "Blocks with an accepted nonce"));

// ---------------------------------------------------------------------------
// Gauges
// ---------------------------------------------------------------------------

static LARGEST_DIFFICULTY: Lazy<Gauge> = Lazy::new(|| {
    gauge(
        "prime_largest_difficulty",
        "Largest chain difficulty seen, as a decimal",
    )
});

static SIEVE_RATE: Lazy<IntGauge> =
    Lazy::new(|| int_gauge("prime_sieve_rate", "Sieved candidates per second"));

static TEST_RATE: Lazy<IntGauge> =
    Lazy::new(|| int_gauge("prime_test_rate", "Primality tests per second"));

static QUEUE_DEPTH: Lazy<IntGauge> =
    Lazy::new(|| int_gauge("prime_work_queue_depth", "Work units waiting for a tester"));

static SIEVE_WORKERS: Lazy<IntGauge> =
    Lazy::new(|| int_gauge("miner_sieve_workers", "Number of CPU sieve workers"));

static TEST_WORKERS: Lazy<IntGauge> =
    Lazy::new(|| int_gauge("miner_test_workers", "Number of CPU test workers"));

static DEVICE_WORKERS: Lazy<IntGauge> =
    Lazy::new(|| int_gauge("miner_device_workers", "Number of device pipeline workers"));

static EFFECTIVE_CPUS: Lazy<IntGauge> = Lazy::new(|| {
    int_gauge(
        "miner_effective_cpus",
        "Detected logical CPU cores available to this process",
    )
});

// ---------------------------------------------------------------------------
// Rate Tracking
// ---------------------------------------------------------------------------

/// Tracks cumulative totals to compute rolling rates.
struct RateTracker {
    sieved: u64,
    tests: u64,
    /// When the previous totals were taken
    last: Instant,
}

impl RateTracker {
    fn new() -> Self {
        Self {
            sieved: 0,
            tests: 0,
            last: Instant::now(),
        }
    }

    fn update(&mut self, sieved: u64, tests: u64) {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            SIEVE_RATE.set((sieved.saturating_sub(self.sieved) as f64 / elapsed) as i64);
            TEST_RATE.set((tests.saturating_sub(self.tests) as f64 / elapsed) as i64);
        }
        self.sieved = sieved;
        self.tests = tests;
        self.last = Instant::now();
    }
}

static RATE_TRACKER: Lazy<Mutex<RateTracker>> = Lazy::new(|| Mutex::new(RateTracker::new()));

/// Move a counter up to `total`; totals never go backwards.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

// ---------------------------------------------------------------------------
// Public API - Totals
// ---------------------------------------------------------------------------

/// Report running sieve and test totals, updating counters and rates.
pub fn record_totals(sieved_bits: u64, tests: u64) {
    advance(&SIEVED_BITS, sieved_bits);
    advance(&TESTS, tests);
    if let Ok(mut tracker) = RATE_TRACKER.lock() {
        tracker.update(sieved_bits, tests);
    }
}

/// Report running per-slot totals.
pub fn record_slot_totals(slot: usize, checked: u64, found: u64) {
    let label = slot.to_string();
    advance(&CANDIDATES_CHECKED.with_label_values(&[label.as_str()]), checked);
    advance(&CANDIDATES_FOUND.with_label_values(&[label.as_str()]), found);
}

/// Report the running number of chains of `length`.
pub fn record_chain_total(length: usize, count: u64) {
    if count == 0 {
        return;
    }
    advance(&CHAINS.with_label_values(&[length.to_string().as_str()]), count);
}

pub fn set_largest_difficulty(difficulty: f64) {
    LARGEST_DIFFICULTY.set(difficulty);
}

pub fn set_queue_depth(n: i64) {
    QUEUE_DEPTH.set(n);
}

pub fn inc_rounds() {
    ROUNDS.inc();
}

pub fn inc_blocks_found() {
    BLOCKS_FOUND.inc();
}

// ---------------------------------------------------------------------------
// Public API - Workers
// ---------------------------------------------------------------------------

pub fn set_sieve_workers(n: i64) {
    SIEVE_WORKERS.set(n);
}

pub fn set_test_workers(n: i64) {
    TEST_WORKERS.set(n);
}

pub fn set_device_workers(n: i64) {
    DEVICE_WORKERS.set(n);
}

/// Set the detected CPU core count.
pub fn set_effective_cpus(n: i64) {
    EFFECTIVE_CPUS.set(n);
}

/// Current value of every metric in Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::with_capacity(4096);
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// HTTP Exporter
// ---------------------------------------------------------------------------

/// Start the Prometheus HTTP exporter on `0.0.0.0:port`.
///
/// Spawns the exporter as a background task and returns immediately.
/// Serves plaintext metrics at `GET /metrics`.
#[cfg(feature = "http-exporter")]
pub async fn start_http_exporter(port: u16) -> Result<()> {
    let metrics_route = warp::path("metrics").and(warp::get()).map(metrics_response);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    tokio::spawn(async move {
        warp::serve(metrics_route).run(addr).await;
    });

    log::info!("metrics exporter listening on {addr}");
    Ok(())
}

#[cfg(feature = "http-exporter")]
fn metrics_response() -> Result<warp::http::Response<String>, warp::http::Error> {
    warp::http::Response::builder()
        .header("Content-Type", prometheus::TEXT_FORMAT)
        .body(render())
}

/// No-op when HTTP exporter feature is disabled.
#[cfg(not(feature = "http-exporter"))]
pub async fn start_http_exporter(_port: u16) -> Result<()> {
    log::warn!(
        "metrics::start_http_exporter called but 'http-exporter' feature is disabled; ignoring"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_advance_counters_monotonically() {
        record_totals(1000, 10);
        record_totals(4000, 25);
        assert_eq!(SIEVED_BITS.get(), 4000);
        assert_eq!(TESTS.get(), 25);
        // a smaller total never rewinds
        record_totals(10, 1);
        assert_eq!(SIEVED_BITS.get(), 4000);
    }

    #[test]
    fn labelled_totals_show_up_in_render() {
        record_slot_totals(3, 12, 4);
        record_chain_total(7, 1);
        record_chain_total(2, 0);
        set_largest_difficulty(7.0596060);
        let text = render();
        assert!(text.contains("prime_candidates_checked_total{offset=\"3\"} 12"));
        assert!(text.contains("prime_candidates_found_total{offset=\"3\"} 4"));
        assert!(text.contains("prime_chains_total{length=\"7\"} 1"));
        assert!(!text.contains("prime_chains_total{length=\"2\"}"));
        assert!(text.contains("prime_largest_difficulty 7.05"));
    }

    #[cfg(feature = "http-exporter")]
    #[test]
    fn exporter_serves_the_rendered_registry() {
        inc_rounds();
        let response = metrics_response().unwrap();
        assert_eq!(
            response.headers()["Content-Type"],
            prometheus::TEXT_FORMAT
        );
        assert!(response.body().contains("prime_rounds_total"));
    }
}
