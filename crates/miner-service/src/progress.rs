//! Periodic progress reporting: counters into metrics and a log line.

use std::time::Instant;

use prime_core::{format_difficulty, CounterSnapshot};

pub struct ProgressReporter {
    pattern_len: usize,
    started: Instant,
    last: Instant,
    previous: CounterSnapshot,
}

impl ProgressReporter {
    pub fn new(pattern_len: usize) -> Self {
        let now = Instant::now();
        Self {
            pattern_len,
            started: now,
            last: now,
            previous: CounterSnapshot::default(),
        }
    }

    /// Publish `snapshot` to the metrics registry and log rates since the
    /// previous report.
    pub fn report(&mut self, snapshot: &CounterSnapshot, queue_depth: usize, height: u32) {
        publish(snapshot, self.pattern_len, queue_depth);

        let elapsed = self.last.elapsed().as_secs_f64().max(1e-3);
        let sieved = snapshot.sieved_bits.saturating_sub(self.previous.sieved_bits);
        let tests = snapshot.tests.saturating_sub(self.previous.tests);
        log::info!(
            "⛏️  height {} | {:.2} M/s sieved | {:.0} tests/s | queue {} | largest {} | chains {} | up {}s",
            height,
            sieved as f64 / elapsed / 1e6,
            tests as f64 / elapsed,
            queue_depth,
            format_difficulty(snapshot.largest),
            histogram(snapshot),
            self.started.elapsed().as_secs()
        );

        self.previous = snapshot.clone();
        self.last = Instant::now();
    }
}

/// Mirror cumulative counters into the Prometheus registry.
pub fn publish(snapshot: &CounterSnapshot, pattern_len: usize, queue_depth: usize) {
    metrics::record_totals(snapshot.sieved_bits, snapshot.tests);
    for (slot, (&checked, &found)) in snapshot
        .primes_checked
        .iter()
        .zip(&snapshot.primes_found)
        .enumerate()
        .take(pattern_len)
    {
        metrics::record_slot_totals(slot, checked, found);
    }
    for (length, &count) in snapshot.chain_counts.iter().enumerate() {
        metrics::record_chain_total(length, count);
    }
    metrics::set_largest_difficulty(prime_core::difficulty::bits_to_difficulty(
        snapshot.largest,
    ));
    metrics::set_queue_depth(queue_depth as i64);
}

/// `len:count` pairs for chains of length 3 and up.
fn histogram(snapshot: &CounterSnapshot) -> String {
    let parts: Vec<String> = snapshot
        .chain_counts
        .iter()
        .enumerate()
        .skip(3)
        .filter(|(_, count)| **count > 0)
        .map(|(length, count)| format!("{length}:{count}"))
        .collect();
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(" ")
    }
}
