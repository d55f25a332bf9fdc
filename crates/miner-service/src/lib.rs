//! Mining service for the prime-cluster miner.
//!
//! This crate wires the engines into a running miner:
//! - Search parameter assembly from the offsets and origins files
//! - Persistent worker thread pool that keeps sieve, device and test workers
//!   alive between rounds
//! - Round orchestration against a `BlockProvider`, with periodic progress
//!   reporting into the metrics registry

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod miner;
pub mod pool;
pub mod progress;
pub mod provider;

pub use miner::{Miner, RoundOutcome, RunSummary, WorkerCounts};
pub use pool::{RoundJob, WorkerPool, WorkerReport};
pub use progress::ProgressReporter;
pub use provider::{BlockProvider, SoloBlockProvider};

use anyhow::Context;
use engine_cpu::{MiningParams, ModularWheelTable};
use engine_gpu::HostPipelineConfig;
use prime_core::Block;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Service runtime configuration provided by the CLI/binary.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub offsets_path: PathBuf,
    pub origins_path: PathBuf,
    /// CPU sieve workers (None = auto-detect)
    pub sieve_workers: Option<usize>,
    /// CPU test workers (None = auto-detect)
    pub test_workers: Option<usize>,
    /// Host device pipeline workers
    pub device_workers: usize,
    pub device: HostPipelineConfig,
    pub sieve_bits_log2: u32,
    /// Wheel primes, counting the primorial primes
    pub sieve_primes: usize,
    pub sieves_per_origin: u32,
    pub progress_interval_ms: u64,
    pub metrics_port: Option<u16>,
    /// Stop after this many rounds (None = run until interrupted)
    pub max_rounds: Option<u64>,
    /// Proof hash of the first solo block, big-endian hex
    pub proof_hash: String,
    pub height: u32,
    /// Required difficulty, fixed point (difficulty * 10^7)
    pub bits: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            offsets_path: PathBuf::from("config/offsets.ini"),
            origins_path: PathBuf::from("config/origins.ini"),
            sieve_workers: None,
            test_workers: None,
            device_workers: 0,
            device: HostPipelineConfig::default(),
            sieve_bits_log2: engine_cpu::params::DEFAULT_SIEVE_BITS_LOG2,
            sieve_primes: engine_cpu::params::DEFAULT_SIEVE_PRIMES,
            sieves_per_origin: engine_cpu::params::DEFAULT_SIEVES_PER_ORIGIN,
            progress_interval_ms: 10_000,
            metrics_port: None,
            max_rounds: None,
            proof_hash: "1".to_string(),
            height: 1,
            bits: 70_000_000,
        }
    }
}

impl fmt::Display for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let auto = |n: Option<usize>| n.map_or_else(|| "auto".to_string(), |n| n.to_string());
        write!(
            f,
            "offsets={} origins={} sieve_workers={} test_workers={} device_workers={} \
             sieve=2^{} primes={} sieves_per_origin={} progress={}ms metrics={} target={}",
            self.offsets_path.display(),
            self.origins_path.display(),
            auto(self.sieve_workers),
            auto(self.test_workers),
            self.device_workers,
            self.sieve_bits_log2,
            self.sieve_primes,
            self.sieves_per_origin,
            self.progress_interval_ms,
            self.metrics_port
                .map_or_else(|| "off".to_string(), |p| p.to_string()),
            prime_core::format_difficulty(self.bits),
        )
    }
}

/// Load the offsets and origins files and build the wheel.
pub fn build_params(config: &ServiceConfig) -> anyhow::Result<Arc<MiningParams>> {
    let offsets = prime_core::load_offsets(&config.offsets_path)
        .with_context(|| format!("loading {}", config.offsets_path.display()))?;
    let origins = prime_core::load_origins(&config.origins_path)
        .with_context(|| format!("loading {}", config.origins_path.display()))?;

    let primorial = prime_core::primorial(offsets.primorial_end_prime)?;
    let wheel = ModularWheelTable::generate(
        primorial,
        offsets.primorial_end_prime,
        config.sieve_primes,
    )?;
    let params = MiningParams::new(
        offsets,
        &origins,
        Arc::new(wheel),
        config.sieve_bits_log2,
        config.sieves_per_origin,
    )?;
    params.log_summary();
    Ok(Arc::new(params))
}

/// Resolve worker counts against the detected CPUs.
///
/// By default a quarter of the cores sieve and the rest test; device workers
/// add on top.
pub fn resolve_workers(config: &ServiceConfig, effective_cpus: usize) -> anyhow::Result<WorkerCounts> {
    let cpus = effective_cpus.max(1);
    let sieve = config.sieve_workers.unwrap_or_else(|| {
        if config.device_workers > 0 {
            0
        } else {
            (cpus / 4).max(1)
        }
    });
    let test = config.test_workers.unwrap_or_else(|| {
        let default = cpus.saturating_sub(sieve).max(1);
        log::info!("Auto-detected {} test workers (of {} available)", default, cpus);
        default
    });

    if sieve + config.device_workers == 0 {
        anyhow::bail!("No sieve workers configured. Specify --sieve-workers > 0 or --device-workers > 0.");
    }
    if test == 0 {
        anyhow::bail!("No test workers configured. Specify --test-workers > 0.");
    }
    Ok(WorkerCounts {
        sieve,
        test,
        device: config.device_workers,
    })
}

/// Start the miner service with the given configuration.
pub async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let effective_cpus = num_cpus::get().max(1);
    metrics::set_effective_cpus(effective_cpus as i64);
    if let Some(port) = config.metrics_port {
        metrics::start_http_exporter(port).await?;
    }

    let params = build_params(&config)?;
    let counts = resolve_workers(&config, effective_cpus)?;
    log::info!(
        "🚀 Mining configuration: {} sieve workers, {} device workers, {} test workers",
        counts.sieve,
        counts.device,
        counts.test
    );

    let first = Block::from_hex(&config.proof_hash, config.height, config.bits)
        .context("invalid --proof-hash")?;
    let mut provider = SoloBlockProvider::new(first.proof_hash, first.height, first.bits);

    let mut miner = Miner::new(
        params,
        counts,
        config.device,
        Duration::from_millis(config.progress_interval_ms.max(1)),
    )?;
    log::info!("⛏️  Mining service ready with {} total workers", miner.worker_count());

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        let round = miner.round_state();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received, finishing the current round");
                shutdown.store(true, Ordering::Relaxed);
                round.request_stop(prime_core::StopReason::Shutdown);
            }
        });
    }

    let max_rounds = config.max_rounds;
    let summary = tokio::task::spawn_blocking(move || {
        let summary = miner.run_rounds(&mut provider, &shutdown, max_rounds);
        miner.shutdown();
        summary
    })
    .await
    .context("mining thread panicked")??;

    log::info!(
        "Miner stopped after {} rounds, {} blocks found",
        summary.rounds,
        summary.blocks
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_workers_split_cores() {
        let config = ServiceConfig::default();
        let counts = resolve_workers(&config, 8).unwrap();
        assert_eq!(counts, WorkerCounts { sieve: 2, test: 6, device: 0 });

        let counts = resolve_workers(&config, 1).unwrap();
        assert_eq!(counts, WorkerCounts { sieve: 1, test: 1, device: 0 });
    }

    #[test]
    fn device_workers_replace_default_cpu_sieving() {
        let config = ServiceConfig {
            device_workers: 2,
            ..Default::default()
        };
        let counts = resolve_workers(&config, 4).unwrap();
        assert_eq!(counts, WorkerCounts { sieve: 0, test: 4, device: 2 });
    }

    #[test]
    fn zero_producers_or_consumers_is_rejected() {
        let no_sieve = ServiceConfig {
            sieve_workers: Some(0),
            ..Default::default()
        };
        assert!(resolve_workers(&no_sieve, 4).is_err());

        let no_test = ServiceConfig {
            test_workers: Some(0),
            ..Default::default()
        };
        assert!(resolve_workers(&no_test, 4).is_err());
    }

    #[test]
    fn display_shows_effective_values() {
        let line = ServiceConfig::default().to_string();
        assert!(line.contains("sieve_workers=auto"));
        assert!(line.contains("sieve=2^16"));
        assert!(line.contains("metrics=off"));
        assert!(line.contains("target=7.0000000"));
    }
}
