use clap::{Args as ClapArgs, Parser, Subcommand};
use engine_gpu::HostPipelineConfig;
use miner_service::{build_params, resolve_workers, run, Miner, ServiceConfig};
use num_bigint::BigUint;
use prime_core::block::PROOF_HASH_BITS;
use prime_core::{Block, CounterSnapshot};
use rand::RngCore;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Search parameters shared by every subcommand.
#[derive(ClapArgs, Debug, Clone)]
struct SearchArgs {
    /// Offsets file: primorial end prime, base offset and the offset patterns
    #[arg(long, env = "MINER_OFFSETS", default_value = "config/offsets.ini")]
    offsets: PathBuf,

    /// Origins file: whitespace separated displacements from the aligned proof hash
    #[arg(long, env = "MINER_ORIGINS", default_value = "config/origins.ini")]
    origins: PathBuf,

    /// CPU sieve workers (defaults to a quarter of the available CPUs)
    #[arg(long = "sieve-workers", env = "MINER_SIEVE_WORKERS")]
    sieve_workers: Option<usize>,

    /// CPU test workers (defaults to the remaining CPUs)
    #[arg(long = "test-workers", env = "MINER_TEST_WORKERS")]
    test_workers: Option<usize>,

    /// Host device pipeline workers (0 disables the device path)
    #[arg(long = "device-workers", env = "MINER_DEVICE_WORKERS", default_value_t = 0)]
    device_workers: usize,

    /// Sieve window of 2^N candidates
    #[arg(long = "sieve-bits", env = "MINER_SIEVE_BITS", default_value_t = engine_cpu::params::DEFAULT_SIEVE_BITS_LOG2)]
    sieve_bits_log2: u32,

    /// Wheel primes used for sieving, counting the primorial primes
    #[arg(long = "sieve-primes", env = "MINER_SIEVE_PRIMES", default_value_t = engine_cpu::params::DEFAULT_SIEVE_PRIMES)]
    sieve_primes: usize,

    /// Windows sieved per origin before asking for new work
    #[arg(long = "sieves-per-origin", env = "MINER_SIEVES_PER_ORIGIN", default_value_t = engine_cpu::params::DEFAULT_SIEVES_PER_ORIGIN)]
    sieves_per_origin: u32,

    /// Stage-one sieving primes of each device pipeline
    #[arg(long = "device-sieve-primes", env = "MINER_DEVICE_SIEVE_PRIMES", default_value_t = HostPipelineConfig::default().sieve_primes)]
    device_sieve_primes: usize,

    /// Each device candidate list holds 2^N entries
    #[arg(long = "device-max-candidates", env = "MINER_DEVICE_MAX_CANDIDATES", default_value_t = HostPipelineConfig::default().max_candidates_log2)]
    device_max_candidates_log2: u32,

    /// Enable verbose logging (shows debug info, worker lifecycle, etc.)
    #[arg(short, long, env = "MINER_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine solo blocks (default behavior)
    Mine {
        #[command(flatten)]
        search: SearchArgs,

        /// Proof hash of the first block, big-endian hex
        #[arg(long = "proof-hash", env = "MINER_PROOF_HASH", default_value = "1")]
        proof_hash: String,

        /// Required difficulty in fixed point (difficulty * 10^7)
        #[arg(long, env = "MINER_BITS", default_value_t = 70_000_000)]
        bits: u32,

        /// Height of the first block
        #[arg(long, env = "MINER_HEIGHT", default_value_t = 1)]
        height: u32,

        /// Stop after this many rounds; runs until interrupted if omitted
        #[arg(long = "max-rounds", env = "MINER_MAX_ROUNDS")]
        max_rounds: Option<u64>,

        /// How often to report mining progress (in milliseconds)
        #[arg(long = "progress-interval-ms", env = "MINER_PROGRESS_INTERVAL_MS", default_value_t = 10_000)]
        progress_interval_ms: u64,

        /// Optional Prometheus metrics exporter port; if omitted, metrics are disabled
        #[arg(long, env = "MINER_METRICS_PORT")]
        metrics_port: Option<u16>,
    },
    /// Measure sieve and test throughput against an unreachable target
    Benchmark {
        #[command(flatten)]
        search: SearchArgs,

        /// Benchmark duration in seconds (default: 10)
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },
}

/// Prime-cluster miner CLI
#[derive(Parser, Debug)]
#[command(author, version = option_env!("MINER_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")), about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

impl SearchArgs {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            offsets_path: self.offsets.clone(),
            origins_path: self.origins.clone(),
            sieve_workers: self.sieve_workers,
            test_workers: self.test_workers,
            device_workers: self.device_workers,
            device: HostPipelineConfig {
                sieve_primes: self.device_sieve_primes,
                max_candidates_log2: self.device_max_candidates_log2,
            },
            sieve_bits_log2: self.sieve_bits_log2,
            sieve_primes: self.sieve_primes,
            sieves_per_origin: self.sieves_per_origin,
            ..ServiceConfig::default()
        }
    }
}

/// Initialize logger early to capture startup messages.
/// If RUST_LOG is not set, default to appropriate level based on verbose flag.
fn init_logging(verbose: bool) {
    if std::env::var("RUST_LOG").is_err() {
        let log_level = if verbose {
            "debug,miner=debug,engine_cpu=debug,engine_gpu=debug"
        } else {
            "info,miner=info"
        };
        std::env::set_var("RUST_LOG", log_level);
    }
    env_logger::init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Mine {
            search,
            proof_hash,
            bits,
            height,
            max_rounds,
            progress_interval_ms,
            metrics_port,
        } => {
            init_logging(search.verbose);
            log::info!("Starting prime miner...");

            let config = ServiceConfig {
                proof_hash,
                bits,
                height,
                max_rounds,
                progress_interval_ms,
                metrics_port,
                ..search.service_config()
            };
            log::info!("Effective config: {config}");

            if let Err(e) = run(config).await {
                log::error!("Miner terminated with error: {e:?}");
                std::process::exit(1);
            }
        }
        Command::Benchmark { search, duration } => {
            init_logging(search.verbose);
            let config = search.service_config();
            let result = tokio::task::spawn_blocking(move || run_benchmark(&config, duration)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    eprintln!("Error: {e:#}");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Error: benchmark thread failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn run_benchmark(config: &ServiceConfig, duration_secs: u64) -> anyhow::Result<()> {
    let effective_cpus = num_cpus::get().max(1);
    let counts = resolve_workers(config, effective_cpus)?;
    let params = build_params(config)?;

    println!("🚀 Prime Miner Benchmark");
    println!("========================");
    println!(
        "Workers: {} sieve, {} device, {} test",
        counts.sieve, counts.device, counts.test
    );
    println!("Available CPUs: {}", effective_cpus);
    println!("Duration: {} seconds", duration_secs);
    println!();

    let mut miner = Miner::new(params.clone(), counts, config.device, Duration::from_secs(1))?;

    // random proof hash with a target no chain can reach
    let mut bytes = vec![0u8; (PROOF_HASH_BITS / 8) as usize];
    rand::thread_rng().fill_bytes(&mut bytes);
    let block = Block::new(BigUint::from_bytes_be(&bytes), 1, u32::MAX);

    println!("⛏️  Starting benchmark...");
    let started = Instant::now();
    let snapshot = miner.benchmark(block, Duration::from_secs(duration_secs));
    let elapsed = started.elapsed().as_secs_f64().max(1e-3);
    miner.shutdown();

    print_results(&snapshot, params.pattern.len(), elapsed);
    Ok(())
}

fn rate(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("{:.2}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.2}K", value / 1_000.0)
    } else {
        format!("{:.0}", value)
    }
}

fn print_results(snapshot: &CounterSnapshot, pattern_len: usize, elapsed: f64) {
    println!();
    println!("📊 Benchmark Results");
    println!("===================");
    println!("Total time: {:.2} seconds", elapsed);
    println!("Sieved candidates: {}", snapshot.sieved_bits);
    println!("Sieve rate: {}/s", rate(snapshot.sieved_bits as f64 / elapsed));
    println!("Primality tests: {}", snapshot.tests);
    println!("Test rate: {}/s", rate(snapshot.tests as f64 / elapsed));

    for (slot, (checked, found)) in snapshot
        .primes_checked
        .iter()
        .zip(&snapshot.primes_found)
        .enumerate()
        .take(pattern_len)
    {
        if *checked > 0 {
            println!(
                "  offset {slot}: {found}/{checked} prime ({:.2}%)",
                *found as f64 * 100.0 / *checked as f64
            );
        }
    }
    for (length, count) in snapshot.chain_counts.iter().enumerate().skip(2) {
        if *count > 0 {
            println!("  {length}-chains: {count}");
        }
    }

    println!("✅ Benchmark completed successfully!");
}
