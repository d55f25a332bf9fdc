//! Round orchestration: one block at a time across the whole worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use engine_cpu::{MiningParams, PrimeSieveCpu, PrimeTestCpu, Worker, WorkerContext, WorkerKind};
use engine_gpu::{GpuSieveAdapter, HostPipelineConfig, HostSievePipeline};
use prime_core::{Block, CounterSnapshot, RoundState, Solution, StopReason, WorkQueue};

use crate::pool::{WorkerPool, WorkerReport};
use crate::progress::ProgressReporter;
use crate::provider::BlockProvider;

/// How long the orchestrator waits for a worker report before polling again.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Number of workers of each kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerCounts {
    pub sieve: usize,
    pub test: usize,
    pub device: usize,
}

/// How a round ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundOutcome {
    Found(Solution),
    NewBlock,
    Exhausted,
    Shutdown,
}

/// Totals over a whole run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rounds: u64,
    pub blocks: u64,
}

pub struct Miner {
    params: Arc<MiningParams>,
    round: Arc<RoundState>,
    queue: Arc<WorkQueue>,
    pool: WorkerPool,
    progress: ProgressReporter,
    progress_interval: Duration,
}

impl Miner {
    /// Create every worker and start the pool.
    ///
    /// Sieve and device workers together shard the origin list; each producer
    /// takes every n-th origin so no two of them sieve the same windows.
    pub fn new(
        params: Arc<MiningParams>,
        counts: WorkerCounts,
        device: HostPipelineConfig,
        progress_interval: Duration,
    ) -> anyhow::Result<Self> {
        let ctx = WorkerContext {
            params: params.clone(),
            round: Arc::new(RoundState::new()),
            queue: Arc::new(WorkQueue::new()),
        };

        let producers = counts.sieve + counts.device;
        let mut workers: Vec<Box<dyn Worker>> =
            Vec::with_capacity(producers + counts.test);
        let mut next_id = 0u32;
        for shard in 0..counts.sieve {
            workers.push(Box::new(PrimeSieveCpu::new(ctx.clone(), next_id, shard, producers)));
            next_id += 1;
        }
        for shard in counts.sieve..producers {
            let pipeline = HostSievePipeline::new(params.clone(), device, shard, producers);
            workers.push(Box::new(GpuSieveAdapter::new(
                ctx.clone(),
                next_id,
                Box::new(pipeline),
            )));
            next_id += 1;
        }
        for _ in 0..counts.test {
            workers.push(Box::new(PrimeTestCpu::new(ctx.clone(), next_id)));
            next_id += 1;
        }

        let miner = Self::with_workers(ctx, workers, progress_interval)?;
        metrics::set_sieve_workers(counts.sieve as i64);
        metrics::set_device_workers(counts.device as i64);
        Ok(miner)
    }

    /// Start the pool over workers that were built against `ctx`.
    pub fn with_workers(
        ctx: WorkerContext,
        workers: Vec<Box<dyn Worker>>,
        progress_interval: Duration,
    ) -> anyhow::Result<Self> {
        let pool = WorkerPool::new(workers)?;
        metrics::set_test_workers(pool.consumer_count() as i64);

        let pattern_len = ctx.params.pattern.len();
        Ok(Self {
            params: ctx.params,
            round: ctx.round,
            queue: ctx.queue,
            pool,
            progress: ProgressReporter::new(pattern_len),
            progress_interval,
        })
    }

    /// Shared round state, e.g. for a signal handler to stop the current round.
    pub fn round_state(&self) -> Arc<RoundState> {
        self.round.clone()
    }

    pub fn params(&self) -> &MiningParams {
        &self.params
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Mine `block` until a solution is committed, the provider reports a new
    /// height, the origins run out or `shutdown` is raised.
    pub fn mine_round(
        &mut self,
        block: Block,
        provider: &mut dyn BlockProvider,
        shutdown: &AtomicBool,
    ) -> RoundOutcome {
        log::info!(
            target: "miner",
            "⛏️  Mining block {} (hash {}, target {})",
            block.height,
            block.short_hash(),
            prime_core::format_difficulty(block.bits)
        );
        let started = Instant::now();
        self.drive_round(block, |round| {
            if shutdown.load(Ordering::Relaxed) {
                round.request_stop(StopReason::Shutdown);
            }
            if let Some(height) = provider.poll_height() {
                if round.announce_height(height) {
                    log::info!(target: "miner", "New block at height {height}, abandoning round");
                }
            }
        });

        let outcome = match self.round.stop_reason() {
            Some(StopReason::Found) => match self.round.solution() {
                Some(solution) => RoundOutcome::Found(solution),
                None => RoundOutcome::Shutdown,
            },
            Some(StopReason::NewBlock) => RoundOutcome::NewBlock,
            Some(StopReason::Exhausted) => RoundOutcome::Exhausted,
            Some(StopReason::Shutdown) | None => RoundOutcome::Shutdown,
        };
        log::info!(
            target: "miner",
            "Round finished after {:.2?}: {}",
            started.elapsed(),
            match &outcome {
                RoundOutcome::Found(_) => "solution found",
                RoundOutcome::NewBlock => "new block",
                RoundOutcome::Exhausted => "origins exhausted",
                RoundOutcome::Shutdown => "shutdown",
            }
        );
        outcome
    }

    /// Run sieving and testing on `block` for `duration` and return the
    /// counters accumulated meanwhile.
    pub fn benchmark(&mut self, block: Block, duration: Duration) -> CounterSnapshot {
        let before = self.round.counters().snapshot();
        let deadline = Instant::now() + duration;
        self.drive_round(block, |round| {
            if Instant::now() >= deadline {
                round.request_stop(StopReason::Shutdown);
            }
        });
        let after = self.round.counters().snapshot();
        CounterSnapshot {
            primes_checked: diff(&after.primes_checked, &before.primes_checked),
            primes_found: diff(&after.primes_found, &before.primes_found),
            chain_counts: diff(&after.chain_counts, &before.chain_counts),
            tests: after.tests - before.tests,
            sieved_bits: after.sieved_bits - before.sieved_bits,
            largest: after.largest,
            weight: after.weight - before.weight,
        }
    }

    /// Fetch blocks from `provider` and mine them until it runs dry,
    /// `max_rounds` rounds have run or `shutdown` is raised.
    pub fn run_rounds(
        &mut self,
        provider: &mut dyn BlockProvider,
        shutdown: &AtomicBool,
        max_rounds: Option<u64>,
    ) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();
        while !shutdown.load(Ordering::Relaxed) {
            if max_rounds.is_some_and(|max| summary.rounds >= max) {
                break;
            }
            let Some(block) = provider.next_block()? else {
                log::info!("Block provider has no more work");
                break;
            };
            summary.rounds += 1;
            match self.mine_round(block, provider, shutdown) {
                RoundOutcome::Found(solution) => {
                    metrics::inc_blocks_found();
                    summary.blocks += 1;
                    if let Err(e) = provider.submit(&solution) {
                        log::warn!("Solution for block {} rejected: {e:#}", solution.block.height);
                    }
                }
                RoundOutcome::NewBlock | RoundOutcome::Exhausted => {}
                RoundOutcome::Shutdown => break,
            }
        }
        Ok(summary)
    }

    /// Stop the pool and join every worker thread.
    pub fn shutdown(self) {
        self.round.request_stop(StopReason::Shutdown);
        self.pool.shutdown();
    }

    /// Start a round on every worker and wait until all of them have left it.
    /// `poll` runs between report waits and may stop the round.
    fn drive_round(&mut self, block: Block, mut poll: impl FnMut(&RoundState)) {
        let discarded = self.queue.clear();
        if discarded > 0 {
            log::debug!(target: "miner", "dropped {discarded} work units from the previous round");
        }
        let height = block.height;
        self.round.begin_round(block);
        metrics::inc_rounds();
        self.pool.start_round();

        let expected = self.pool.worker_count();
        let producers = self.pool.producer_count();
        let mut reports: Vec<WorkerReport> = Vec::with_capacity(expected);
        let mut producers_out = 0;
        let mut next_progress = Instant::now() + self.progress_interval;

        while reports.len() < expected {
            match self.pool.next_report(POLL_INTERVAL) {
                Ok(report) => {
                    log::debug!(
                        target: "miner",
                        "{} worker {} left the round: {:?} after {} steps",
                        report.name,
                        report.worker,
                        report.status,
                        report.steps
                    );
                    if report.kind == WorkerKind::Producer {
                        producers_out += 1;
                        // consumers would wait forever on an empty queue
                        if producers_out == producers
                            && self.round.request_stop(StopReason::Exhausted)
                        {
                            log::warn!(
                                target: "miner",
                                "every producer left the round at height {height}, ending it"
                            );
                        }
                    }
                    reports.push(report);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::error!("worker threads are gone, ending round");
                    self.round.request_stop(StopReason::Shutdown);
                    break;
                }
            }

            poll(&self.round);

            if Instant::now() >= next_progress {
                self.report_progress(height);
                next_progress = Instant::now() + self.progress_interval;
            }
        }
        self.report_progress(height);
    }

    fn report_progress(&mut self, height: u32) {
        let snapshot = self.round.counters().snapshot();
        self.progress.report(&snapshot, self.queue.len(), height);
    }
}

fn diff(after: &[u64], before: &[u64]) -> Vec<u64> {
    after
        .iter()
        .zip(before)
        .map(|(a, b)| a.saturating_sub(*b))
        .collect()
}
