//! CPU sieve producer.
//!
//! Each worker owns a shard of the origin list. One `work` step sieves one
//! window for one origin slot, compacts it and pushes the survivors. Slots are
//! visited round-robin and each advances by a full window, so successive
//! windows of a slot are contiguous and never overlap. After every slot has
//! been sieved `sieves_per_origin` times the round is reported exhausted.

use std::sync::Arc;

use anyhow::Context;
use prime_core::{Block, Origin, StopReason};

use crate::compact::CandidateCompactor;
use crate::sieve::{base_remainders, BitArraySieve, SieveOutcome};
use crate::{WorkStatus, Worker, WorkerContext, WorkerKind};

pub struct PrimeSieveCpu {
    id: u32,
    ctx: WorkerContext,
    shard: usize,
    shards: usize,
    sieve: Option<BitArraySieve>,
    remainders: Vec<u32>,
    displacements: Vec<u32>,
    compactor: CandidateCompactor,
    work_origins: Vec<u64>,
    slot: usize,
    cycles: u32,
    round: Option<(Arc<Block>, Origin)>,
}

impl PrimeSieveCpu {
    /// Worker `shard` of `shards` takes every `shards`-th origin.
    pub fn new(ctx: WorkerContext, id: u32, shard: usize, shards: usize) -> Self {
        let displacements = ctx.params.sieve_displacements();
        let primary = ctx.params.pattern.offset(0).unwrap_or(0);
        let compactor = CandidateCompactor::new(ctx.params.primorial, primary);
        Self {
            id,
            ctx,
            shard,
            shards: shards.max(1),
            sieve: None,
            remainders: Vec::new(),
            displacements,
            compactor,
            work_origins: Vec::new(),
            slot: 0,
            cycles: 0,
            round: None,
        }
    }

    /// Displacement of the next window of every owned origin slot.
    pub fn work_origins(&self) -> &[u64] {
        &self.work_origins
    }

    /// Completed passes over every owned slot in this round.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }
}

impl Worker for PrimeSieveCpu {
    fn name(&self) -> &'static str {
        "cpu-sieve"
    }

    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Producer
    }

    fn load(&mut self) -> anyhow::Result<()> {
        let bits = self.ctx.params.sieve_bits;
        let sieve = BitArraySieve::new(bits)
            .with_context(|| format!("sieve worker {} could not allocate its bit array", self.id))?;
        self.sieve = Some(sieve);
        self.remainders = Vec::with_capacity(self.ctx.params.wheel.len());
        log::debug!(target: "miner", "sieve worker {} loaded ({bits} bits)", self.id);
        Ok(())
    }

    fn init(&mut self) {
        let params = &self.ctx.params;
        self.work_origins = params
            .origins
            .iter()
            .copied()
            .skip(self.shard)
            .step_by(self.shards)
            .collect();
        self.slot = 0;
        self.cycles = 0;

        let block = self.ctx.round.block();
        let origin = Origin::from_block(&block, params.primorial);
        self.round = Some((block, origin));

        if self.work_origins.is_empty() {
            log::warn!(target: "miner", "sieve worker {} has no origins to sieve", self.id);
        }
    }

    fn work(&mut self) -> WorkStatus {
        let round = &self.ctx.round;
        if round.is_stopped() {
            return WorkStatus::Stopped;
        }
        let (Some(sieve), Some((block, origin))) = (self.sieve.as_mut(), self.round.as_ref())
        else {
            return WorkStatus::Idle;
        };
        let Some(&base_offset) = self.work_origins.get(self.slot) else {
            return WorkStatus::Idle;
        };
        let params = &self.ctx.params;

        base_remainders(&origin.candidate(base_offset), &params.wheel, &mut self.remainders);
        let outcome = sieve.run(
            &params.wheel,
            &self.remainders,
            &self.displacements,
            round.stop_flag(),
        );
        if outcome == SieveOutcome::Cancelled {
            return WorkStatus::Stopped;
        }
        round.counters().add_sieved_bits(sieve.bits());

        let survivors = self.compactor.compact(
            sieve,
            base_offset,
            origin,
            round.stop_flag(),
            round.counters(),
        );
        if survivors.cancelled {
            return WorkStatus::Stopped;
        }
        log::trace!(
            target: "miner",
            "sieve worker {}: window at {base_offset}, {} of {} survivors kept",
            self.id,
            survivors.nonce_offsets.len(),
            survivors.examined
        );
        if let Some(unit) = survivors.into_work_unit(block.clone(), self.id) {
            self.ctx.queue.push(unit);
        }

        // MiningParams caps sieves_per_origin so this cannot overflow
        self.work_origins[self.slot] = base_offset.saturating_add(params.window_span());
        self.slot += 1;
        if self.slot == self.work_origins.len() {
            self.slot = 0;
            self.cycles += 1;
            if self.cycles >= params.sieves_per_origin {
                log::info!(
                    target: "miner",
                    "sieve worker {}: origins exhausted, requesting more work",
                    self.id
                );
                round.request_stop(StopReason::Exhausted);
                return WorkStatus::Stopped;
            }
        }
        WorkStatus::Progress
    }

    fn shutdown(&mut self) {
        self.sieve = None;
        self.round = None;
        log::debug!(target: "miner", "sieve worker {} shut down", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::fixtures;
    use num_bigint::BigUint;
    use prime_core::{RoundState, WorkQueue, WorkSource};

    fn context(origins: &[u64], sieves: u32) -> WorkerContext {
        WorkerContext {
            params: Arc::new(fixtures::params(origins, 9, sieves)),
            round: Arc::new(RoundState::new()),
            queue: Arc::new(WorkQueue::new()),
        }
    }

    #[test]
    fn windows_of_a_slot_are_contiguous() {
        let ctx = context(&[15551, 17651], 3);
        ctx.round.begin_round(Block::new(BigUint::from(1u32), 1, u32::MAX));
        let mut worker = PrimeSieveCpu::new(ctx.clone(), 0, 0, 1);
        worker.load().unwrap();
        worker.init();

        let span = ctx.params.window_span();
        let mut seen: Vec<Vec<u64>> = vec![Vec::new(); 2];
        loop {
            let before = worker.work_origins().to_vec();
            let status = worker.work();
            let slot = (0..2).find(|&s| worker.work_origins()[s] != before[s]).unwrap();
            seen[slot].push(before[slot]);
            if status == WorkStatus::Stopped {
                break;
            }
            assert_eq!(status, WorkStatus::Progress);
        }

        assert_eq!(seen[0], vec![15551, 15551 + span, 15551 + 2 * span]);
        assert_eq!(seen[1], vec![17651, 17651 + span, 17651 + 2 * span]);
        assert_eq!(worker.cycles(), 3);
        assert_eq!(ctx.round.stop_reason(), Some(StopReason::Exhausted));
        assert_eq!(ctx.round.counters().snapshot().sieved_bits, 6 * 512);
    }

    #[test]
    fn pushes_cpu_units_containing_the_known_tuplet() {
        let ctx = context(&[15551], 5);
        ctx.round.begin_round(Block::new(BigUint::from(1u32), 1, u32::MAX));
        let mut worker = PrimeSieveCpu::new(ctx.clone(), 7, 0, 1);
        worker.load().unwrap();
        worker.init();
        assert_eq!(worker.work(), WorkStatus::Progress);

        let unit = ctx.queue.pop().unwrap();
        assert_eq!(unit.source(), WorkSource::Cpu);
        assert_eq!(unit.producer(), 7);
        assert!(unit.nonce_meta().iter().all(|&m| m == 0));
        assert_eq!(unit.nonce_offsets()[0], 15551 + 4 * 30030);
    }

    #[test]
    fn shards_split_the_origin_list() {
        let ctx = context(&[1271, 1481, 2531, 4001, 5891], 5);
        ctx.round.begin_round(Block::new(BigUint::from(1u32), 1, u32::MAX));
        let mut a = PrimeSieveCpu::new(ctx.clone(), 0, 0, 2);
        let mut b = PrimeSieveCpu::new(ctx, 1, 1, 2);
        a.init();
        b.init();
        assert_eq!(a.work_origins(), &[1271, 2531, 5891]);
        assert_eq!(b.work_origins(), &[1481, 4001]);
    }

    #[test]
    fn stopped_round_does_no_work() {
        let ctx = context(&[15551], 5);
        let mut worker = PrimeSieveCpu::new(ctx.clone(), 0, 0, 1);
        worker.load().unwrap();
        worker.init();
        // a fresh RoundState is stopped until begin_round
        assert_eq!(worker.work(), WorkStatus::Stopped);
        assert!(ctx.queue.is_empty());
    }
}
