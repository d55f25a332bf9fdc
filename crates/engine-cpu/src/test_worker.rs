//! CPU test consumer: pops work units and runs them through a `ChainTester`.

use std::sync::Arc;

use prime_core::{Block, Origin};

use crate::tester::{ChainTester, UnitOutcome};
use crate::{WorkStatus, Worker, WorkerContext, WorkerKind};

pub struct PrimeTestCpu {
    id: u32,
    ctx: WorkerContext,
    tester: ChainTester,
    origin: Option<(Arc<Block>, Origin)>,
}

impl PrimeTestCpu {
    pub fn new(ctx: WorkerContext, id: u32) -> Self {
        let tester = ChainTester::new(&ctx.params, id);
        Self {
            id,
            ctx,
            tester,
            origin: None,
        }
    }

    /// Origin of `block`, recomputed only when the block changes.
    fn origin_for(&mut self, block: &Arc<Block>) -> Origin {
        match &self.origin {
            Some((cached, origin)) if Arc::ptr_eq(cached, block) => origin.clone(),
            _ => {
                let origin = Origin::from_block(block, self.ctx.params.primorial);
                self.origin = Some((block.clone(), origin.clone()));
                origin
            }
        }
    }
}

impl Worker for PrimeTestCpu {
    fn name(&self) -> &'static str {
        "cpu-test"
    }

    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Consumer
    }

    fn load(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn init(&mut self) {
        self.origin = None;
    }

    fn work(&mut self) -> WorkStatus {
        let round = self.ctx.round.clone();
        if round.is_stopped() {
            return WorkStatus::Stopped;
        }
        let Some(unit) = self.ctx.queue.pop() else {
            return WorkStatus::Idle;
        };
        if unit.block().height != round.current_height() {
            log::trace!(
                target: "miner",
                "test worker {}: dropped stale unit from height {}",
                self.id,
                unit.block().height
            );
            return WorkStatus::Progress;
        }

        let origin = self.origin_for(unit.block());
        match self.tester.process(&unit, &origin, &round) {
            UnitOutcome::Accepted { .. } => WorkStatus::Found,
            UnitOutcome::Abandoned => WorkStatus::Stopped,
            UnitOutcome::Completed { .. } => WorkStatus::Progress,
        }
    }

    fn shutdown(&mut self) {
        self.origin = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::fixtures;
    use num_bigint::BigUint;
    use prime_core::{RoundState, WorkQueue, WorkSource, WorkUnit};

    fn context() -> WorkerContext {
        WorkerContext {
            params: Arc::new(fixtures::params(&[15551], 9, 5)),
            round: Arc::new(RoundState::new()),
            queue: Arc::new(WorkQueue::new()),
        }
    }

    fn unit(block: &Arc<Block>, nonce_offset: u64) -> WorkUnit {
        WorkUnit::new(vec![nonce_offset], vec![0], block.clone(), 0, WorkSource::Cpu)
    }

    #[test]
    fn idle_on_empty_queue() {
        let ctx = context();
        ctx.round.begin_round(Block::new(BigUint::from(1u32), 1, 70_000_000));
        let mut worker = PrimeTestCpu::new(ctx, 2);
        worker.init();
        assert_eq!(worker.work(), WorkStatus::Idle);
    }

    #[test]
    fn finds_the_tuplet_and_stops_the_round() {
        let ctx = context();
        let block = ctx.round.begin_round(Block::new(BigUint::from(1u32), 1, 70_000_000));
        ctx.queue.push(unit(&block, 135_671));
        let mut worker = PrimeTestCpu::new(ctx.clone(), 2);
        worker.init();
        assert_eq!(worker.work(), WorkStatus::Found);
        assert_eq!(ctx.round.solution().unwrap().block.nonce, 165_700);
        assert_eq!(worker.work(), WorkStatus::Stopped);
    }

    #[test]
    fn units_from_an_old_height_are_dropped() {
        let ctx = context();
        let old = Arc::new(Block::new(BigUint::from(1u32), 1, 70_000_000));
        ctx.round.begin_round(Block::new(BigUint::from(1u32), 2, 70_000_000));
        ctx.queue.push(unit(&old, 135_671));
        let mut worker = PrimeTestCpu::new(ctx.clone(), 2);
        worker.init();
        assert_eq!(worker.work(), WorkStatus::Progress);
        assert!(ctx.queue.is_empty());
        assert!(ctx.round.solution().is_none());
        assert_eq!(ctx.round.counters().snapshot().tests, 0);
    }
}
