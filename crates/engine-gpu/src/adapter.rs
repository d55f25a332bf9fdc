//! Worker that drives a `DevicePipeline` and feeds its results to the shared queue.

use anyhow::Context;
use engine_cpu::{WorkStatus, Worker, WorkerContext, WorkerKind};
use prime_core::StopReason;

use crate::frame::{FrameBuffers, FrameResourceSet};
use crate::pipeline::{DevicePipeline, FillOutcome};

pub struct GpuSieveAdapter {
    id: u32,
    ctx: WorkerContext,
    pipeline: Box<dyn DevicePipeline>,
    frames: Option<FrameResourceSet>,
}

impl GpuSieveAdapter {
    pub fn new(ctx: WorkerContext, id: u32, pipeline: Box<dyn DevicePipeline>) -> Self {
        Self {
            id,
            ctx,
            pipeline,
            frames: None,
        }
    }

    /// Fold a drained frame's counters into the round and queue its results.
    fn drain(&self, frame: &mut FrameBuffers) -> usize {
        let round = &self.ctx.round;
        for (slot, (&checked, &found)) in frame
            .primes_checked
            .iter()
            .zip(&frame.primes_found)
            .enumerate()
        {
            if checked > 0 {
                round.counters().add_slot_tests(slot, checked, found);
            }
        }
        match frame.drain(self.id) {
            Some(unit) if unit.block().height == round.current_height() => {
                let n = unit.len();
                self.ctx.queue.push(unit);
                n
            }
            _ => 0,
        }
    }
}

impl Worker for GpuSieveAdapter {
    fn name(&self) -> &'static str {
        self.pipeline.name()
    }

    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Producer
    }

    fn load(&mut self) -> anyhow::Result<()> {
        self.pipeline
            .load()
            .with_context(|| format!("device worker {} failed to load", self.id))?;
        let layout = self.pipeline.layout();
        let frames = FrameResourceSet::new(&layout)
            .with_context(|| format!("device worker {} could not allocate frames", self.id))?;
        log::info!(
            "device worker {} ({}): 2 frames of {} candidates, {}-bit window",
            self.id,
            self.pipeline.name(),
            layout.max_candidates,
            layout.sieve_bits
        );
        self.frames = Some(frames);
        Ok(())
    }

    fn init(&mut self) {
        if let Some(frames) = self.frames.as_mut() {
            frames.reset();
        }
        self.pipeline.begin_round(self.ctx.round.block());
    }

    fn work(&mut self) -> WorkStatus {
        let round = self.ctx.round.clone();
        if round.is_stopped() {
            return WorkStatus::Stopped;
        }
        let Some(mut frames) = self.frames.take() else {
            return WorkStatus::Idle;
        };

        let (filling, draining) = frames.split();
        let outcome = self.pipeline.fill(filling, round.stop_flag());
        self.drain(draining);
        frames.swap();

        let status = match outcome {
            Ok(FillOutcome::Filled) => WorkStatus::Progress,
            Ok(FillOutcome::Idle) => WorkStatus::Idle,
            Ok(FillOutcome::Cancelled) => WorkStatus::Stopped,
            Ok(FillOutcome::Exhausted) => {
                // the frame just filled is still valid for this round
                let (_, last) = frames.split();
                self.drain(last);
                log::info!(
                    target: "miner",
                    "device worker {}: origins exhausted, requesting more work",
                    self.id
                );
                round.request_stop(StopReason::Exhausted);
                WorkStatus::Stopped
            }
            Err(e) => {
                // leaves the round to the other workers
                log::error!(target: "miner", "device worker {}: {e}", self.id);
                WorkStatus::Stopped
            }
        };
        self.frames = Some(frames);
        status
    }

    fn shutdown(&mut self) {
        self.frames = None;
        log::debug!(target: "miner", "device worker {} shut down", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::frame::FrameLayout;
    use crate::pipeline::{HostPipelineConfig, HostSievePipeline};
    use crate::tests::params;
    use engine_cpu::{ChainTester, UnitOutcome};
    use num_bigint::BigUint;
    use prime_core::{Block, Origin, RoundState, WorkQueue, WorkSource};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn adapter(sieves: u32) -> (GpuSieveAdapter, WorkerContext) {
        let ctx = WorkerContext {
            params: Arc::new(params(&[15551], sieves)),
            round: Arc::new(RoundState::new()),
            queue: Arc::new(WorkQueue::new()),
        };
        let pipeline = HostSievePipeline::new(
            ctx.params.clone(),
            HostPipelineConfig {
                sieve_primes: 1 << 12,
                max_candidates_log2: 8,
            },
            0,
            1,
        );
        (GpuSieveAdapter::new(ctx.clone(), 3, Box::new(pipeline)), ctx)
    }

    #[test]
    fn first_frame_is_drained_on_the_next_step() {
        let (mut worker, ctx) = adapter(5);
        worker.load().unwrap();
        ctx.round
            .begin_round(Block::new(BigUint::from(1u32), 1, u32::MAX));
        worker.init();

        assert_eq!(worker.work(), WorkStatus::Progress);
        assert!(ctx.queue.is_empty());
        assert_eq!(worker.work(), WorkStatus::Progress);
        let unit = ctx.queue.pop().unwrap();
        assert_eq!(unit.source(), WorkSource::Device);
        assert_eq!(unit.producer(), 3);
        assert!(unit.nonce_offsets().contains(&(15551 + 4 * 30030)));
        assert!(ctx.round.counters().snapshot().primes_checked[2] > 0);
    }

    #[test]
    fn device_units_are_accepted_by_the_chain_tester() {
        let (mut worker, ctx) = adapter(1);
        worker.load().unwrap();
        let block = ctx
            .round
            .begin_round(Block::new(BigUint::from(1u32), 1, 70_000_000));
        worker.init();

        // one origin, one sieve: the single fill exhausts and drains at once
        assert_eq!(worker.work(), WorkStatus::Stopped);
        assert_eq!(ctx.round.stop_reason(), Some(StopReason::Exhausted));
        let unit = ctx.queue.pop().unwrap();

        // the tester sees a live round again after a restart at the same block
        let round = RoundState::new();
        round.begin_round((*block).clone());
        let tester = ChainTester::new(&ctx.params, 0);
        let origin = Origin::from_block(&block, 30030);
        match tester.process(&unit, &origin, &round) {
            UnitOutcome::Accepted { nonce, chain_length, .. } => {
                assert_eq!(nonce, 165_700);
                assert_eq!(chain_length, 7);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    /// Loads fine, then fails every fill.
    struct BrokenPipeline;

    impl DevicePipeline for BrokenPipeline {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn layout(&self) -> FrameLayout {
            FrameLayout {
                sieve_bits: 512,
                sieve_primes: 16,
                pattern_len: 7,
                max_candidates: 16,
                bucket_len: 16 * 7,
            }
        }

        fn load(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn begin_round(&mut self, _block: Arc<Block>) {}

        fn fill(
            &mut self,
            _frame: &mut FrameBuffers,
            _cancel: &AtomicBool,
        ) -> Result<FillOutcome, DeviceError> {
            Err(DeviceError::Layout("kernel launch failed".to_string()))
        }
    }

    #[test]
    fn fill_error_stops_only_this_worker() {
        let (_, ctx) = adapter(1);
        let mut worker = GpuSieveAdapter::new(ctx.clone(), 4, Box::new(BrokenPipeline));
        worker.load().unwrap();
        ctx.round
            .begin_round(Block::new(BigUint::from(1u32), 1, u32::MAX));
        worker.init();

        assert_eq!(worker.work(), WorkStatus::Stopped);
        assert!(!ctx.round.is_stopped());
        assert_eq!(ctx.round.stop_reason(), None);
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn stopped_round_leaves_the_queue_alone() {
        let (mut worker, ctx) = adapter(5);
        worker.load().unwrap();
        worker.init();
        assert_eq!(worker.work(), WorkStatus::Stopped);
        assert!(ctx.queue.is_empty());
    }
}
