//! Device sieve pipelines.
//!
//! A pipeline fills one `FrameBuffers` per step in three stages:
//!
//! 1. bucket sieve of sub-pattern A with the first `sieve_primes` wheel primes,
//!    compacted into the pre-nonce list;
//! 2. elimination of sub-pattern B slots by the remaining wheel primes,
//!    compacted into the nonce list;
//! 3. base-2 Fermat pre-test of sub-pattern T, written to the result list with
//!    a combo mask (bit `i` set = slot `i` failed).
//!
//! `HostSievePipeline` runs those stages on the host with the same buffer
//! layout a device implementation uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use engine_cpu::sieve::remainders_into;
use engine_cpu::{MiningParams, ModularWheelTable};
use num_bigint::BigUint;
use prime_core::{fermat_test, Block, Origin};

use crate::error::DeviceError;
use crate::frame::{FrameBuffers, FrameLayout};

/// Result of one `DevicePipeline::fill`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// The frame holds one window's results.
    Filled,
    /// The frame is filled and every owned origin has been sieved
    /// `sieves_per_origin` times.
    Exhausted,
    /// Nothing to sieve for this round.
    Idle,
    /// The stop flag was raised mid-fill; the frame must be discarded.
    Cancelled,
}

pub trait DevicePipeline: Send {
    fn name(&self) -> &'static str;

    /// Buffer sizes this pipeline expects.
    fn layout(&self) -> FrameLayout;

    fn load(&mut self) -> Result<(), DeviceError>;

    /// Point the pipeline at a new block and rewind its origin slots.
    fn begin_round(&mut self, block: Arc<Block>);

    /// Fill `frame` with the next window. Polls `cancel` between stages and
    /// between primes.
    fn fill(
        &mut self,
        frame: &mut FrameBuffers,
        cancel: &AtomicBool,
    ) -> Result<FillOutcome, DeviceError>;
}

/// Tuning knobs of a host pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostPipelineConfig {
    /// Wheel primes used by the stage-one bucket sieve; the rest go to stage two.
    pub sieve_primes: usize,
    /// Each candidate list holds `2^max_candidates_log2` entries.
    pub max_candidates_log2: u32,
}

impl Default for HostPipelineConfig {
    fn default() -> Self {
        Self {
            sieve_primes: 1 << 12,
            max_candidates_log2: 12,
        }
    }
}

pub struct HostSievePipeline {
    params: Arc<MiningParams>,
    config: HostPipelineConfig,
    shard: usize,
    shards: usize,
    /// Pattern displacements of sub-pattern A.
    sieve_displacements: Vec<u32>,
    /// Pattern displacements of sub-pattern B.
    compact_displacements: Vec<u32>,
    /// Remainders of the window start modulo every wheel prime.
    remainders: Vec<u32>,
    work_origins: Vec<u64>,
    slot: usize,
    cycles: u32,
    round: Option<(Arc<Block>, Origin)>,
    loaded: bool,
}

impl HostSievePipeline {
    pub fn new(
        params: Arc<MiningParams>,
        config: HostPipelineConfig,
        shard: usize,
        shards: usize,
    ) -> Self {
        let pattern = &params.pattern;
        let sieve_displacements = params.sieve_displacements();
        let compact_displacements = pattern
            .compact_indices()
            .iter()
            .filter_map(|&i| pattern.offset(i))
            .collect();
        Self {
            params,
            config,
            shard,
            shards: shards.max(1),
            sieve_displacements,
            compact_displacements,
            remainders: Vec::new(),
            work_origins: Vec::new(),
            slot: 0,
            cycles: 0,
            round: None,
            loaded: false,
        }
    }

    fn stage_one_primes(&self) -> usize {
        self.config
            .sieve_primes
            .min(self.params.wheel.len())
            .min(u16::MAX as usize + 1)
    }

    /// Stage one: bucket sieve of sub-pattern A, compacted into the pre-nonce list.
    fn sieve_window(
        &self,
        frame: &mut FrameBuffers,
        base_offset: u64,
        cancel: &AtomicBool,
    ) -> bool {
        let wheel = &self.params.wheel;
        let primes = self.stage_one_primes();
        let bits = self.params.sieve_bits;

        frame.window_data[..primes].copy_from_slice(&self.remainders[..primes]);

        let mut entries = 0;
        for k in 0..primes {
            let Some((prime, inverse)) = wheel.get(k) else {
                break;
            };
            for &displacement in &self.sieve_displacements {
                if entries == frame.bucket_o.len() {
                    break;
                }
                frame.bucket_o[entries] = ModularWheelTable::start_index(
                    prime,
                    inverse,
                    frame.window_data[k],
                    displacement,
                );
                frame.bucket_away[entries] = k as u16;
                entries += 1;
            }
        }

        frame.bit_array_sieve.fill(0);
        let mut current = usize::MAX;
        for e in 0..entries {
            let k = frame.bucket_away[e] as usize;
            if k != current {
                if cancel.load(Ordering::Relaxed) {
                    return false;
                }
                current = k;
            }
            let prime = wheel.primes()[k] as u64;
            let mut i = frame.bucket_o[e] as u64;
            while i < bits {
                frame.bit_array_sieve[(i >> 5) as usize] |= 1u32 << (i & 31);
                i += prime;
            }
        }

        let primorial = self.params.primorial;
        let cap = frame.capacity();
        let mut count = 0;
        let mut dropped = 0u64;
        for (w, &word) in frame.bit_array_sieve.iter().enumerate() {
            let mut open = !word;
            while open != 0 {
                let index = ((w as u64) << 5) | open.trailing_zeros() as u64;
                open &= open - 1;
                if count == cap {
                    dropped += 1;
                    continue;
                }
                frame.pre_nonce_offsets[count] = base_offset + index * primorial;
                frame.pre_nonce_meta[count] = 0;
                count += 1;
            }
        }
        frame.pre_nonce_count = count;
        if dropped > 0 {
            log::warn!(
                target: "miner",
                "{}: pre-nonce list full, {dropped} candidates dropped",
                self.name()
            );
        }
        true
    }

    /// Stage two: drop pre-nonces where a B slot has a factor among the
    /// remaining wheel primes. Polls `cancel` once per pre-nonce.
    fn compact_window(
        &self,
        frame: &mut FrameBuffers,
        base_offset: u64,
        cancel: &AtomicBool,
    ) -> bool {
        let wheel = &self.params.wheel;
        let primorial = self.params.primorial;
        let from = self.stage_one_primes();

        let mut count = 0;
        for n in 0..frame.pre_nonce_count {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let offset = frame.pre_nonce_offsets[n];
            let index = (offset - base_offset) / primorial;
            let divisible = wheel.primes()[from..]
                .iter()
                .zip(&self.remainders[from..])
                .any(|(&p, &r)| {
                    let p = p as u64;
                    let step = (index % p) * (primorial % p) % p;
                    self.compact_displacements
                        .iter()
                        .any(|&d| (r as u64 + d as u64 + step) % p == 0)
                });
            if !divisible {
                frame.nonce_offsets[count] = offset;
                frame.nonce_meta[count] = frame.pre_nonce_meta[n];
                count += 1;
            }
        }
        frame.nonce_count = count;
        true
    }

    /// Stage three: Fermat pre-test of sub-pattern T. Candidates whose tested
    /// slots all fail are dropped.
    fn pretest_window(&self, frame: &mut FrameBuffers, origin: &Origin, cancel: &AtomicBool) -> bool {
        let pattern = &self.params.pattern;
        let tested = pattern.device_tested_indices();
        let all_failed: u32 = tested.iter().fold(0, |m, &i| m | (1 << i));

        let mut count = 0;
        for n in 0..frame.nonce_count {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let base = origin.candidate(frame.nonce_offsets[n]);
            let mut combo = frame.nonce_meta[n];
            for &slot in tested {
                let displacement = pattern.offset(slot).unwrap_or(0);
                let passed = fermat_test(&(&base + displacement));
                frame.primes_checked[slot] += 1;
                if passed {
                    frame.primes_found[slot] += 1;
                } else {
                    combo |= 1 << slot;
                }
            }
            if combo & all_failed != all_failed {
                frame.result_offsets[count] = frame.nonce_offsets[n];
                frame.result_meta[count] = combo;
                count += 1;
            }
        }
        frame.result_count = count;
        true
    }
}

impl DevicePipeline for HostSievePipeline {
    fn name(&self) -> &'static str {
        "host-sieve"
    }

    fn layout(&self) -> FrameLayout {
        let sieve_primes = self.stage_one_primes();
        FrameLayout {
            sieve_bits: self.params.sieve_bits,
            sieve_primes,
            pattern_len: self.params.pattern.len(),
            max_candidates: 1usize << self.config.max_candidates_log2.min(24),
            bucket_len: sieve_primes * self.sieve_displacements.len(),
        }
    }

    fn load(&mut self) -> Result<(), DeviceError> {
        self.layout().validate()?;
        self.remainders = vec![0; self.params.wheel.len()];
        self.loaded = true;
        log::info!(
            "{}: stage one sieves with {} primes, {} more for sub-pattern B",
            self.name(),
            self.stage_one_primes(),
            self.params.wheel.len() - self.stage_one_primes()
        );
        Ok(())
    }

    fn begin_round(&mut self, block: Arc<Block>) {
        self.work_origins = self
            .params
            .origins
            .iter()
            .copied()
            .skip(self.shard)
            .step_by(self.shards)
            .collect();
        self.slot = 0;
        self.cycles = 0;
        let origin = Origin::from_block(&block, self.params.primorial);
        self.round = Some((block, origin));
    }

    fn fill(
        &mut self,
        frame: &mut FrameBuffers,
        cancel: &AtomicBool,
    ) -> Result<FillOutcome, DeviceError> {
        if !self.loaded {
            return Err(DeviceError::NotLoaded(self.name()));
        }
        let Some((block, origin)) = self.round.clone() else {
            return Ok(FillOutcome::Idle);
        };
        let Some(&base_offset) = self.work_origins.get(self.slot) else {
            return Ok(FillOutcome::Idle);
        };

        frame.reset();
        let first: BigUint = origin.candidate(base_offset);
        remainders_into(&first, self.params.wheel.primes(), &mut self.remainders);

        if !self.sieve_window(frame, base_offset, cancel) {
            return Ok(FillOutcome::Cancelled);
        }
        if !self.compact_window(frame, base_offset, cancel) {
            return Ok(FillOutcome::Cancelled);
        }
        if !self.pretest_window(frame, &origin, cancel) {
            return Ok(FillOutcome::Cancelled);
        }
        frame.block = Some(block);

        self.work_origins[self.slot] = base_offset.saturating_add(self.params.window_span());
        self.slot += 1;
        if self.slot == self.work_origins.len() {
            self.slot = 0;
            self.cycles += 1;
            if self.cycles >= self.params.sieves_per_origin {
                return Ok(FillOutcome::Exhausted);
            }
        }
        Ok(FillOutcome::Filled)
    }
}
