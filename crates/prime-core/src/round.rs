//! Shared state of one mining round.
//!
//! Memory ordering:
//! - Counters are `Relaxed`; they feed reporting only.
//! - The stop flag is written with `Release` and read with `Acquire`.
//! - Acceptance claims the stop flag with an `AcqRel` compare-and-set before the
//!   solution is stored, so exactly one tester can commit per round.

use std::array;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::block::Block;

/// Longest chain the histogram can represent; longer ones are logic errors.
pub const MAX_CHAIN_LENGTH: usize = 32;

/// Widest offset pattern supported by the 32-bit combo masks.
pub const MAX_PATTERN_OFFSETS: usize = 32;

/// Why the stop flag was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StopReason {
    Found = 1,
    NewBlock = 2,
    Exhausted = 3,
    Shutdown = 4,
}

impl StopReason {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Found),
            2 => Some(Self::NewBlock),
            3 => Some(Self::Exhausted),
            4 => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// A committed winning nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    /// The mined block with its nonce set.
    pub block: Block,
    pub difficulty: u32,
    pub chain_length: u32,
    pub producer: u32,
}

/// Throughput counters; never reset between rounds.
#[derive(Debug)]
pub struct RoundCounters {
    primes_checked: [AtomicU64; MAX_PATTERN_OFFSETS],
    primes_found: [AtomicU64; MAX_PATTERN_OFFSETS],
    chain_counts: [AtomicU64; MAX_CHAIN_LENGTH],
    tests: AtomicU64,
    sieved_bits: AtomicU64,
    largest: AtomicU32,
    weight: AtomicU64,
}

impl Default for RoundCounters {
    fn default() -> Self {
        Self {
            primes_checked: array::from_fn(|_| AtomicU64::new(0)),
            primes_found: array::from_fn(|_| AtomicU64::new(0)),
            chain_counts: array::from_fn(|_| AtomicU64::new(0)),
            tests: AtomicU64::new(0),
            sieved_bits: AtomicU64::new(0),
            largest: AtomicU32::new(0),
            weight: AtomicU64::new(0),
        }
    }
}

impl RoundCounters {
    /// Count one test of pattern slot `slot`, and whether it passed.
    pub fn record_test(&self, slot: usize, passed: bool) {
        if let Some(c) = self.primes_checked.get(slot) {
            c.fetch_add(1, Ordering::Relaxed);
        }
        if passed {
            if let Some(c) = self.primes_found.get(slot) {
                c.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.tests.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold in per-slot totals reported by a device pipeline.
    pub fn add_slot_tests(&self, slot: usize, checked: u64, found: u64) {
        if let Some(c) = self.primes_checked.get(slot) {
            c.fetch_add(checked, Ordering::Relaxed);
        }
        if let Some(c) = self.primes_found.get(slot) {
            c.fetch_add(found, Ordering::Relaxed);
        }
        self.tests.fetch_add(checked, Ordering::Relaxed);
    }

    /// Count primality tests that are not tied to a pattern slot.
    pub fn add_tests(&self, n: u64) {
        self.tests.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_sieved_bits(&self, n: u64) {
        self.sieved_bits.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a scored chain. Returns `false` when the length does not fit the
    /// histogram; nothing is recorded in that case.
    pub fn record_chain(&self, chain_length: u32, difficulty: u32) -> bool {
        let Some(slot) = self.chain_counts.get(chain_length as usize) else {
            return false;
        };
        slot.fetch_add(1, Ordering::Relaxed);
        self.largest.fetch_max(difficulty, Ordering::Relaxed);
        if chain_length >= 3 {
            self.weight
                .fetch_add(difficulty as u64 * 50, Ordering::Relaxed);
        }
        true
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |a: &[AtomicU64]| -> Vec<u64> {
            a.iter().map(|c| c.load(Ordering::Relaxed)).collect()
        };
        CounterSnapshot {
            primes_checked: load(&self.primes_checked),
            primes_found: load(&self.primes_found),
            chain_counts: load(&self.chain_counts),
            tests: self.tests.load(Ordering::Relaxed),
            sieved_bits: self.sieved_bits.load(Ordering::Relaxed),
            largest: self.largest.load(Ordering::Relaxed),
            weight: self.weight.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RoundCounters`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub primes_checked: Vec<u64>,
    pub primes_found: Vec<u64>,
    pub chain_counts: Vec<u64>,
    pub tests: u64,
    pub sieved_bits: u64,
    pub largest: u32,
    pub weight: u64,
}

/// Stop flag, current block and counters shared by every worker.
#[derive(Debug)]
pub struct RoundState {
    stop: AtomicBool,
    stop_reason: AtomicU8,
    height: AtomicU32,
    block: RwLock<Arc<Block>>,
    solution: Mutex<Option<Solution>>,
    counters: RoundCounters,
}

impl RoundState {
    /// Idle state: stopped until the first round begins.
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(true),
            stop_reason: AtomicU8::new(StopReason::Shutdown as u8),
            height: AtomicU32::new(0),
            block: RwLock::new(Arc::new(Block::new(Default::default(), 0, u32::MAX))),
            solution: Mutex::new(None),
            counters: RoundCounters::default(),
        }
    }

    /// Install a new block and clear the stop flag.
    pub fn begin_round(&self, block: Block) -> Arc<Block> {
        let block = Arc::new(block);
        *self.block.write() = block.clone();
        *self.solution.lock() = None;
        self.height.store(block.height, Ordering::Release);
        self.stop_reason.store(0, Ordering::Relaxed);
        self.stop.store(false, Ordering::Release);
        block
    }

    /// Block of the current round.
    pub fn block(&self) -> Arc<Block> {
        self.block.read().clone()
    }

    pub fn current_height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Raw stop flag, for loops that poll it between steps.
    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    /// True when work for `height` must be abandoned.
    pub fn is_stale(&self, height: u32) -> bool {
        self.is_stopped() || self.current_height() != height
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        StopReason::from_u8(self.stop_reason.load(Ordering::Acquire))
    }

    /// Raise the stop flag. Returns `false` if it was already raised.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let claimed = self
            .stop
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.stop_reason.store(reason as u8, Ordering::Release);
        }
        claimed
    }

    /// Record a newer network height; a change stops the round.
    pub fn announce_height(&self, height: u32) -> bool {
        let previous = self.height.swap(height, Ordering::AcqRel);
        if previous != height {
            self.request_stop(StopReason::NewBlock);
            return true;
        }
        false
    }

    /// Commit a winning nonce for `block`.
    ///
    /// Succeeds only for the first caller while the round is live and the
    /// height has not moved; losers leave the committed solution untouched.
    pub fn try_commit(
        &self,
        block: &Block,
        nonce: u64,
        difficulty: u32,
        chain_length: u32,
        producer: u32,
    ) -> bool {
        if self.current_height() != block.height {
            return false;
        }
        // held across the claim so observers never see Found without a solution
        let mut slot = self.solution.lock();
        if !self.request_stop(StopReason::Found) {
            return false;
        }
        let mut solved = block.clone();
        solved.nonce = nonce;
        *slot = Some(Solution {
            block: solved,
            difficulty,
            chain_length,
            producer,
        });
        true
    }

    pub fn solution(&self) -> Option<Solution> {
        self.solution.lock().clone()
    }

    pub fn counters(&self) -> &RoundCounters {
        &self.counters
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}
