//! Exact testing of work-unit survivors, chain extension and acceptance.
//!
//! Each entry of a unit carries a combo mask where bit `i` set means pattern
//! slot `i` is known to be composite. The tester completes the mask with exact
//! tests, extracts the surviving run, extends it past the last pattern offset
//! and scores it. The stop flag and block height are re-checked before every
//! primality test; once stale, the rest of the unit is abandoned.

use num_bigint::BigUint;
use prime_core::{
    fermat_test, format_difficulty, prime_bits, set_bits, OffsetPattern, Origin, RoundCounters,
    RoundState, WorkSource, WorkUnit, MAX_CHAIN_LENGTH, MAX_PRIME_GAP,
};

use crate::error::CandidateError;
use crate::params::MiningParams;

/// Surviving run of pattern slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainBounds {
    /// Lowest surviving slot.
    pub begin: usize,
    /// Highest surviving slot.
    pub end: usize,
    /// Surviving slots between them, inclusive.
    pub length: u32,
}

impl ChainBounds {
    pub fn new(begin: usize, end: usize, length: u32, len: usize) -> Result<Self, CandidateError> {
        if begin > end {
            return Err(CandidateError::BeginAfterEnd { begin, end });
        }
        if end >= len {
            return Err(CandidateError::IndexOutOfRange {
                begin,
                end,
                len,
                combo: 0,
            });
        }
        Ok(Self { begin, end, length })
    }

    /// Bounds of the clear bits of `combo` within a pattern of `len` slots.
    /// `Ok(None)` when every slot failed.
    pub fn from_combo(combo: u32, len: usize) -> Result<Option<Self>, CandidateError> {
        if len == 0 || len > 32 {
            return Err(CandidateError::IndexOutOfRange {
                begin: 0,
                end: len,
                len,
                combo,
            });
        }
        let mask = u32::MAX >> (32 - len as u32);
        let inverted = !combo & mask;
        if inverted == 0 {
            return Ok(None);
        }
        let begin = inverted.trailing_zeros() as usize;
        let end = 31 - inverted.leading_zeros() as usize;
        Self::new(begin, end, inverted.count_ones(), len)
            .map(Some)
            .map_err(|e| match e {
                CandidateError::IndexOutOfRange { begin, end, len, .. } => {
                    CandidateError::IndexOutOfRange {
                        begin,
                        end,
                        len,
                        combo,
                    }
                }
                other => other,
            })
    }
}

/// What happened to one work unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Every entry was tested; none met the block target.
    Completed {
        candidates: usize,
        /// Entries scored as chains of length three or more.
        chains: usize,
    },
    /// This tester committed the round's solution.
    Accepted {
        nonce: u64,
        difficulty: u32,
        chain_length: u32,
    },
    /// The round stopped or moved on; the rest of the unit was dropped.
    Abandoned,
}

/// Per-entry result.
enum Entry {
    Rejected,
    Scored { chain_length: u32 },
    Accepted(UnitOutcome),
    Stale,
}

#[derive(Clone, Debug)]
pub struct ChainTester {
    pattern: OffsetPattern,
    device_mask: u32,
    producer: u32,
}

impl ChainTester {
    pub fn new(params: &MiningParams, producer: u32) -> Self {
        let pattern = params.pattern.clone();
        let (begin, end) = pattern.device_range();
        let width = (end - begin + 1) as u32;
        let device_mask = (u32::MAX >> (32 - width)) << begin;
        Self {
            pattern,
            device_mask,
            producer,
        }
    }

    pub fn producer(&self) -> u32 {
        self.producer
    }

    /// Test every entry of `unit`. `origin` must be the origin of the unit's block.
    pub fn process(&self, unit: &WorkUnit, origin: &Origin, round: &RoundState) -> UnitOutcome {
        let height = unit.block().height;
        let mut candidates = 0;
        let mut chains = 0;

        for (nonce_offset, meta) in unit.entries() {
            if round.is_stale(height) {
                return UnitOutcome::Abandoned;
            }
            candidates += 1;
            match self.test_entry(unit, origin, round, nonce_offset, meta) {
                Ok(Entry::Rejected) => {}
                Ok(Entry::Scored { chain_length }) => {
                    if chain_length >= 3 {
                        chains += 1;
                    }
                }
                Ok(Entry::Accepted(outcome)) => return outcome,
                Ok(Entry::Stale) => return UnitOutcome::Abandoned,
                Err(e) => log::error!(target: "miner", "{e} (nonce offset {nonce_offset})"),
            }
        }
        UnitOutcome::Completed { candidates, chains }
    }

    /// Complete the combo mask with exact tests. `None` when the round went stale.
    fn resolve_combo(
        &self,
        base: &BigUint,
        meta: u32,
        source: WorkSource,
        height: u32,
        round: &RoundState,
    ) -> Option<u32> {
        let counters = round.counters();
        let mut combo = match source {
            WorkSource::Device => meta & self.device_mask,
            WorkSource::Cpu => meta,
        };

        for (slot, &offset) in self.pattern.offsets().iter().enumerate() {
            let known = match source {
                WorkSource::Device => self.pattern.is_device_tested(slot),
                WorkSource::Cpu => slot == 0,
            };
            if known || combo & (1 << slot) != 0 {
                continue;
            }
            if round.is_stale(height) {
                return None;
            }
            let passed = fermat_test(&(base + offset));
            counters.record_test(slot, passed);
            if !passed {
                combo |= 1 << slot;
            }
        }
        Some(combo)
    }

    fn test_entry(
        &self,
        unit: &WorkUnit,
        origin: &Origin,
        round: &RoundState,
        nonce_offset: u64,
        meta: u32,
    ) -> Result<Entry, CandidateError> {
        let block = unit.block();
        let height = block.height;
        let counters = round.counters();
        let base = origin.candidate(nonce_offset);

        let Some(combo) = self.resolve_combo(&base, meta, unit.source(), height, round) else {
            return Ok(Entry::Stale);
        };
        let Some(bounds) = ChainBounds::from_combo(combo, self.pattern.len())? else {
            return Ok(Entry::Rejected);
        };

        let offsets = self.pattern.offsets();
        let begin_offset = offsets[bounds.begin] as u64;
        let mut last = offsets[bounds.end] as u64;
        let mut next = last + 2;
        let mut chain_length = bounds.length;

        while next - last <= MAX_PRIME_GAP {
            if round.is_stale(height) {
                return Ok(Entry::Stale);
            }
            counters.add_tests(1);
            if fermat_test(&(&base + next)) {
                chain_length += 1;
                last = next;
            }
            next += 2;
        }

        let nonce = origin
            .global_nonce(nonce_offset, begin_offset)
            .ok_or(CandidateError::NonceOverflow {
                offset: nonce_offset,
            })?;

        if chain_length < 3 {
            record_chain(counters, chain_length, 0)?;
            return Ok(Entry::Scored { chain_length });
        }

        if round.is_stale(height) {
            return Ok(Entry::Stale);
        }
        let fast = set_bits(
            chain_length as f64 + prime_core::difficulty::fractional_remainder(&(&base + next)),
        );
        let exact = prime_bits(&(origin.prime_origin() + nonce));
        let mut difficulty = fast;
        if fast != exact {
            log::debug!(
                target: "miner",
                "difficulty mismatch for nonce {nonce:016X}: {} vs {}",
                format_difficulty(fast),
                format_difficulty(exact)
            );
            difficulty = exact;
            chain_length = exact / 10_000_000;
        }

        record_chain(counters, chain_length, difficulty)?;

        if (5..=9).contains(&chain_length) {
            log::info!(
                target: "miner",
                "{chain_length}-chain found: {}  nonce {nonce:016X}  [{}]",
                format_difficulty(difficulty),
                self.producer
            );
        }

        if chain_length >= 3 && difficulty >= block.bits && !round.is_stale(height) {
            if round.try_commit(block, nonce, difficulty, chain_length, self.producer) {
                log::info!(
                    target: "miner",
                    "Found Prime Block {} at height {height}: difficulty {} nonce {nonce:016X}",
                    block.short_hash(),
                    format_difficulty(difficulty)
                );
                return Ok(Entry::Accepted(UnitOutcome::Accepted {
                    nonce,
                    difficulty,
                    chain_length,
                }));
            }
            return Ok(Entry::Stale);
        }

        Ok(Entry::Scored { chain_length })
    }
}

/// Count a scored chain. Lengths past the histogram are logic errors.
fn record_chain(
    counters: &RoundCounters,
    chain_length: u32,
    difficulty: u32,
) -> Result<(), CandidateError> {
    if counters.record_chain(chain_length, difficulty) {
        Ok(())
    } else {
        Err(CandidateError::ChainTooLong {
            length: chain_length,
            max: MAX_CHAIN_LENGTH as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::fixtures;
    use num_bigint::BigUint;
    use prime_core::{Block, StopReason};
    use std::sync::Arc;

    const PRIMORIAL: u64 = 30030;

    fn setup(bits: u32) -> (ChainTester, Arc<RoundState>, Arc<Block>, Origin) {
        let params = fixtures::params(&[15551], 9, 5);
        let tester = ChainTester::new(&params, 4);
        let round = Arc::new(RoundState::new());
        // proof hash 1 puts the base origin at 30030
        let block = round.begin_round(Block::new(BigUint::from(1u32), 100, bits));
        let origin = Origin::from_block(&block, PRIMORIAL);
        (tester, round, block, origin)
    }

    fn cpu_unit(block: &Arc<Block>, candidates: &[u64]) -> WorkUnit {
        let offsets: Vec<u64> = candidates.iter().map(|c| c - PRIMORIAL).collect();
        let meta = vec![0; offsets.len()];
        WorkUnit::new(offsets, meta, block.clone(), 0, WorkSource::Cpu)
    }

    #[test]
    fn bounds_from_combo() {
        let b = ChainBounds::from_combo(0b000_1000, 7).unwrap().unwrap();
        assert_eq!(b, ChainBounds { begin: 0, end: 6, length: 6 });

        let b = ChainBounds::from_combo(0b100_0011, 7).unwrap().unwrap();
        assert_eq!(b, ChainBounds { begin: 2, end: 5, length: 4 });

        // bits beyond the pattern are ignored
        let b = ChainBounds::from_combo(0xFFFF_FF80 | 0b111_1110, 7).unwrap().unwrap();
        assert_eq!(b, ChainBounds { begin: 0, end: 0, length: 1 });

        assert_eq!(ChainBounds::from_combo(0b111_1111, 7).unwrap(), None);
        let full = ChainBounds::from_combo(0, 32).unwrap().unwrap();
        assert_eq!(full, ChainBounds { begin: 0, end: 31, length: 32 });
    }

    #[test]
    fn bounds_match_shifted_leading_zero_formula() {
        for len in 1..=32usize {
            for combo in [0u32, 1, 0b1010, 0xF0F0_F0F0, 0x8000_0001, u32::MAX - 1] {
                let mask = u32::MAX >> (32 - len as u32);
                let inverted = !combo & mask;
                match ChainBounds::from_combo(combo, len).unwrap() {
                    None => assert_eq!(inverted, 0),
                    Some(b) => {
                        assert_eq!(b.length, inverted.count_ones());
                        assert_eq!(b.begin, inverted.trailing_zeros() as usize);
                        let shifted = inverted << (32 - len as u32);
                        assert_eq!(b.end, len - 1 - shifted.leading_zeros() as usize);
                    }
                }
            }
        }
    }

    #[test]
    fn invalid_bounds_are_errors() {
        assert_eq!(
            ChainBounds::new(5, 2, 1, 7),
            Err(CandidateError::BeginAfterEnd { begin: 5, end: 2 })
        );
        assert!(matches!(
            ChainBounds::new(0, 7, 1, 7),
            Err(CandidateError::IndexOutOfRange { end: 7, len: 7, .. })
        ));
    }

    #[test]
    fn full_tuplet_is_accepted() {
        let (tester, round, block, origin) = setup(70_000_000);
        let unit = cpu_unit(&block, &[165_701]);

        let outcome = tester.process(&unit, &origin, &round);
        assert_eq!(
            outcome,
            UnitOutcome::Accepted {
                nonce: 165_700,
                difficulty: 70_596_060,
                chain_length: 7
            }
        );
        assert_eq!(round.stop_reason(), Some(StopReason::Found));
        let solution = round.solution().unwrap();
        assert_eq!(solution.block.nonce, 165_700);
        assert_eq!(solution.block.prime(), BigUint::from(165_701u32));
        assert_eq!(solution.producer, 4);

        let snap = round.counters().snapshot();
        assert_eq!(snap.chain_counts[7], 1);
        // slot 0 was pre-tested by compaction
        assert_eq!(snap.primes_checked[0], 0);
        assert_eq!(snap.primes_found[6], 1);
    }

    #[test]
    fn composite_slot_shortens_the_chain() {
        // 172421 + 8 is composite
        let (tester, round, block, origin) = setup(70_000_000);
        let unit = cpu_unit(&block, &[172_421]);

        let outcome = tester.process(&unit, &origin, &round);
        assert_eq!(outcome, UnitOutcome::Completed { candidates: 1, chains: 1 });
        let snap = round.counters().snapshot();
        assert_eq!(snap.chain_counts[6], 1);
        assert_eq!(snap.largest, 60_658_618);
        assert_eq!(snap.primes_checked[3], 1);
        assert_eq!(snap.primes_found[3], 0);
        assert!(!round.is_stopped());
        assert!(round.solution().is_none());
    }

    #[test]
    fn below_target_chain_is_scored_not_accepted() {
        let (tester, round, block, origin) = setup(80_000_000);
        let outcome = tester.process(&cpu_unit(&block, &[165_701]), &origin, &round);
        assert_eq!(outcome, UnitOutcome::Completed { candidates: 1, chains: 1 });
        assert!(round.solution().is_none());
        assert_eq!(round.counters().snapshot().weight, 70_596_060 * 50);
    }

    #[test]
    fn stale_unit_is_abandoned_without_side_effects() {
        let (tester, round, block, origin) = setup(70_000_000);
        let unit = cpu_unit(&block, &[165_701, 172_421]);
        round.announce_height(101);

        assert_eq!(tester.process(&unit, &origin, &round), UnitOutcome::Abandoned);
        assert_eq!(round.counters().snapshot(), prime_core::RoundCounters::default().snapshot());
        assert!(round.solution().is_none());
        assert_eq!(round.stop_reason(), Some(StopReason::NewBlock));
    }

    #[test]
    fn device_meta_skips_pretested_slots() {
        let (tester, round, block, origin) = setup(70_000_000);
        // slot 5 reported failed by the device, slots 2 and 3 reported passed
        let unit = WorkUnit::new(
            vec![165_701 - PRIMORIAL],
            vec![1 << 5],
            block.clone(),
            9,
            WorkSource::Device,
        );
        let outcome = tester.process(&unit, &origin, &round);

        let snap = round.counters().snapshot();
        assert_eq!(snap.primes_checked[2], 0);
        assert_eq!(snap.primes_checked[3], 0);
        assert_eq!(snap.primes_checked[5], 0);
        assert_eq!(snap.primes_checked[0], 1);
        // the fast score sees six slots, the exact score a full cluster of seven
        assert_eq!(
            outcome,
            UnitOutcome::Accepted {
                nonce: 165_700,
                difficulty: 70_596_060,
                chain_length: 7
            }
        );
    }

    #[test]
    fn overlong_chain_is_counted_as_an_error() {
        let counters = RoundCounters::default();
        assert_eq!(
            record_chain(&counters, 40, 400_000_000),
            Err(CandidateError::ChainTooLong { length: 40, max: 32 })
        );
        assert_eq!(
            record_chain(&counters, MAX_CHAIN_LENGTH as u32, 320_000_000),
            Err(CandidateError::ChainTooLong { length: 32, max: 32 })
        );
        assert_eq!(counters.snapshot(), RoundCounters::default().snapshot());

        assert_eq!(record_chain(&counters, 7, 70_596_060), Ok(()));
        assert_eq!(counters.snapshot().chain_counts[7], 1);
    }

    #[test]
    fn failing_entry_does_not_end_the_unit() {
        let (tester, round, block, origin) = setup(70_000_000);
        // the first nonce leaves 64 bits, the second is the known 7-tuplet
        let unit = WorkUnit::new(
            vec![u64::MAX - 5, 165_701 - PRIMORIAL],
            vec![0, 0],
            block.clone(),
            0,
            WorkSource::Cpu,
        );
        let outcome = tester.process(&unit, &origin, &round);
        assert_eq!(
            outcome,
            UnitOutcome::Accepted {
                nonce: 165_700,
                difficulty: 70_596_060,
                chain_length: 7
            }
        );
        // the overflowing entry was never scored
        assert_eq!(round.counters().snapshot().chain_counts[1], 0);
    }

    #[test]
    fn fully_composite_combo_is_rejected() {
        let (tester, round, block, origin) = setup(70_000_000);
        // 45581 is composite and the device failed every other slot
        let unit = WorkUnit::new(
            vec![45_581 - PRIMORIAL],
            vec![0b111_1110],
            block.clone(),
            0,
            WorkSource::Device,
        );
        let outcome = tester.process(&unit, &origin, &round);
        assert_eq!(outcome, UnitOutcome::Completed { candidates: 1, chains: 0 });
    }
}
