//! Survivor extraction with a base-2 Fermat pre-test on the primary offset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_bigint::BigUint;
use prime_core::{fermat_test, Block, Origin, RoundCounters, WorkSource, WorkUnit};

use crate::sieve::BitArraySieve;

/// Nonce offsets that survived the sieve and the pre-test, in ascending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Survivors {
    pub nonce_offsets: Vec<u64>,
    /// Sieve survivors that were Fermat tested.
    pub examined: u64,
    /// The stop flag interrupted compaction; the list is partial.
    pub cancelled: bool,
}

impl Survivors {
    /// Package as a CPU work unit. `None` when nothing survived or the pass was
    /// cancelled.
    pub fn into_work_unit(self, block: Arc<Block>, producer: u32) -> Option<WorkUnit> {
        if self.cancelled || self.nonce_offsets.is_empty() {
            return None;
        }
        let meta = vec![0u32; self.nonce_offsets.len()];
        Some(WorkUnit::new(
            self.nonce_offsets,
            meta,
            block,
            producer,
            WorkSource::Cpu,
        ))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CandidateCompactor {
    primorial: u64,
    primary_offset: u32,
}

impl CandidateCompactor {
    pub fn new(primorial: u64, primary_offset: u32) -> Self {
        Self {
            primorial,
            primary_offset,
        }
    }

    /// Walk the clear bits of `sieve` and keep `base_offset + i * primorial`
    /// whenever `base_origin + nonce_offset + primary_offset` passes Fermat base 2.
    ///
    /// Reads only the sieve and the origin; repeated calls on the same input
    /// return the same list.
    pub fn compact(
        &self,
        sieve: &BitArraySieve,
        base_offset: u64,
        origin: &Origin,
        cancel: &AtomicBool,
        counters: &RoundCounters,
    ) -> Survivors {
        let mut out = Survivors::default();
        let primary = BigUint::from(self.primary_offset) + origin.base_origin();

        for index in sieve.survivors() {
            if cancel.load(Ordering::Relaxed) {
                out.cancelled = true;
                break;
            }
            let Some(nonce_offset) = index
                .checked_mul(self.primorial)
                .and_then(|d| d.checked_add(base_offset))
            else {
                log::warn!(target: "miner", "nonce offset overflow at index {index}, window truncated");
                break;
            };

            let passed = fermat_test(&(&primary + nonce_offset));
            counters.record_test(0, passed);
            out.examined += 1;
            if passed {
                out.nonce_offsets.push(nonce_offset);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sieve::{base_remainders, SieveOutcome};
    use crate::wheel::ModularWheelTable;

    const PRIMORIAL: u64 = 30030;
    const PATTERN: [u32; 7] = [0, 2, 6, 8, 12, 18, 20];

    fn sieved(origin: &Origin, base_offset: u64, bits: u64) -> BitArraySieve {
        let wheel = ModularWheelTable::generate(PRIMORIAL, 6, 168).unwrap();
        let mut rems = Vec::new();
        base_remainders(&origin.candidate(base_offset), &wheel, &mut rems);
        let mut sieve = BitArraySieve::new(bits).unwrap();
        let outcome = sieve.run(&wheel, &rems, &PATTERN, &AtomicBool::new(false));
        assert_eq!(outcome, SieveOutcome::Complete);
        sieve
    }

    #[test]
    fn keeps_only_fermat_survivors_of_clear_bits() {
        // base_origin = 30030 for proof hash 1
        let origin = Origin::new(&BigUint::from(1u32), PRIMORIAL);
        let sieve = sieved(&origin, 15551, 512);
        let counters = RoundCounters::default();
        let compactor = CandidateCompactor::new(PRIMORIAL, 0);
        let out = compactor.compact(&sieve, 15551, &origin, &AtomicBool::new(false), &counters);

        assert!(!out.cancelled);
        assert_eq!(out.examined, sieve.count_survivors());
        // 165701 = 30030 + 15551 + 4 * 30030 is a prime 7-tuplet
        assert!(out.nonce_offsets.contains(&(15551 + 4 * PRIMORIAL)));
        for &offset in &out.nonce_offsets {
            assert_eq!(offset % PRIMORIAL, 15551);
            let i = (offset - 15551) / PRIMORIAL;
            assert!(!sieve.is_composite(i));
            assert!(fermat_test(&origin.candidate(offset)));
        }
        assert!(out.nonce_offsets.windows(2).all(|w| w[0] < w[1]));

        let snap = counters.snapshot();
        assert_eq!(snap.primes_checked[0], out.examined);
        assert_eq!(snap.primes_found[0], out.nonce_offsets.len() as u64);
    }

    #[test]
    fn compaction_is_idempotent() {
        let origin = Origin::new(&BigUint::from(1u32), PRIMORIAL);
        let sieve = sieved(&origin, 15551, 256);
        let compactor = CandidateCompactor::new(PRIMORIAL, 0);
        let counters = RoundCounters::default();
        let cancel = AtomicBool::new(false);
        let a = compactor.compact(&sieve, 15551, &origin, &cancel, &counters);
        let b = compactor.compact(&sieve, 15551, &origin, &cancel, &counters);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_or_cancelled_pass_produces_no_unit() {
        let block = Arc::new(Block::new(BigUint::from(1u32), 1, 1));
        assert!(Survivors::default().into_work_unit(block.clone(), 0).is_none());

        let cancelled = Survivors {
            nonce_offsets: vec![1],
            examined: 1,
            cancelled: true,
        };
        assert!(cancelled.into_work_unit(block.clone(), 0).is_none());

        let unit = Survivors {
            nonce_offsets: vec![7, 9],
            examined: 5,
            cancelled: false,
        }
        .into_work_unit(block, 3)
        .unwrap();
        assert_eq!(unit.nonce_meta(), &[0, 0]);
        assert_eq!(unit.source(), WorkSource::Cpu);
        assert_eq!(unit.producer(), 3);
    }

    #[test]
    fn stop_flag_interrupts_compaction() {
        let origin = Origin::new(&BigUint::from(1u32), PRIMORIAL);
        let sieve = BitArraySieve::new(64).unwrap();
        let out = CandidateCompactor::new(PRIMORIAL, 0).compact(
            &sieve,
            0,
            &origin,
            &AtomicBool::new(true),
            &RoundCounters::default(),
        );
        assert!(out.cancelled);
        assert_eq!(out.examined, 0);
    }
}
