//! Wheel sieve over one window of primorial-spaced candidates.
//!
//! Bit `i` stands for `first + i * primorial`; a set bit means some slot of
//! the sieve sub-pattern is divisible by a sieving prime. Bits are packed
//! into `u64` words, bit `i & 63` of word `i >> 6`.

use std::sync::atomic::{AtomicBool, Ordering};

use num_bigint::BigUint;

use crate::error::SieveError;
use crate::wheel::ModularWheelTable;

/// Largest window a sieve may cover.
pub const MAX_SIEVE_BITS: u64 = 1 << 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SieveOutcome {
    Complete,
    /// The stop flag was raised; the bitmap is partial and must be discarded.
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct BitArraySieve {
    words: Vec<u64>,
    bits: u64,
}

impl BitArraySieve {
    /// Allocate a cleared sieve of `bits` entries (power of two, at least 64).
    pub fn new(bits: u64) -> Result<Self, SieveError> {
        if bits < 64 || !bits.is_power_of_two() || bits > MAX_SIEVE_BITS {
            return Err(SieveError::BadSize(bits));
        }
        let len = (bits / 64) as usize;
        let mut words = Vec::new();
        words
            .try_reserve_exact(len)
            .map_err(|_| SieveError::Allocation { bits })?;
        words.resize(len, 0);
        Ok(Self { words, bits })
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    #[inline]
    pub fn is_composite(&self, index: u64) -> bool {
        debug_assert!(index < self.bits);
        self.words[(index >> 6) as usize] & (1u64 << (index & 63)) != 0
    }

    #[inline]
    pub fn strike(&mut self, index: u64) {
        debug_assert!(index < self.bits);
        self.words[(index >> 6) as usize] |= 1u64 << (index & 63);
    }

    /// Strike every `prime`-th entry starting at `start`.
    fn strike_from(&mut self, start: u64, prime: u64) {
        let mut i = start;
        while i < self.bits {
            self.words[(i >> 6) as usize] |= 1u64 << (i & 63);
            i += prime;
        }
    }

    /// Indices still clear, ascending.
    pub fn survivors(&self) -> impl Iterator<Item = u64> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut open = !word;
            std::iter::from_fn(move || {
                if open == 0 {
                    return None;
                }
                let bit = open.trailing_zeros() as u64;
                open &= open - 1;
                Some(((w as u64) << 6) | bit)
            })
        })
    }

    pub fn count_survivors(&self) -> u64 {
        self.words.iter().map(|w| w.count_zeros() as u64).sum()
    }

    /// Clear, then strike every index where `first + displacement + i * primorial`
    /// is divisible by a wheel prime, for each displacement.
    ///
    /// `remainders[k]` is `first mod wheel.primes()[k]`. The stop flag is polled
    /// between primes.
    pub fn run(
        &mut self,
        wheel: &ModularWheelTable,
        remainders: &[u32],
        displacements: &[u32],
        cancel: &AtomicBool,
    ) -> SieveOutcome {
        self.clear();
        for ((prime, inverse), &remainder) in wheel.iter().zip(remainders) {
            if cancel.load(Ordering::Relaxed) {
                return SieveOutcome::Cancelled;
            }
            for &displacement in displacements {
                let start = ModularWheelTable::start_index(prime, inverse, remainder, displacement);
                self.strike_from(start as u64, prime as u64);
            }
        }
        SieveOutcome::Complete
    }
}

/// `value mod p` for every wheel prime, written into `out`.
pub fn base_remainders(value: &BigUint, wheel: &ModularWheelTable, out: &mut Vec<u32>) {
    out.clear();
    out.resize(wheel.len(), 0);
    remainders_into(value, wheel.primes(), out);
}

/// `value mod primes[k]` into `out[k]`, for as many entries as both hold.
pub fn remainders_into(value: &BigUint, primes: &[u32], out: &mut [u32]) {
    let digits = value.to_u32_digits();
    for (slot, &p) in out.iter_mut().zip(primes) {
        *slot = mod_small(&digits, p);
    }
}

/// Remainder of little-endian `u32` digits modulo `p`.
fn mod_small(digits: &[u32], p: u32) -> u32 {
    let p = p as u64;
    digits
        .iter()
        .rev()
        .fold(0u64, |r, &d| ((r << 32) | d as u64) % p) as u32
}
