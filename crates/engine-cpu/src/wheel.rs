//! Sieving primes paired with the inverse of the primorial.
//!
//! Candidates of one window are `first + i * primorial`. For a sieving prime
//! `p` with `inv = primorial^-1 mod p`, the first index where `p` divides
//! `first + offset + i * primorial` is `((p - (first + offset) mod p) * inv) mod p`.
//! The table is read-only once built and shared between workers.

use crate::error::WheelError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModularWheelTable {
    primorial: u64,
    primes: Vec<u32>,
    inverses: Vec<u32>,
}

impl ModularWheelTable {
    /// Build the table from the `sieve_primes` first primes, skipping the
    /// `primorial_end_prime` primes already folded into `primorial`.
    pub fn generate(
        primorial: u64,
        primorial_end_prime: u32,
        sieve_primes: usize,
    ) -> Result<Self, WheelError> {
        let skip = primorial_end_prime as usize;
        if sieve_primes <= skip {
            return Err(WheelError::TooFewPrimes {
                sieve_primes,
                end_prime: primorial_end_prime,
            });
        }

        let mut primes = Vec::with_capacity(sieve_primes - skip);
        let mut inverses = Vec::with_capacity(sieve_primes - skip);
        for p in primal::Primes::all().skip(skip).take(sieve_primes - skip) {
            let prime = u32::try_from(p).map_err(|_| WheelError::TooFewPrimes {
                sieve_primes,
                end_prime: primorial_end_prime,
            })?;
            let inverse = inverse_mod(primorial, prime)
                .ok_or(WheelError::NoInverse { prime, primorial })?;
            primes.push(prime);
            inverses.push(inverse);
        }

        log::debug!(
            target: "miner",
            "wheel table: {} primes from {} to {}",
            primes.len(),
            primes.first().copied().unwrap_or(0),
            primes.last().copied().unwrap_or(0)
        );

        Ok(Self {
            primorial,
            primes,
            inverses,
        })
    }

    /// Build from precomputed `(prime, inverse)` pairs, checking each pair.
    pub fn from_pairs(primorial: u64, pairs: &[(u32, u32)]) -> Result<Self, WheelError> {
        let mut primes = Vec::with_capacity(pairs.len());
        let mut inverses = Vec::with_capacity(pairs.len());
        for &(prime, inverse) in pairs {
            if prime < 2 {
                return Err(WheelError::NoInverse { prime, primorial });
            }
            let reduced = (primorial % prime as u64) as u128;
            if reduced == 0 {
                return Err(WheelError::NoInverse { prime, primorial });
            }
            if (reduced * inverse as u128) % prime as u128 != 1 {
                return Err(WheelError::BadInverse {
                    prime,
                    inverse,
                    primorial,
                });
            }
            primes.push(prime);
            inverses.push(inverse);
        }
        Ok(Self {
            primorial,
            primes,
            inverses,
        })
    }

    pub fn primorial(&self) -> u64 {
        self.primorial
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    pub fn primes(&self) -> &[u32] {
        &self.primes
    }

    pub fn inverses(&self) -> &[u32] {
        &self.inverses
    }

    pub fn get(&self, index: usize) -> Option<(u32, u32)> {
        Some((*self.primes.get(index)?, *self.inverses.get(index)?))
    }

    /// `(prime, inverse)` pairs in ascending prime order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.primes.iter().copied().zip(self.inverses.iter().copied())
    }

    pub fn max_prime(&self) -> u32 {
        self.primes.last().copied().unwrap_or(0)
    }

    /// First index struck by `prime` for a window whose element 0 sits at
    /// `remainder` (mod prime) and a pattern slot displaced by `displacement`.
    #[inline]
    pub fn start_index(prime: u32, inverse: u32, remainder: u32, displacement: u32) -> u32 {
        let p = prime as u64;
        let r = (remainder as u64 + displacement as u64) % p;
        (((p - r) % p) * inverse as u64 % p) as u32
    }
}

/// `a^-1 mod m` by the extended Euclidean algorithm.
pub fn inverse_mod(a: u64, m: u32) -> Option<u32> {
    let m = m as i64;
    if m < 2 {
        return None;
    }
    let (mut r0, mut r1) = (m, (a % m as u64) as i64);
    let (mut t0, mut t1) = (0i64, 1i64);
    while r1 != 0 {
        let q = r0 / r1;
        (r0, r1) = (r1, r0 - q * r1);
        (t0, t1) = (t1, t0 - q * t1);
    }
    if r0 != 1 {
        return None;
    }
    Some(t0.rem_euclid(m) as u32)
}
