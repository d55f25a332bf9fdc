//! Probabilistic primality tests composed from `num-bigint` primitives.
//!
//! Every operation here is one or more modular exponentiations; callers own
//! their cancellation checks and should test the stop flag between calls,
//! never inside them.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};

use crate::block::SMALL_PRIMES;

/// Divisors checked before any exponentiation in [`prime_check`].
const DIVISOR_PRIMES: usize = 11;

/// `base^(n-1) mod n`.
pub fn fermat_residue(n: &BigUint, base: &BigUint) -> BigUint {
    if n.is_zero() {
        return BigUint::zero();
    }
    let exp = n - 1u32;
    base.modpow(&exp, n)
}

/// Single Fermat test with base 2.
pub fn fermat_test(n: &BigUint) -> bool {
    match n.to_u32() {
        Some(0 | 1) => return false,
        Some(2 | 3) => return true,
        _ => {}
    }
    fermat_residue(n, &BigUint::from(2u32)).is_one()
}

/// Miller-Rabin with the first `rounds` primes as witnesses.
pub fn miller_rabin(n: &BigUint, rounds: u32) -> bool {
    match n.to_u32() {
        Some(0 | 1) => return false,
        Some(2 | 3) => return true,
        _ => {}
    }
    if n.is_even() {
        return false;
    }

    let one = BigUint::one();
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let witnesses = (rounds.max(1) as usize).min(SMALL_PRIMES.len());
    'witness: for &a in &SMALL_PRIMES[..witnesses] {
        let a = BigUint::from(a);
        if &a >= n {
            continue;
        }
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&BigUint::from(2u32), n);
            if x == n_minus_one {
                continue 'witness;
            }
            if x == one {
                return false;
            }
        }
        return false;
    }
    true
}

/// Full check used for difficulty scoring: small divisors, Miller-Rabin with
/// `checks` witnesses, then Fermat bases `2..2 + checks`.
///
/// A value divisible by any of the first eleven primes is rejected, including
/// those primes themselves. Candidates are always far above them.
pub fn prime_check(n: &BigUint, checks: u32) -> bool {
    for &p in &SMALL_PRIMES[..DIVISOR_PRIMES] {
        if (n % p).is_zero() {
            return false;
        }
    }

    if !miller_rabin(n, checks) {
        return false;
    }

    (2..2 + checks.max(1)).all(|base| fermat_residue(n, &BigUint::from(base)).is_one())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_is_prime(n: u64) -> bool {
        if n < 2 {
            return false;
        }
        let mut d = 2;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 1;
        }
        true
    }

    #[test]
    fn fermat_matches_trial_division_away_from_pseudoprimes() {
        // 341 and 561 are the only base-2 Fermat liars below 600
        for n in 4u64..600 {
            if n == 341 || n == 561 {
                assert!(fermat_test(&BigUint::from(n)));
                continue;
            }
            assert_eq!(fermat_test(&BigUint::from(n)), reference_is_prime(n), "n = {n}");
        }
    }

    #[test]
    fn miller_rabin_rejects_fermat_liars() {
        assert!(!miller_rabin(&BigUint::from(341u32), 1));
        assert!(!miller_rabin(&BigUint::from(561u32), 1));
        // strong pseudoprime to base 2, caught by base 3
        assert!(miller_rabin(&BigUint::from(2047u32), 1));
        assert!(!miller_rabin(&BigUint::from(2047u32), 2));
    }

    #[test]
    fn prime_check_agrees_with_reference_above_small_primes() {
        for n in 37u64..5000 {
            assert_eq!(prime_check(&BigUint::from(n), 3), reference_is_prime(n), "n = {n}");
        }
    }

    #[test]
    fn prime_check_rejects_small_divisor_primes() {
        assert!(!prime_check(&BigUint::from(31u32), 1));
        assert!(prime_check(&BigUint::from(37u32), 1));
    }

    #[test]
    fn known_large_prime_passes() {
        // 2^127 - 1
        let m127 = (BigUint::one() << 127u32) - 1u32;
        assert!(fermat_test(&m127));
        assert!(prime_check(&m127, 4));
        let composite = &m127 * BigUint::from(1_000_003u32);
        assert!(!prime_check(&composite, 4));
    }

    #[test]
    fn fermat_residue_of_zero_modulus_is_zero() {
        assert!(fermat_residue(&BigUint::zero(), &BigUint::from(2u32)).is_zero());
    }
}
