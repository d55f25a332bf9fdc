//! Fixed-point cluster difficulty.
//!
//! A cluster starting at a prime `p` is every prime reachable from `p` by steps
//! of at most [`MAX_PRIME_GAP`]. Its difficulty is the cluster size plus a
//! fractional part derived from the Fermat remainder of the first value past
//! the cluster (`last + MAX_PRIME_GAP + 2`). Difficulties travel as `u32` with
//! seven decimal digits (`difficulty * 10^7`).

use num_bigint::BigUint;
use num_traits::Zero;

use crate::primality::{fermat_residue, prime_check};

/// Largest allowed distance between consecutive primes of one cluster.
pub const MAX_PRIME_GAP: u64 = 12;

/// Fixed-point scale of difficulty values.
pub const DIFFICULTY_SCALE: f64 = 10_000_000.0;

/// Convert a decimal difficulty into its fixed-point representation.
pub fn set_bits(difficulty: f64) -> u32 {
    (DIFFICULTY_SCALE * difficulty) as u32
}

/// Decimal difficulty of a fixed-point value.
pub fn bits_to_difficulty(bits: u32) -> f64 {
    bits as f64 / DIFFICULTY_SCALE
}

/// Render fixed-point difficulty with its seven decimals.
pub fn format_difficulty(bits: u32) -> String {
    format!("{:.7}", bits_to_difficulty(bits))
}

/// `((c - 2^(c-1) mod c) << 24) / c`, truncated to 32 bits.
pub fn fractional_difficulty(composite: &BigUint) -> u32 {
    if composite.is_zero() {
        return 0;
    }
    let residue = fermat_residue(composite, &BigUint::from(2u32));
    let scaled = ((composite - residue) << 24u32) / composite;
    scaled.iter_u32_digits().next().unwrap_or(0)
}

/// Fractional part contributed by the first composite past a cluster.
/// Falls back to zero whenever the ratio leaves `[0, 1]`.
pub fn fractional_remainder(composite: &BigUint) -> f64 {
    let fractional = fractional_difficulty(composite);
    if fractional == 0 {
        return 0.0;
    }
    let remainder = 1_000_000.0 / fractional as f64;
    if !(0.0..=1.0).contains(&remainder) {
        return 0.0;
    }
    remainder
}

/// Score the cluster anchored at `prime`, `0.0` when it is not prime.
pub fn prime_difficulty(prime: &BigUint, checks: u32) -> f64 {
    if !prime_check(prime, checks) {
        return 0.0;
    }

    let mut last = prime.clone();
    let mut next = prime + 2u32;
    let mut cluster_size = 1u32;

    while next <= &last + MAX_PRIME_GAP {
        if prime_check(&next, checks) {
            last = next.clone();
            cluster_size += 1;
        }
        next += 2u32;
    }

    cluster_size as f64 + fractional_remainder(&next)
}

/// Fixed-point difficulty of the cluster anchored at `prime`.
pub fn prime_bits(prime: &BigUint) -> u32 {
    set_bits(prime_difficulty(prime, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_bits_truncates_to_seven_digits() {
        assert_eq!(set_bits(7.0), 70_000_000);
        assert_eq!(set_bits(3.12345678), 31_234_567);
        assert_eq!(format_difficulty(70_596_060), "7.0596060");
    }

    #[test]
    fn seven_tuplet_scores_above_seven() {
        // 165701 + {0, 2, 6, 8, 12, 18, 20} are all prime, nothing else until +34
        let bits = prime_bits(&BigUint::from(165_701u64));
        assert_eq!(bits, 70_596_060);
    }

    #[test]
    fn broken_tuplet_scores_cluster_of_six() {
        // 172421 + 8 is composite, the other six pattern members are prime
        let bits = prime_bits(&BigUint::from(172_421u64));
        assert_eq!(bits, 60_658_618);
    }

    #[test]
    fn composite_anchor_scores_zero() {
        assert_eq!(prime_bits(&BigUint::from(165_703u64 * 3)), 0);
    }

    #[test]
    fn fractional_remainder_is_bounded() {
        for c in [165_735u64, 172_455, 1_000_001, 99_999_999] {
            let r = fractional_remainder(&BigUint::from(c));
            assert!((0.0..=1.0).contains(&r), "c = {c}, r = {r}");
        }
        assert_eq!(fractional_remainder(&BigUint::zero()), 0.0);
    }
}
