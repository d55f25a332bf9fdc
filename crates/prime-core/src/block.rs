use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};

use crate::error::ConfigError;

/// The first primes, enough to build any primorial that fits in 64 bits.
pub const SMALL_PRIMES: [u32; 15] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];

/// Width of the proof hash in bits.
pub const PROOF_HASH_BITS: u64 = 1024;

/// Product of the first `end_prime` primes.
pub fn primorial(end_prime: u32) -> Result<u64, ConfigError> {
    let count = end_prime as usize;
    if count > SMALL_PRIMES.len() {
        return Err(ConfigError::PrimorialOverflow(end_prime));
    }
    SMALL_PRIMES[..count]
        .iter()
        .try_fold(1u64, |acc, &p| acc.checked_mul(p as u64))
        .ok_or(ConfigError::PrimorialOverflow(end_prime))
}

/// The block being mined, as far as the search pipeline is concerned.
///
/// Header hashing and validation belong to the block provider; the pipeline
/// only needs the proof hash, the height it was issued for, the required
/// difficulty and a place to put the winning nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// 1024-bit proof hash the chain must be anchored on.
    pub proof_hash: BigUint,
    pub height: u32,
    /// Required difficulty in fixed point (difficulty * 10^7).
    pub bits: u32,
    pub nonce: u64,
}

impl Block {
    pub fn new(proof_hash: BigUint, height: u32, bits: u32) -> Self {
        Self {
            proof_hash,
            height,
            bits,
            nonce: 0,
        }
    }

    /// Build a block from a big-endian hex proof hash (optional `0x` prefix).
    pub fn from_hex(proof_hash: &str, height: u32, bits: u32) -> Result<Self, ConfigError> {
        let trimmed = proof_hash.trim().trim_start_matches("0x");
        let padded;
        let digits = if trimmed.len() % 2 == 1 {
            padded = format!("0{trimmed}");
            padded.as_str()
        } else {
            trimmed
        };
        let bytes =
            hex::decode(digits).map_err(|e| ConfigError::InvalidProofHash(e.to_string()))?;
        let hash = BigUint::from_bytes_be(&bytes);
        if hash.is_zero() {
            return Err(ConfigError::InvalidProofHash("proof hash is zero".into()));
        }
        if hash.bits() > PROOF_HASH_BITS {
            return Err(ConfigError::InvalidProofHash(format!(
                "{} bits, expected at most {PROOF_HASH_BITS}",
                hash.bits()
            )));
        }
        Ok(Self::new(hash, height, bits))
    }

    /// The prime this block claims: proof hash + nonce.
    pub fn prime(&self) -> BigUint {
        &self.proof_hash + self.nonce
    }

    /// Leading hex digits of the proof hash, for log lines.
    pub fn short_hash(&self) -> String {
        let mut s = self.proof_hash.to_str_radix(16);
        s.truncate(20);
        s
    }
}

/// Primorial-aligned base value of one mining round.
///
/// `base = proof_hash + (primorial - proof_hash mod primorial)`; an already
/// aligned hash still advances by a whole primorial. Immutable for the round.
#[derive(Clone, Debug)]
pub struct Origin {
    prime_origin: BigUint,
    base_origin: BigUint,
    /// base_origin - prime_origin, always in 1..=primorial
    adjustment: u64,
    primorial: u64,
}

impl Origin {
    pub fn new(proof_hash: &BigUint, primorial: u64) -> Self {
        let remainder = (proof_hash % primorial).to_u64().unwrap_or(0);
        let adjustment = primorial - remainder;
        Self {
            prime_origin: proof_hash.clone(),
            base_origin: proof_hash + adjustment,
            adjustment,
            primorial,
        }
    }

    pub fn from_block(block: &Block, primorial: u64) -> Self {
        Self::new(&block.proof_hash, primorial)
    }

    pub fn prime_origin(&self) -> &BigUint {
        &self.prime_origin
    }

    pub fn base_origin(&self) -> &BigUint {
        &self.base_origin
    }

    pub fn primorial(&self) -> u64 {
        self.primorial
    }

    /// Absolute value of a candidate: base + nonce offset.
    pub fn candidate(&self, nonce_offset: u64) -> BigUint {
        &self.base_origin + nonce_offset
    }

    /// Translate a nonce offset plus the displacement of the chain's first prime
    /// into the nonce relative to the proof hash. `None` if it leaves 64 bits.
    pub fn global_nonce(&self, nonce_offset: u64, begin: u64) -> Option<u64> {
        self.adjustment
            .checked_add(nonce_offset)?
            .checked_add(begin)
    }
}
