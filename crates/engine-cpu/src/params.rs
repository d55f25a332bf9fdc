//! Immutable search parameters shared by every worker.

use std::sync::Arc;

use prime_core::{primorial, OffsetPattern, OffsetsFile};

use crate::error::ParamsError;
use crate::wheel::ModularWheelTable;

/// Default number of primes (counting the primorial primes) used for CPU sieving.
pub const DEFAULT_SIEVE_PRIMES: usize = 1 << 16;

/// Default window of `2^sieve_bits_log2` candidates per pass.
pub const DEFAULT_SIEVE_BITS_LOG2: u32 = 16;

/// Default number of windows sieved per origin before the round is exhausted.
pub const DEFAULT_SIEVES_PER_ORIGIN: u32 = 5;

#[derive(Clone, Debug)]
pub struct MiningParams {
    pub pattern: OffsetPattern,
    pub primorial_end_prime: u32,
    pub primorial: u64,
    /// Origins with the configured base offset already added.
    pub origins: Vec<u64>,
    pub wheel: Arc<ModularWheelTable>,
    pub sieve_bits: u64,
    pub sieves_per_origin: u32,
}

impl MiningParams {
    pub fn new(
        offsets: OffsetsFile,
        origins: &[u64],
        wheel: Arc<ModularWheelTable>,
        sieve_bits_log2: u32,
        sieves_per_origin: u32,
    ) -> Result<Self, ParamsError> {
        if !(6..=32).contains(&sieve_bits_log2) {
            return Err(ParamsError::BitsOutOfRange(sieve_bits_log2));
        }
        let primorial = primorial(offsets.primorial_end_prime)?;
        if wheel.primorial() != primorial {
            return Err(ParamsError::PrimorialMismatch {
                wheel: wheel.primorial(),
                config: primorial,
            });
        }
        if origins.is_empty() {
            return Err(prime_core::ConfigError::NoOrigins.into());
        }

        let origins = origins
            .iter()
            .map(|&o| o.checked_add(offsets.base_offset))
            .collect::<Option<Vec<u64>>>()
            .ok_or(ParamsError::NoSearchSpace)?;

        let sieve_bits = 1u64 << sieve_bits_log2;
        let highest = origins.iter().copied().max().unwrap_or(0);
        let window = (sieve_bits as u128) * primorial as u128;
        let room = (u64::MAX - highest) as u128 / window;
        if room == 0 {
            return Err(ParamsError::NoSearchSpace);
        }
        let capped = (sieves_per_origin.max(1) as u128).min(room) as u32;
        if capped != sieves_per_origin {
            log::warn!(
                target: "miner",
                "sieves per origin capped at {capped} to keep nonces within 64 bits"
            );
        }

        Ok(Self {
            pattern: offsets.pattern,
            primorial_end_prime: offsets.primorial_end_prime,
            primorial,
            origins,
            wheel,
            sieve_bits,
            sieves_per_origin: capped,
        })
    }

    /// Nonce span covered by one window.
    pub fn window_span(&self) -> u64 {
        self.sieve_bits * self.primorial
    }

    /// Displacements of the sieve sub-pattern.
    pub fn sieve_displacements(&self) -> Vec<u32> {
        self.pattern
            .sieve_indices()
            .iter()
            .filter_map(|&i| self.pattern.offset(i))
            .collect()
    }

    pub fn log_summary(&self) {
        log::info!(
            "primorial = {} (first {} primes), sieve = 2^{} bits, {} sieving primes up to {}",
            self.primorial,
            self.primorial_end_prime,
            self.sieve_bits.trailing_zeros(),
            self.wheel.len(),
            self.wheel.max_prime()
        );
        log::info!(
            "{} origins, {} sieves per origin",
            self.origins.len(),
            self.sieves_per_origin
        );
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use prime_core::parse_offsets;

    pub const OFFSETS: &str = "\
6
0
0, 2, 6, 8, 12, 18, 20
0, 1, 2, 3, 4, 5, 6
1, 2, 3
2, 3
";

    pub fn params(origins: &[u64], bits_log2: u32, sieves: u32) -> MiningParams {
        let offsets = parse_offsets(OFFSETS).unwrap();
        let wheel = ModularWheelTable::generate(30030, 6, 168).unwrap();
        MiningParams::new(offsets, origins, Arc::new(wheel), bits_log2, sieves).unwrap()
    }
}
