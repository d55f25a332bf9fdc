#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Math core and shared data model for the prime-cluster miner.
//!
//! This crate provides:
//! - `Block` and `Origin`: the block being mined and its primorial-aligned base value.
//! - `primality` / `difficulty`: Fermat and Miller-Rabin composition over `num-bigint`,
//!   plus the fixed-point cluster difficulty used to accept a nonce.
//! - `config`: offset-pattern and origin-list loading with validation.
//! - `WorkUnit` / `WorkQueue`: the producer -> consumer handoff.
//! - `RoundState`: stop flag, block height, solution commit and throughput counters
//!   shared by every worker of one mining round.

pub mod block;
pub mod config;
pub mod difficulty;
pub mod error;
pub mod primality;
pub mod round;
pub mod work;

pub use block::{primorial, Block, Origin, SMALL_PRIMES};
pub use config::{load_offsets, load_origins, parse_offsets, parse_origins, OffsetPattern, OffsetsFile};
pub use difficulty::{format_difficulty, prime_bits, prime_difficulty, set_bits, MAX_PRIME_GAP};
pub use error::ConfigError;
pub use primality::{fermat_test, miller_rabin, prime_check};
pub use round::{
    CounterSnapshot, RoundCounters, RoundState, Solution, StopReason, MAX_CHAIN_LENGTH,
    MAX_PATTERN_OFFSETS,
};
pub use work::{WorkQueue, WorkSource, WorkUnit};
