#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! CPU side of the prime-cluster search pipeline.
//!
//! This crate defines the `Worker` capability trait the service layer drives
//! without knowing whether a worker sieves on the CPU, tests on the CPU, or
//! adapts a device pipeline, plus the CPU stages themselves:
//!
//! - `ModularWheelTable`: sieving primes with inverses of the primorial.
//! - `BitArraySieve`: the wheel sieve over one window of candidates.
//! - `CandidateCompactor`: extracts survivors and runs the base-2 Fermat pre-test.
//! - `ChainTester`: exact testing, chain extension, scoring and acceptance.
//! - `PrimeSieveCpu` / `PrimeTestCpu`: the producer and consumer workers.

pub mod compact;
pub mod error;
pub mod params;
pub mod sieve;
pub mod sieve_worker;
pub mod test_worker;
pub mod tester;
pub mod wheel;

use std::sync::Arc;

use prime_core::{RoundState, WorkQueue};

pub use compact::{CandidateCompactor, Survivors};
pub use error::{CandidateError, ParamsError, SieveError, WheelError};
pub use params::MiningParams;
pub use sieve::{BitArraySieve, SieveOutcome};
pub use sieve_worker::PrimeSieveCpu;
pub use test_worker::PrimeTestCpu;
pub use tester::{ChainBounds, ChainTester, UnitOutcome};
pub use wheel::ModularWheelTable;

/// Role of a worker in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    /// Sieves and pushes work units.
    Producer,
    /// Pops work units and tests them.
    Consumer,
}

/// Result of one `Worker::work` step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkStatus {
    /// Nothing to do right now; the caller should back off briefly.
    Idle,
    /// A step completed and more work is available.
    Progress,
    /// This worker committed the round's solution.
    Found,
    /// The round's stop flag was observed.
    Stopped,
}

/// Everything a worker shares with the rest of the pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub params: Arc<MiningParams>,
    pub round: Arc<RoundState>,
    pub queue: Arc<WorkQueue>,
}

/// Capability interface driven by the worker pool.
///
/// Lifecycle: `load` once at startup, `init` at the start of every round,
/// `work` repeatedly until it reports `Stopped` or `Found`, `shutdown` once.
pub trait Worker: Send {
    /// Human-readable worker name (for logs/metrics).
    fn name(&self) -> &'static str;

    fn id(&self) -> u32;

    fn kind(&self) -> WorkerKind;

    /// Allocate long-lived buffers. A failure keeps this worker out of the pool.
    fn load(&mut self) -> anyhow::Result<()>;

    /// Reset per-round state from the round's current block.
    fn init(&mut self);

    /// Run one bounded step.
    fn work(&mut self) -> WorkStatus;

    /// Release resources; the worker is not used afterwards.
    fn shutdown(&mut self);
}
