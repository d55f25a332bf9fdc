//! Where rounds get their blocks from and where solutions go.

use num_bigint::BigUint;
use prime_core::{Block, Solution};

/// Source of blocks to mine.
///
/// The service asks for a block at the start of every round, polls the
/// network height while the round runs and hands over committed solutions.
pub trait BlockProvider: Send {
    /// Block for the next round, or `None` when there is nothing left to mine.
    fn next_block(&mut self) -> anyhow::Result<Option<Block>>;

    /// Latest known network height. A value different from the round's height
    /// abandons the round.
    fn poll_height(&mut self) -> Option<u32> {
        None
    }

    /// Accept a solution committed by a tester.
    fn submit(&mut self, solution: &Solution) -> anyhow::Result<()>;
}

/// Mines locally generated blocks with a fixed difficulty target.
///
/// Every round gets a fresh search space: the proof hash of round `r` is the
/// configured hash plus `r * 2^64`, so nonce ranges of successive rounds never
/// cover the same numbers. The height advances once per accepted solution.
#[derive(Debug)]
pub struct SoloBlockProvider {
    proof_hash: BigUint,
    bits: u32,
    height: u32,
    issued: u64,
    solutions: Vec<Solution>,
}

impl SoloBlockProvider {
    pub fn new(proof_hash: BigUint, height: u32, bits: u32) -> Self {
        Self {
            proof_hash,
            bits,
            height,
            issued: 0,
            solutions: Vec::new(),
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Solutions submitted so far, oldest first.
    pub fn solutions(&self) -> &[Solution] {
        &self.solutions
    }
}

impl BlockProvider for SoloBlockProvider {
    fn next_block(&mut self) -> anyhow::Result<Option<Block>> {
        let proof_hash = &self.proof_hash + (BigUint::from(self.issued) << 64u32);
        self.issued += 1;
        Ok(Some(Block::new(proof_hash, self.height, self.bits)))
    }

    fn submit(&mut self, solution: &Solution) -> anyhow::Result<()> {
        if solution.block.height != self.height {
            anyhow::bail!(
                "solution for height {} but the chain is at {}",
                solution.block.height,
                self.height
            );
        }
        log::info!(
            "✅ Block {} accepted: nonce {:016X}, chain {} ({})",
            self.height,
            solution.block.nonce,
            solution.chain_length,
            prime_core::format_difficulty(solution.difficulty)
        );
        self.solutions.push(solution.clone());
        self.height += 1;
        Ok(())
    }
}
