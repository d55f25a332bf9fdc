//! Producer -> consumer handoff of sieve survivors.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::Block;

/// Who produced a work unit; decides how its metadata is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkSource {
    /// CPU compaction: metadata is always 0, slot 0 passed the Fermat pre-test.
    Cpu,
    /// Device pipeline: metadata bit `i` set means slot `i` failed a device pre-test.
    Device,
}

/// Immutable batch of survivors handed from one producer to one consumer.
#[derive(Clone, Debug)]
pub struct WorkUnit {
    nonce_offsets: Vec<u64>,
    nonce_meta: Vec<u32>,
    block: Arc<Block>,
    producer: u32,
    source: WorkSource,
}

impl WorkUnit {
    /// Build a unit; offsets and metadata are paired by position and
    /// truncated to the shorter of the two.
    pub fn new(
        mut nonce_offsets: Vec<u64>,
        mut nonce_meta: Vec<u32>,
        block: Arc<Block>,
        producer: u32,
        source: WorkSource,
    ) -> Self {
        debug_assert_eq!(nonce_offsets.len(), nonce_meta.len());
        let len = nonce_offsets.len().min(nonce_meta.len());
        nonce_offsets.truncate(len);
        nonce_meta.truncate(len);
        Self {
            nonce_offsets,
            nonce_meta,
            block,
            producer,
            source,
        }
    }

    pub fn len(&self) -> usize {
        self.nonce_offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonce_offsets.is_empty()
    }

    pub fn nonce_offsets(&self) -> &[u64] {
        &self.nonce_offsets
    }

    pub fn nonce_meta(&self) -> &[u32] {
        &self.nonce_meta
    }

    /// `(nonce_offset, combo)` pairs in production order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.nonce_offsets
            .iter()
            .copied()
            .zip(self.nonce_meta.iter().copied())
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    pub fn producer(&self) -> u32 {
        self.producer
    }

    pub fn source(&self) -> WorkSource {
        self.source
    }
}

/// Global FIFO shared by every producer and consumer.
///
/// The lock is held only for the append or pop itself.
#[derive(Debug, Default)]
pub struct WorkQueue {
    units: Mutex<VecDeque<WorkUnit>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Empty units are dropped.
    pub fn push(&self, unit: WorkUnit) -> bool {
        if unit.is_empty() {
            return false;
        }
        self.units.lock().push_back(unit);
        true
    }

    /// Pop the oldest unit.
    pub fn pop(&self) -> Option<WorkUnit> {
        self.units.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }

    /// Drop every queued unit, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut units = self.units.lock();
        let n = units.len();
        units.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;
    use rand::{Rng, SeedableRng};
    use std::thread;

    fn block() -> Arc<Block> {
        Arc::new(Block::new(BigUint::from(1u32), 1, 0))
    }

    fn unit(producer: u32, tag: u64) -> WorkUnit {
        WorkUnit::new(vec![tag], vec![0], block(), producer, WorkSource::Cpu)
    }

    #[test]
    fn single_consumer_sees_insertion_order() {
        let queue = WorkQueue::new();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let mut expected = Vec::new();
        for i in 0..64u64 {
            let producer = rng.gen_range(0..4);
            queue.push(unit(producer, i));
            expected.push(i);
        }
        let observed: Vec<u64> = std::iter::from_fn(|| queue.pop())
            .map(|u| u.nonce_offsets()[0])
            .collect();
        assert_eq!(observed, expected);
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_units_are_not_enqueued() {
        let queue = WorkQueue::new();
        let empty = WorkUnit::new(vec![], vec![], block(), 0, WorkSource::Cpu);
        assert!(!queue.push(empty));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn concurrent_producers_keep_their_own_order() {
        let queue = Arc::new(WorkQueue::new());
        let handles: Vec<_> = (0..4u32)
            .map(|producer| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250u64 {
                        queue.push(unit(producer, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut last = [None::<u64>; 4];
        let mut total = 0;
        while let Some(u) = queue.pop() {
            let p = u.producer() as usize;
            let tag = u.nonce_offsets()[0];
            if let Some(prev) = last[p] {
                assert!(tag > prev, "producer {p} reordered");
            }
            last[p] = Some(tag);
            total += 1;
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn clear_discards_everything() {
        let queue = WorkQueue::new();
        queue.push(unit(0, 1));
        queue.push(unit(0, 2));
        assert_eq!(queue.clear(), 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn entries_pair_offsets_with_meta() {
        let u = WorkUnit::new(vec![5, 9], vec![0, 0b100], block(), 3, WorkSource::Device);
        let entries: Vec<_> = u.entries().collect();
        assert_eq!(entries, vec![(5, 0), (9, 0b100)]);
        assert_eq!(u.source(), WorkSource::Device);
        assert_eq!(u.producer(), 3);
    }
}
