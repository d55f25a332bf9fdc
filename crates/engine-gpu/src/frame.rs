//! Double-buffered frame resources of a device pipeline.
//!
//! A pipeline fills one frame while the host drains the other into the shared
//! work queue. `FrameResourceSet::split` hands out both halves at once, so the
//! borrow checker enforces that the same index is never filled and drained
//! concurrently.

use std::sync::Arc;

use prime_core::{Block, WorkSource, WorkUnit};

use crate::error::DeviceError;

/// Buffer sizes shared by both frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    /// Candidates per window.
    pub sieve_bits: u64,
    /// Sieving primes whose remainders a frame carries.
    pub sieve_primes: usize,
    /// Slots in the offset pattern.
    pub pattern_len: usize,
    /// Capacity of each candidate list.
    pub max_candidates: usize,
    /// Bucket entries, one per sieving prime and sieved slot.
    pub bucket_len: usize,
}

impl FrameLayout {
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.sieve_bits < 32 || !self.sieve_bits.is_power_of_two() {
            return Err(DeviceError::Layout(format!(
                "sieve of {} bits is not a power of two of at least 32",
                self.sieve_bits
            )));
        }
        if self.pattern_len == 0 || self.pattern_len > 32 {
            return Err(DeviceError::Layout(format!(
                "pattern of {} slots",
                self.pattern_len
            )));
        }
        if self.max_candidates == 0 {
            return Err(DeviceError::Layout("no candidate capacity".into()));
        }
        if self.sieve_primes > u16::MAX as usize + 1 {
            return Err(DeviceError::Layout(format!(
                "{} sieving primes do not fit 16-bit bucket indices",
                self.sieve_primes
            )));
        }
        Ok(())
    }

    fn sieve_words(&self) -> usize {
        (self.sieve_bits / 32) as usize
    }
}

fn alloc<T: Clone + Default>(what: &'static str, len: usize) -> Result<Vec<T>, DeviceError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| DeviceError::Allocation { what, len })?;
    v.resize(len, T::default());
    Ok(v)
}

/// One frame of device buffers.
///
/// Candidate lists are fixed-capacity; the matching `*_count` says how many
/// leading entries are valid.
#[derive(Clone, Debug)]
pub struct FrameBuffers {
    /// Window start modulo each sieving prime.
    pub window_data: Vec<u32>,
    /// Packed sieve, bit set = eliminated.
    pub bit_array_sieve: Vec<u32>,
    /// First struck index of each bucket entry.
    pub bucket_o: Vec<u32>,
    /// Index of the sieving prime each bucket entry strikes with.
    pub bucket_away: Vec<u16>,

    pub pre_nonce_offsets: Vec<u64>,
    pub pre_nonce_meta: Vec<u32>,
    pub pre_nonce_count: usize,

    pub nonce_offsets: Vec<u64>,
    pub nonce_meta: Vec<u32>,
    pub nonce_count: usize,

    pub result_offsets: Vec<u64>,
    pub result_meta: Vec<u32>,
    pub result_count: usize,

    /// Per-slot device pre-test totals since the last drain.
    pub primes_checked: Vec<u64>,
    pub primes_found: Vec<u64>,

    /// Block the current contents were produced for.
    pub block: Option<Arc<Block>>,
}

impl FrameBuffers {
    pub fn new(layout: &FrameLayout) -> Result<Self, DeviceError> {
        let cap = layout.max_candidates;
        Ok(Self {
            window_data: alloc("window data", layout.sieve_primes)?,
            bit_array_sieve: alloc("bit array sieve", layout.sieve_words())?,
            bucket_o: alloc("bucket offsets", layout.bucket_len)?,
            bucket_away: alloc("bucket slots", layout.bucket_len)?,
            pre_nonce_offsets: alloc("pre-nonce offsets", cap)?,
            pre_nonce_meta: alloc("pre-nonce meta", cap)?,
            pre_nonce_count: 0,
            nonce_offsets: alloc("nonce offsets", cap)?,
            nonce_meta: alloc("nonce meta", cap)?,
            nonce_count: 0,
            result_offsets: alloc("result offsets", cap)?,
            result_meta: alloc("result meta", cap)?,
            result_count: 0,
            primes_checked: alloc("primes checked", layout.pattern_len)?,
            primes_found: alloc("primes found", layout.pattern_len)?,
            block: None,
        })
    }

    /// Capacity of each candidate list.
    pub fn capacity(&self) -> usize {
        self.result_offsets.len()
    }

    /// Forget the previous contents. Buffers keep their allocation.
    pub fn reset(&mut self) {
        self.pre_nonce_count = 0;
        self.nonce_count = 0;
        self.result_count = 0;
        self.primes_checked.fill(0);
        self.primes_found.fill(0);
        self.block = None;
    }

    pub fn has_results(&self) -> bool {
        self.result_count > 0 && self.block.is_some()
    }

    /// Take the result list as a device work unit and reset the frame.
    pub fn drain(&mut self, producer: u32) -> Option<WorkUnit> {
        let unit = match &self.block {
            Some(block) if self.result_count > 0 => {
                let n = self.result_count.min(self.capacity());
                Some(WorkUnit::new(
                    self.result_offsets[..n].to_vec(),
                    self.result_meta[..n].to_vec(),
                    block.clone(),
                    producer,
                    WorkSource::Device,
                ))
            }
            _ => None,
        };
        self.reset();
        unit
    }
}

/// Two frames plus the index of the one being filled.
#[derive(Clone, Debug)]
pub struct FrameResourceSet {
    frames: [FrameBuffers; 2],
    active: usize,
}

impl FrameResourceSet {
    pub fn new(layout: &FrameLayout) -> Result<Self, DeviceError> {
        layout.validate()?;
        Ok(Self {
            frames: [FrameBuffers::new(layout)?, FrameBuffers::new(layout)?],
            active: 0,
        })
    }

    /// Index of the frame currently being filled.
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn frame(&self, index: usize) -> Option<&FrameBuffers> {
        self.frames.get(index)
    }

    /// `(filling, draining)`.
    pub fn split(&mut self) -> (&mut FrameBuffers, &mut FrameBuffers) {
        let (first, second) = self.frames.split_at_mut(1);
        if self.active == 0 {
            (&mut first[0], &mut second[0])
        } else {
            (&mut second[0], &mut first[0])
        }
    }

    /// The filled frame becomes the draining one.
    pub fn swap(&mut self) {
        self.active ^= 1;
    }

    pub fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.reset();
        }
    }
}
