//! Shard: one independently locked slice of the cache.
//!
//! Owns a capacity-bounded pool of chunks, the hash index over them and
//! its own hit/miss/eviction counters. `Shard` has no synchronization of
//! its own; the manager keeps each one behind a `parking_lot::Mutex` and
//! every method here runs with that lock held.
//!
//! Each chunk backs exactly one unit, stored at offset 0. A miss on write
//! takes a free chunk if one exists (left behind by `format`), grows the
//! pool while under capacity, and otherwise evicts the unreferenced chunk
//! with the oldest generation.
pub mod chunk;
pub mod eviction;
pub mod hashtable;
pub mod layout;

use serde::Serialize;
use tracing::trace;

use crate::error::{CacheError, Result};
use chunk::Chunk;
use hashtable::{HashIndex, IndexFull};

/// Result of a single-unit read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Hit,
    Miss,
}

/// How a single-unit write found its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The address was already cached.
    Updated,
    /// A new chunk was added to the pool.
    Allocated,
    /// A chunk freed by `format` was taken.
    Reused,
    /// The oldest unreferenced chunk was evicted.
    Evicted,
}

/// Why a single-unit write failed.
#[derive(Debug)]
pub enum WriteError {
    /// Pool full and every chunk referenced. Nothing was modified.
    NoVictim,
    /// Index probe found no slot.
    IndexFull,
    /// Growing the pool failed.
    Alloc(CacheError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShardStatistics {
    pub chunk_count: usize,
    pub capacity: usize,
    pub generation: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct Shard {
    chunks: Vec<Chunk>,
    capacity: usize,
    chunk_size: usize,
    index: HashIndex,
    /// Allocated chunks that back no unit, popped before growing the pool.
    free: Vec<usize>,
    generation: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Shard {
    /// Create an empty shard holding at most `capacity` chunks of
    /// `chunk_size` bytes. Chunks are mapped lazily; only the pool vector
    /// and the index are allocated here.
    pub fn new(capacity: usize, chunk_size: usize) -> Result<Self> {
        if capacity == 0 || chunk_size == 0 {
            return Err(CacheError::invalid("shard capacity and chunk size must be non-zero"));
        }

        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(capacity)
            .map_err(|_| CacheError::AllocationFailed {
                bytes: capacity.saturating_mul(std::mem::size_of::<Chunk>()),
            })?;
        let index = HashIndex::with_size(layout::table_size(capacity))?;

        Ok(Shard {
            chunks,
            capacity,
            chunk_size,
            index,
            free: Vec::new(),
            generation: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        })
    }

    #[inline]
    pub fn lookup(&self, key: u64) -> Option<(u64, u64)> {
        self.index.lookup(key)
    }

    #[inline]
    pub fn insert(
        &mut self,
        key: u64,
        chunk_index: u64,
        offset: u64,
    ) -> std::result::Result<(), IndexFull> {
        self.index.insert(key, chunk_index, offset)
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Resolve `key` to a live chunk slot and offset.
    #[inline]
    fn resolve(&self, key: u64) -> Option<(usize, usize)> {
        let (chunk_index, offset) = self.index.lookup(key)?;
        let chunk_index = chunk_index as usize;
        debug_assert!(chunk_index < self.chunks.len(), "index entry past pool end");
        if chunk_index < self.chunks.len() {
            Some((chunk_index, offset as usize))
        } else {
            None
        }
    }

    /// Copy the unit for `key` into `out`, zero-filling on a miss.
    ///
    /// A hit refreshes the chunk's generation. A recorded offset that would
    /// run past the chunk end is served as a miss.
    pub fn read_unit(&mut self, key: u64, out: &mut [u8]) -> ReadOutcome {
        let Some((idx, offset)) = self.resolve(key) else {
            out.fill(0);
            self.misses += 1;
            return ReadOutcome::Miss;
        };

        let generation = self.next_generation();
        let chunk = &mut self.chunks[idx];
        chunk.acquire();
        chunk.generation = generation;

        let outcome = match offset.checked_add(out.len()) {
            Some(end) if end <= chunk.size() => {
                out.copy_from_slice(&chunk.data()[offset..end]);
                ReadOutcome::Hit
            }
            _ => {
                out.fill(0);
                ReadOutcome::Miss
            }
        };
        chunk.release();

        match outcome {
            ReadOutcome::Hit => self.hits += 1,
            ReadOutcome::Miss => self.misses += 1,
        }
        outcome
    }

    /// Store `data` as the unit for `key`, allocating or evicting a chunk on
    /// a miss.
    pub fn write_unit(
        &mut self,
        key: u64,
        data: &[u8],
    ) -> std::result::Result<WriteOutcome, WriteError> {
        let (idx, offset, outcome) = match self.resolve(key) {
            Some((idx, offset)) => (idx, offset, WriteOutcome::Updated),
            None => {
                let (idx, outcome) = self.claim_chunk(key)?;
                (idx, 0, outcome)
            }
        };

        let generation = self.next_generation();
        let chunk = &mut self.chunks[idx];
        chunk.acquire();
        chunk.generation = generation;
        if let Some(end) = offset.checked_add(data.len()) {
            if end <= chunk.size() {
                chunk.data_mut()[offset..end].copy_from_slice(data);
            }
        }
        chunk.release();

        Ok(outcome)
    }

    /// Find a chunk for a key that missed and index it at offset 0.
    fn claim_chunk(
        &mut self,
        key: u64,
    ) -> std::result::Result<(usize, WriteOutcome), WriteError> {
        if let Some(idx) = self.free.pop() {
            if self.index.insert(key, idx as u64, 0).is_err() {
                self.free.push(idx);
                return Err(WriteError::IndexFull);
            }
            self.chunks[idx].owner = Some(key);
            return Ok((idx, WriteOutcome::Reused));
        }

        if self.chunks.len() < self.capacity {
            let mut chunk = Chunk::allocate(self.chunk_size).map_err(WriteError::Alloc)?;
            let idx = self.chunks.len();
            if self.index.insert(key, idx as u64, 0).is_err() {
                return Err(WriteError::IndexFull);
            }
            chunk.owner = Some(key);
            self.chunks.push(chunk);
            return Ok((idx, WriteOutcome::Allocated));
        }

        let victim = eviction::evict_candidate(&self.chunks).ok_or(WriteError::NoVictim)?;

        // Unmap the victim before indexing the new key.
        if let Some(old_key) = self.chunks[victim].owner.take() {
            self.index.remove(old_key);
        }
        if self.index.insert(key, victim as u64, 0).is_err() {
            // Unreachable with at most one entry per chunk.
            self.recycle(victim);
            return Err(WriteError::IndexFull);
        }

        let chunk = &mut self.chunks[victim];
        chunk.wipe();
        chunk.owner = Some(key);
        self.evictions += 1;
        trace!(victim, old_generation = chunk.generation, "evicted chunk");

        Ok((victim, WriteOutcome::Evicted))
    }

    /// Scrub an unindexed chunk and queue it for reuse.
    fn recycle(&mut self, idx: usize) {
        let chunk = &mut self.chunks[idx];
        chunk.wipe();
        chunk.generation = 0;
        chunk.owner = None;
        self.free.push(idx);
    }

    /// Clear all cached content and counters. Chunks stay allocated and go
    /// on the free list.
    pub fn format(&mut self) {
        for chunk in self.chunks.iter_mut() {
            chunk.wipe();
            chunk.generation = 0;
            chunk.refcount = 0;
            chunk.owner = None;
        }
        self.index.clear();
        self.free = (0..self.chunks.len()).rev().collect();
        self.generation = 0;
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    /// Take a reference on the chunk backing `key`, as an in-flight copy
    /// would. Returns false if the key is not cached.
    #[cfg(test)]
    pub(crate) fn pin(&mut self, key: u64) -> bool {
        match self.resolve(key) {
            Some((idx, _)) => {
                self.chunks[idx].acquire();
                true
            }
            None => false,
        }
    }

    pub fn statistics(&self) -> ShardStatistics {
        ShardStatistics {
            chunk_count: self.chunks.len(),
            capacity: self.capacity,
            generation: self.generation,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}
