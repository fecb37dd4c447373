//! Open-addressing hash index mapping a hashed address to its chunk slot.
//!
//! Uses linear probing from `key mod size`. The table is sized at 2×
//! the shard's chunk capacity to keep the load factor under 50%.

use crate::error::{CacheError, Result};

use super::layout::{HashEntry, EMPTY_SLOT};

/// Returned by [`HashIndex::insert`] when a full probe cycle finds neither
/// the key nor an empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFull;

pub struct HashIndex {
    slots: Vec<HashEntry>,
}

impl HashIndex {
    /// Allocate a table of `size` empty slots.
    pub fn with_size(size: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(size)
            .map_err(|_| CacheError::AllocationFailed {
                bytes: size.saturating_mul(std::mem::size_of::<HashEntry>()),
            })?;
        slots.resize(size, HashEntry::EMPTY);
        Ok(HashIndex { slots })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn home(&self, key: u64) -> usize {
        (key % self.slots.len() as u64) as usize
    }

    #[inline]
    fn next(&self, idx: usize) -> usize {
        if idx + 1 == self.slots.len() {
            0
        } else {
            idx + 1
        }
    }

    /// Position of `key` in the table, if present.
    fn position(&self, key: u64) -> Option<usize> {
        let mut idx = self.home(key);

        for _ in 0..self.slots.len() {
            let entry = &self.slots[idx];
            if entry.is_empty() {
                return None;
            }
            if entry.key == key {
                return Some(idx);
            }
            idx = self.next(idx);
        }

        None // saturated; cannot happen at a 50% load factor
    }

    /// Look up `key`, returning `(chunk_index, offset)` on a hit.
    pub fn lookup(&self, key: u64) -> Option<(u64, u64)> {
        self.position(key).map(|idx| {
            let entry = &self.slots[idx];
            (entry.chunk_index, entry.offset)
        })
    }

    /// Map `key` to `(chunk_index, offset)`, overwriting an existing entry
    /// for the same key.
    pub fn insert(
        &mut self,
        key: u64,
        chunk_index: u64,
        offset: u64,
    ) -> std::result::Result<(), IndexFull> {
        debug_assert_ne!(chunk_index, EMPTY_SLOT);
        let mut idx = self.home(key);

        for _ in 0..self.slots.len() {
            let entry = &mut self.slots[idx];
            if entry.is_empty() || entry.key == key {
                *entry = HashEntry {
                    key,
                    chunk_index,
                    offset,
                };
                return Ok(());
            }
            idx = self.next(idx);
        }

        Err(IndexFull)
    }

    /// Remove the entry for `key`.
    ///
    /// Uses backward-shift deletion so later entries of the same probe run
    /// stay reachable without tombstones.
    pub fn remove(&mut self, key: u64) -> bool {
        let remove_idx = match self.position(key) {
            Some(i) => i,
            None => return false,
        };

        let mut empty = remove_idx;
        let mut j = self.next(empty);

        loop {
            let entry = self.slots[j];
            if entry.is_empty() || j == remove_idx {
                break;
            }

            // Move the entry back unless its home lies cyclically in (empty, j]
            let ideal = self.home(entry.key);
            let should_move = if empty <= j {
                ideal <= empty || ideal > j
            } else {
                ideal <= empty && ideal > j
            };

            if should_move {
                self.slots[empty] = entry;
                empty = j;
            }

            j = self.next(j);
        }

        self.slots[empty] = HashEntry::EMPTY;
        true
    }

    /// Reset every slot to empty.
    pub fn clear(&mut self) {
        self.slots.fill(HashEntry::EMPTY);
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|e| !e.is_empty()).count()
    }
}
