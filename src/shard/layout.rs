//! Fixed sizes and the index entry shared by every shard.

/// Number of independently locked shards per manager.
pub const SHARD_COUNT: usize = 512;

/// Default byte size of one chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Smallest hash-index table a shard will allocate.
pub const MIN_TABLE_SIZE: usize = 64;

/// Sentinel chunk index meaning "empty slot" in the hash index.
///
/// Occupancy is tracked on the chunk index rather than the key, so a key
/// that hashes to 0 is an ordinary key.
pub const EMPTY_SLOT: u64 = u64::MAX;

/// One slot of a shard's open-addressed hash index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashEntry {
    pub key: u64,
    pub chunk_index: u64,
    pub offset: u64,
}

impl HashEntry {
    pub const EMPTY: HashEntry = HashEntry {
        key: 0,
        chunk_index: EMPTY_SLOT,
        offset: 0,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunk_index == EMPTY_SLOT
    }
}

/// Table size for a shard holding `capacity` chunks: twice the capacity,
/// never below `MIN_TABLE_SIZE`.
pub fn table_size(capacity: usize) -> usize {
    capacity.saturating_mul(2).max(MIN_TABLE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_size_has_floor() {
        assert_eq!(table_size(1), MIN_TABLE_SIZE);
        assert_eq!(table_size(32), MIN_TABLE_SIZE);
        assert_eq!(table_size(33), 66);
        assert_eq!(table_size(1000), 2000);
    }

    #[test]
    fn empty_entry_uses_index_sentinel() {
        assert!(HashEntry::EMPTY.is_empty());
        let zero_key = HashEntry {
            key: 0,
            chunk_index: 0,
            offset: 0,
        };
        assert!(!zero_key.is_empty());
    }
}
