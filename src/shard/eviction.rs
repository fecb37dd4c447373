//! Victim selection for a full shard.
//!
//! Approximate LRU: the chunk with the smallest generation stamp among
//! those nobody holds a reference to. Ties go to the lowest slot.

use super::chunk::Chunk;

/// Index of the eviction victim, or `None` if every chunk is referenced.
pub fn evict_candidate(chunks: &[Chunk]) -> Option<usize> {
    chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.refcount == 0)
        .min_by_key(|(_, c)| c.generation)
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(generations: &[u64]) -> Vec<Chunk> {
        generations
            .iter()
            .map(|&g| {
                let mut c = Chunk::allocate(64).unwrap();
                c.generation = g;
                c
            })
            .collect()
    }

    #[test]
    fn picks_oldest_generation() {
        let chunks = pool(&[5, 2, 9, 3]);
        assert_eq!(evict_candidate(&chunks), Some(1));
    }

    #[test]
    fn skips_referenced_chunks() {
        let mut chunks = pool(&[5, 2, 9, 3]);
        chunks[1].acquire();
        assert_eq!(evict_candidate(&chunks), Some(3));
    }

    #[test]
    fn none_when_all_referenced() {
        let mut chunks = pool(&[1, 2]);
        for c in chunks.iter_mut() {
            c.acquire();
        }
        assert_eq!(evict_candidate(&chunks), None);
    }

    #[test]
    fn ties_take_first_slot() {
        let chunks = pool(&[0, 0, 0]);
        assert_eq!(evict_candidate(&chunks), Some(0));
    }

    #[test]
    fn empty_pool() {
        assert_eq!(evict_candidate(&[]), None);
    }
}
