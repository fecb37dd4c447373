//! Fixed-size chunk buffers backing cached units.
//!
//! Each chunk is its own anonymous mapping, so the operating system hands
//! it out zero-filled and pages it in on first touch.

use memmap2::MmapMut;
use tracing::debug;

use crate::error::{CacheError, Result};

pub struct Chunk {
    data: MmapMut,
    /// Shard generation at the last allocation, read or write.
    pub generation: u64,
    /// Holders currently copying in or out of `data`. Only zero-refcount
    /// chunks may be evicted.
    pub refcount: i32,
    /// Index key of the unit this chunk currently backs, `None` when free.
    pub owner: Option<u64>,
}

impl Chunk {
    /// Map a new zero-filled chunk of `size` bytes.
    pub fn allocate(size: usize) -> Result<Self> {
        let data = MmapMut::map_anon(size).map_err(|e| {
            debug!(size, error = %e, "chunk mapping failed");
            CacheError::AllocationFailed { bytes: size }
        })?;
        Ok(Chunk {
            data,
            generation: 0,
            refcount: 0,
            owner: None,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn acquire(&mut self) {
        self.refcount += 1;
    }

    #[inline]
    pub fn release(&mut self) {
        debug_assert!(self.refcount > 0, "release without acquire");
        self.refcount -= 1;
    }

    /// Zero the buffer. Generation and ownership are left to the caller.
    pub fn wipe(&mut self) {
        self.data.fill(0);
    }
}
