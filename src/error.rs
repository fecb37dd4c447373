use thiserror::Error;

/// Errors surfaced by the cache core and the volume layer above it.
///
/// Cache misses and bounds-guard misses are not errors; they resolve to
/// zero-filled reads.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A zero-sized buffer, zero count or unit size, zero capacity, or an
    /// I/O range the volume cannot serve.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The owning shard had no evictable chunk, or its index had no free
    /// slot. Units of the batch before `address` stay committed.
    #[error("no evictable chunk for unit {address} ({committed} units committed)")]
    ResourceExhausted { address: u64, committed: u32 },

    /// The allocator refused a chunk buffer or index table.
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailed { bytes: usize },

    #[error("device {0} already exists")]
    DeviceExists(u32),

    #[error("no such device: {0}")]
    NoSuchDevice(u32),

    #[error("config error: {0}")]
    Config(String),
}

impl CacheError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CacheError::InvalidArgument(msg.into())
    }

    /// True for both flavors of running out of memory.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            CacheError::ResourceExhausted { .. } | CacheError::AllocationFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
