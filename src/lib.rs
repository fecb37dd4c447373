//! Sharded, capacity-bounded memory manager for a RAM-disk block store.
//!
//! A [`MemoryManager`] stores fixed-size units addressed by a 64-bit unit
//! number. Addresses are hashed onto [`SHARD_COUNT`] independently locked
//! shards; each shard owns a bounded pool of chunks and evicts the least
//! recently touched one when full. [`Volume`] and [`VolumeRegistry`] put a
//! byte-addressed, numbered-device front end on top.

pub mod config;
pub mod error;
pub mod hash;
pub mod manager;
pub mod registry;
pub mod shard;
pub mod volume;

pub use config::{parse_size, ManagerConfig, VolumeConfig, MAX_DEVICES, MAX_DISK_SIZE};
pub use error::{CacheError, Result};
pub use hash::{hash, shard_index};
pub use manager::{MemoryManager, Statistics};
pub use registry::{packed_version, version, VolumeRegistry};
pub use shard::layout::{CHUNK_SIZE, SHARD_COUNT};
pub use shard::ShardStatistics;
pub use volume::{Volume, VolumeInfo, VolumeStatistics};
