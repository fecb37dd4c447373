//! Manager and volume configuration.
//!
//! Volume configs are usually loaded from TOML. Size fields take either a
//! plain byte count or a human string such as `"64M"`:
//!
//! ```toml
//! device_number = 0
//! disk_size = "256M"
//! sector_size = 512
//! chunk_size = "64K"
//! ```

use std::path::Path;

use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::error::{CacheError, Result};
use crate::shard::layout::CHUNK_SIZE;

/// Largest number of volumes a registry holds.
pub const MAX_DEVICES: u32 = 32;

/// Largest disk size a volume accepts (1 TiB).
pub const MAX_DISK_SIZE: u64 = 1 << 40;

pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Sizing for one `MemoryManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Memory budget in bytes, split evenly across shards.
    pub max_size: u64,
    /// Bytes per chunk.
    pub chunk_size: usize,
}

impl ManagerConfig {
    pub fn new(max_size: u64) -> Self {
        ManagerConfig {
            max_size,
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::invalid("max_size must be non-zero"));
        }
        if self.chunk_size == 0 {
            return Err(CacheError::invalid("chunk_size must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeConfig {
    pub device_number: u32,
    #[serde(deserialize_with = "de_size")]
    pub disk_size: u64,
    #[serde(default = "default_sector_size", deserialize_with = "de_size")]
    pub sector_size: u32,
    #[serde(default = "default_chunk_size", deserialize_with = "de_size")]
    pub chunk_size: usize,
}

fn default_sector_size() -> u32 {
    DEFAULT_SECTOR_SIZE
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

impl VolumeConfig {
    pub fn new(device_number: u32, disk_size: u64) -> Self {
        VolumeConfig {
            device_number,
            disk_size,
            sector_size: DEFAULT_SECTOR_SIZE,
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_sector_size(mut self, sector_size: u32) -> Self {
        self.sector_size = sector_size;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: VolumeConfig =
            toml::from_str(text).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_number >= MAX_DEVICES {
            return Err(CacheError::invalid(format!(
                "device number {} out of range 0..{MAX_DEVICES}",
                self.device_number
            )));
        }
        if self.disk_size == 0 || self.disk_size > MAX_DISK_SIZE {
            return Err(CacheError::invalid(format!(
                "disk size {} out of range 1..={MAX_DISK_SIZE}",
                self.disk_size
            )));
        }
        if !self.sector_size.is_power_of_two() {
            return Err(CacheError::invalid(format!(
                "sector size {} is not a power of two",
                self.sector_size
            )));
        }
        if self.chunk_size < self.sector_size as usize {
            return Err(CacheError::invalid(format!(
                "chunk size {} smaller than sector size {}",
                self.chunk_size, self.sector_size
            )));
        }
        Ok(())
    }

    /// Config for the manager backing this volume.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new(self.disk_size).with_chunk_size(self.chunk_size)
    }
}

/// Parse a byte size: a plain integer or one with a `K`, `M`, `G` or `T`
/// suffix (powers of 1024, case-insensitive, optional trailing `B`).
pub fn parse_size(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();
    let body = upper.strip_suffix('B').unwrap_or(upper.as_str());

    let (digits, shift) = match body.chars().last() {
        Some('K') => (&body[..body.len() - 1], 10),
        Some('M') => (&body[..body.len() - 1], 20),
        Some('G') => (&body[..body.len() - 1], 30),
        Some('T') => (&body[..body.len() - 1], 40),
        _ => (body, 0),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| CacheError::Config(format!("invalid size: {trimmed:?}")))?;
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| CacheError::Config(format!("size overflows: {trimmed:?}")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Text(String),
}

fn de_size<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let bytes = match SizeValue::deserialize(deserializer)? {
        SizeValue::Bytes(n) => n,
        SizeValue::Text(s) => parse_size(&s).map_err(de::Error::custom)?,
    };
    T::try_from(bytes).map_err(|_| de::Error::custom(format!("size {bytes} out of range")))
}
