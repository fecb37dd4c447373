//! Byte-addressed volume over a `MemoryManager`.
//!
//! Translates sector-aligned byte ranges into unit batches and keeps the
//! per-device request counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::VolumeConfig;
use crate::error::{CacheError, Result};
use crate::manager::{MemoryManager, Statistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub device_number: u32,
    pub disk_size: u64,
    pub sector_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolumeStatistics {
    pub device_number: u32,
    pub disk_size: u64,
    pub sector_size: u32,
    pub read_requests: u64,
    pub write_requests: u64,
    #[serde(flatten)]
    pub memory: Statistics,
}

pub struct Volume {
    config: VolumeConfig,
    manager: MemoryManager,
    read_requests: AtomicU64,
    write_requests: AtomicU64,
}

impl Volume {
    /// Validate `config` and size a manager from its disk size.
    pub fn create(config: VolumeConfig) -> Result<Self> {
        config.validate()?;
        let manager = MemoryManager::with_config(config.manager_config())?;
        Ok(Volume {
            config,
            manager,
            read_requests: AtomicU64::new(0),
            write_requests: AtomicU64::new(0),
        })
    }

    pub fn device_number(&self) -> u32 {
        self.config.device_number
    }

    pub fn disk_size(&self) -> u64 {
        self.config.disk_size
    }

    pub fn sector_size(&self) -> u32 {
        self.config.sector_size
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            device_number: self.config.device_number,
            disk_size: self.config.disk_size,
            sector_size: self.config.sector_size,
        }
    }

    pub fn manager(&self) -> &MemoryManager {
        &self.manager
    }

    /// Map a byte range to `(start_sector, sector_count)`.
    fn sectors(&self, offset: u64, len: usize) -> Result<(u64, u32)> {
        let sector = self.config.sector_size as u64;
        let len = len as u64;

        if len == 0 {
            return Err(CacheError::invalid("empty transfer"));
        }
        if offset % sector != 0 || len % sector != 0 {
            return Err(CacheError::invalid(format!(
                "transfer {offset}+{len} not aligned to {sector}-byte sectors"
            )));
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.config.disk_size => {}
            _ => {
                return Err(CacheError::invalid(format!(
                    "transfer {offset}+{len} past end of {}-byte disk",
                    self.config.disk_size
                )))
            }
        }

        let count = u32::try_from(len / sector)
            .map_err(|_| CacheError::invalid("transfer too large"))?;
        Ok((offset / sector, count))
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let (start, count) = self.sectors(offset, buf.len())?;
        self.read_requests.fetch_add(1, Ordering::Relaxed);
        self.manager
            .read_units(start, count, buf, self.config.sector_size)
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let (start, count) = self.sectors(offset, buf.len())?;
        self.write_requests.fetch_add(1, Ordering::Relaxed);
        self.manager
            .write_units(start, count, buf, self.config.sector_size)
    }

    /// Zero the whole volume. Request counters are kept.
    pub fn format(&self) {
        self.manager.format();
    }

    pub fn statistics(&self) -> VolumeStatistics {
        VolumeStatistics {
            device_number: self.config.device_number,
            disk_size: self.config.disk_size,
            sector_size: self.config.sector_size,
            read_requests: self.read_requests.load(Ordering::Relaxed),
            write_requests: self.write_requests.load(Ordering::Relaxed),
            memory: self.manager.statistics(),
        }
    }

    /// Release the backing memory. Requires sole ownership.
    pub fn teardown(self) {
        self.manager.teardown();
    }
}
