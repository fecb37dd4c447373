//! Numbered volume table.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::VolumeConfig;
use crate::error::{CacheError, Result};
use crate::volume::{Volume, VolumeInfo, VolumeStatistics};

/// `(major, minor, build)` of this crate.
pub fn version() -> (u32, u32, u32) {
    let part = |s: &str| s.parse().unwrap_or(0);
    (
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
    )
}

/// Version packed as `major << 16 | minor << 8 | build`.
pub fn packed_version() -> u32 {
    let (major, minor, build) = version();
    (major << 16) | (minor << 8) | build
}

/// Up to `MAX_DEVICES` volumes keyed by device number.
///
/// Volumes are handed out as `Arc`s. Removing one only drops the table's
/// reference; its memory is released once the last in-flight user lets go.
pub struct VolumeRegistry {
    volumes: RwLock<HashMap<u32, Arc<Volume>, RandomState>>,
}

impl Default for VolumeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeRegistry {
    pub fn new() -> Self {
        VolumeRegistry {
            volumes: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    pub fn create(&self, config: VolumeConfig) -> Result<Arc<Volume>> {
        let number = config.device_number;
        let mut volumes = self.volumes.write();
        if volumes.contains_key(&number) {
            return Err(CacheError::DeviceExists(number));
        }

        let volume = Arc::new(Volume::create(config)?);
        volumes.insert(number, Arc::clone(&volume));
        info!(
            device = number,
            disk_size = volume.disk_size(),
            sector_size = volume.sector_size(),
            "volume created"
        );
        Ok(volume)
    }

    pub fn remove(&self, number: u32) -> Result<()> {
        let volume = self
            .volumes
            .write()
            .remove(&number)
            .ok_or(CacheError::NoSuchDevice(number))?;

        info!(device = number, "volume removed");
        match Arc::try_unwrap(volume) {
            Ok(volume) => volume.teardown(),
            Err(_) => debug!(device = number, "volume still referenced, release deferred"),
        }
        Ok(())
    }

    pub fn get(&self, number: u32) -> Result<Arc<Volume>> {
        self.volumes
            .read()
            .get(&number)
            .cloned()
            .ok_or(CacheError::NoSuchDevice(number))
    }

    /// All volumes, ordered by device number.
    pub fn list(&self) -> Vec<VolumeInfo> {
        let mut infos: Vec<VolumeInfo> = self.volumes.read().values().map(|v| v.info()).collect();
        infos.sort_by_key(|i| i.device_number);
        infos
    }

    pub fn statistics(&self, number: u32) -> Result<VolumeStatistics> {
        self.get(number).map(|v| v.statistics())
    }

    pub fn len(&self) -> usize {
        self.volumes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
