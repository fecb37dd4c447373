use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::{CacheError, Result};
use crate::hash::{hash, shard_index};
use crate::shard::layout::SHARD_COUNT;
use crate::shard::{ReadOutcome, Shard, ShardStatistics, WriteError, WriteOutcome};

/// Aggregate counters. Updated with relaxed atomics outside the shard
/// locks, so a snapshot may be slightly stale under concurrent I/O.
#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    used_memory: AtomicU64,
}

/// Snapshot returned by [`MemoryManager::statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Bytes of chunk memory currently allocated.
    pub used_memory: u64,
    /// Read batches served.
    pub total_reads: u64,
    /// Write batches served.
    pub total_writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub eviction_count: u64,
}

/// Sharded, capacity-bounded unit store.
///
/// Every unit address is hashed and routed to one of `SHARD_COUNT` shards,
/// each behind its own lock. No call ever holds two shard locks, so
/// batches touching different shards run in parallel. Batches are not
/// atomic: a write batch that runs out of memory keeps the units it
/// already stored.
pub struct MemoryManager {
    shards: Box<[Mutex<Shard>]>,
    config: ManagerConfig,
    per_shard_capacity: usize,
    counters: Counters,
}

impl MemoryManager {
    /// Create a manager with a `max_size` byte budget and default chunks.
    pub fn initialize(max_size: u64) -> Result<Self> {
        Self::with_config(ManagerConfig::new(max_size))
    }

    pub fn with_config(config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let per_shard = config.max_size / (SHARD_COUNT as u64 * config.chunk_size as u64);
        let per_shard_capacity = usize::try_from(per_shard.max(1)).unwrap_or(usize::MAX);

        // Shards built so far are dropped if a later one fails.
        let shards = (0..SHARD_COUNT)
            .map(|_| Shard::new(per_shard_capacity, config.chunk_size).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();

        debug!(
            max_size = config.max_size,
            chunk_size = config.chunk_size,
            per_shard_capacity,
            "memory manager initialized"
        );

        Ok(MemoryManager {
            shards,
            config,
            per_shard_capacity,
            counters: Counters::default(),
        })
    }

    pub fn max_size(&self) -> u64 {
        self.config.max_size
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Chunk capacity of every shard.
    pub fn per_shard_capacity(&self) -> usize {
        self.per_shard_capacity
    }

    #[inline]
    fn shard_for(&self, address: u64) -> (u64, &Mutex<Shard>) {
        let key = hash(address);
        (key, &self.shards[shard_index(key)])
    }

    /// Read `count` consecutive units starting at `start` into `out`.
    ///
    /// Units never written read back as zeros. `out` must hold exactly
    /// `count * unit_size` bytes.
    pub fn read_units(
        &self,
        start: u64,
        count: u32,
        out: &mut [u8],
        unit_size: u32,
    ) -> Result<()> {
        check_batch(start, count, out.len(), unit_size)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);

        let mut hits = 0u64;
        for (i, unit) in out.chunks_exact_mut(unit_size as usize).enumerate() {
            let (key, shard) = self.shard_for(start + i as u64);
            match shard.lock().read_unit(key, unit) {
                ReadOutcome::Hit => hits += 1,
                ReadOutcome::Miss => {}
            }
        }

        self.counters.hits.fetch_add(hits, Ordering::Relaxed);
        self.counters
            .misses
            .fetch_add(count as u64 - hits, Ordering::Relaxed);
        self.counters
            .bytes_read
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Write `count` consecutive units starting at `start` from `data`.
    ///
    /// Stops at the first unit whose shard cannot make room; units before
    /// it stay written and the error reports how many were committed.
    pub fn write_units(
        &self,
        start: u64,
        count: u32,
        data: &[u8],
        unit_size: u32,
    ) -> Result<()> {
        check_batch(start, count, data.len(), unit_size)?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        let mut committed = 0u32;
        let result = data
            .chunks_exact(unit_size as usize)
            .enumerate()
            .try_for_each(|(i, unit)| {
                let address = start + i as u64;
                let (key, shard) = self.shard_for(address);
                let outcome = shard.lock().write_unit(key, unit);
                match outcome {
                    Ok(outcome) => {
                        self.record_write(outcome);
                        committed += 1;
                        Ok(())
                    }
                    Err(err) => {
                        warn!(address, committed, ?err, "write batch stopped");
                        Err(match err {
                            WriteError::Alloc(e) => e,
                            WriteError::NoVictim | WriteError::IndexFull => {
                                CacheError::ResourceExhausted { address, committed }
                            }
                        })
                    }
                }
            });

        self.counters
            .bytes_written
            .fetch_add(committed as u64 * unit_size as u64, Ordering::Relaxed);
        result
    }

    #[inline]
    fn record_write(&self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Allocated => {
                self.counters
                    .used_memory
                    .fetch_add(self.config.chunk_size as u64, Ordering::Relaxed);
            }
            WriteOutcome::Evicted => {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
            WriteOutcome::Updated | WriteOutcome::Reused => {}
        }
    }

    /// Return every unit to the all-zero state and reset statistics.
    ///
    /// Shards are cleared one at a time under their own lock. Allocated
    /// chunks are kept for reuse, so `used_memory` is unchanged.
    pub fn format(&self) {
        for shard in self.shards.iter() {
            shard.lock().format();
        }

        let c = &self.counters;
        for counter in [
            &c.reads,
            &c.writes,
            &c.hits,
            &c.misses,
            &c.evictions,
            &c.bytes_read,
            &c.bytes_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        info!(max_size = self.config.max_size, "memory manager formatted");
    }

    /// Aggregate statistics. Takes no locks.
    pub fn statistics(&self) -> Statistics {
        let c = &self.counters;
        Statistics {
            used_memory: c.used_memory.load(Ordering::Relaxed),
            total_reads: c.reads.load(Ordering::Relaxed),
            total_writes: c.writes.load(Ordering::Relaxed),
            bytes_read: c.bytes_read.load(Ordering::Relaxed),
            bytes_written: c.bytes_written.load(Ordering::Relaxed),
            cache_hits: c.hits.load(Ordering::Relaxed),
            cache_misses: c.misses.load(Ordering::Relaxed),
            eviction_count: c.evictions.load(Ordering::Relaxed),
        }
    }

    /// Counters of one shard, read under its lock.
    pub fn shard_statistics(&self, index: usize) -> Option<ShardStatistics> {
        self.shards.get(index).map(|s| s.lock().statistics())
    }

    /// Release every chunk and index table.
    ///
    /// Consuming `self` means no other call can still be running.
    pub fn teardown(self) {
        let stats = self.statistics();
        info!(
            used_memory = stats.used_memory,
            evictions = stats.eviction_count,
            "memory manager torn down"
        );
        drop(self);
    }
}

fn check_batch(start: u64, count: u32, buf_len: usize, unit_size: u32) -> Result<()> {
    if count == 0 || unit_size == 0 || buf_len == 0 {
        return Err(CacheError::invalid("empty batch"));
    }
    let expected = count as u64 * unit_size as u64;
    if buf_len as u64 != expected {
        return Err(CacheError::invalid(format!(
            "buffer holds {buf_len} bytes, batch needs {expected}"
        )));
    }
    if start.checked_add(count as u64 - 1).is_none() {
        return Err(CacheError::invalid("unit address overflows"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::layout::CHUNK_SIZE;
    use std::thread;
    use std::time::{Duration, Instant};

    const UNIT: u32 = 512;
    const MIB: u64 = 1 << 20;

    fn shard_of(address: u64) -> usize {
        shard_index(hash(address))
    }

    /// First address after `after` that lands in `shard`.
    fn next_in_shard(shard: usize, after: u64) -> u64 {
        (after + 1..).find(|&a| shard_of(a) == shard).unwrap()
    }

    fn read_one(mm: &MemoryManager, address: u64) -> Vec<u8> {
        let mut out = vec![0xAA; UNIT as usize];
        mm.read_units(address, 1, &mut out, UNIT).unwrap();
        out
    }

    #[test]
    fn rejects_zero_size() {
        assert!(matches!(
            MemoryManager::initialize(0),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn per_shard_capacity_floor() {
        let mm = MemoryManager::initialize(MIB).unwrap();
        assert_eq!(mm.per_shard_capacity(), 1);

        let mm = MemoryManager::initialize(3 * SHARD_COUNT as u64 * CHUNK_SIZE as u64).unwrap();
        assert_eq!(mm.per_shard_capacity(), 3);

        let small = ManagerConfig::new(MIB).with_chunk_size(512);
        assert_eq!(MemoryManager::with_config(small).unwrap().per_shard_capacity(), 4);
    }

    #[test]
    fn unwritten_reads_zero() {
        let mm = MemoryManager::initialize(MIB).unwrap();
        let mut out = vec![0xFF; 4 * UNIT as usize];
        mm.read_units(1000, 4, &mut out, UNIT).unwrap();
        assert!(out.iter().all(|&b| b == 0));

        let stats = mm.statistics();
        assert_eq!(stats.total_reads, 1);
        assert_eq!(stats.cache_misses, 4);
        assert_eq!(stats.cache_hits, 0);
    }

    #[test]
    fn write_then_read_batch() {
        let mm = MemoryManager::initialize(64 * MIB).unwrap();
        let data: Vec<u8> = (0..8 * UNIT).map(|i| (i / UNIT) as u8 + 1).collect();
        mm.write_units(100, 8, &data, UNIT).unwrap();

        let mut out = vec![0; data.len()];
        mm.read_units(100, 8, &mut out, UNIT).unwrap();
        assert_eq!(out, data);

        let stats = mm.statistics();
        assert_eq!(stats.total_writes, 1);
        assert_eq!(stats.total_reads, 1);
        assert_eq!(stats.cache_hits, 8);
        assert_eq!(stats.cache_misses, 0);
        assert_eq!(stats.bytes_written, data.len() as u64);
        assert_eq!(stats.bytes_read, data.len() as u64);
        assert_eq!(stats.used_memory, 8 * CHUNK_SIZE as u64);
    }

    #[test]
    fn hits_plus_misses_equals_count() {
        let mm = MemoryManager::initialize(64 * MIB).unwrap();
        mm.write_units(10, 3, &vec![1; 3 * UNIT as usize], UNIT).unwrap();

        let mut out = vec![0; 10 * UNIT as usize];
        mm.read_units(5, 10, &mut out, UNIT).unwrap();
        let stats = mm.statistics();
        assert_eq!(stats.cache_hits, 3);
        assert_eq!(stats.cache_misses, 7);
        assert_eq!(stats.total_reads, 1);
    }

    #[test]
    fn same_shard_write_evicts() {
        let mm = MemoryManager::initialize(MIB).unwrap();
        let a = 0;
        let b = next_in_shard(shard_of(a), a);

        mm.write_units(a, 1, &vec![1; UNIT as usize], UNIT).unwrap();
        assert_eq!(mm.statistics().eviction_count, 0);
        mm.write_units(b, 1, &vec![2; UNIT as usize], UNIT).unwrap();

        assert_eq!(mm.statistics().eviction_count, 1);
        let shard = mm.shard_statistics(shard_of(a)).unwrap();
        assert_eq!(shard.evictions, 1);
        assert_eq!(shard.chunk_count, 1);

        assert_eq!(read_one(&mm, a), vec![0; UNIT as usize]);
        assert_eq!(read_one(&mm, b), vec![2; UNIT as usize]);
    }

    #[test]
    fn locked_shard_does_not_block_others() {
        let mm = MemoryManager::initialize(MIB).unwrap();
        let held = shard_of(0);
        let other = (1..).find(|&a| shard_of(a) != held).unwrap();

        let guard = mm.shards[held].lock();
        let finished = thread::scope(|s| {
            let writer = s.spawn(|| mm.write_units(other, 1, &vec![3; UNIT as usize], UNIT));
            let deadline = Instant::now() + Duration::from_secs(10);
            while !writer.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            let finished = writer.is_finished();
            // Release before joining so a blocked writer cannot hang the test
            drop(guard);
            writer.join().unwrap().unwrap();
            finished
        });

        assert!(finished, "write to shard {} waited on shard {held}", shard_of(other));
        assert_eq!(read_one(&mm, other), vec![3; UNIT as usize]);
    }

    #[test]
    fn exhausted_batch_keeps_prefix() {
        let mm = MemoryManager::initialize(MIB).unwrap();

        // Pin the only chunk of one shard, then write a batch whose second
        // unit lands in that shard.
        let pinned = 7;
        let full = shard_of(pinned);
        mm.write_units(pinned, 1, &vec![9; UNIT as usize], UNIT).unwrap();
        assert!(mm.shards[full].lock().pin(hash(pinned)));

        let start = (0..)
            .find(|&x: &u64| {
                shard_of(x + 1) == full
                    && shard_of(x) != full
                    && shard_of(x + 2) != full
                    && x + 1 != pinned
            })
            .unwrap();

        let data: Vec<u8> = (1..=3u8).flat_map(|b| vec![b; UNIT as usize]).collect();
        let err = mm.write_units(start, 3, &data, UNIT).unwrap_err();
        assert!(err.is_resource_exhausted());
        assert!(matches!(
            err,
            CacheError::ResourceExhausted { address, committed: 1 } if address == start + 1
        ));

        let stats = mm.statistics();
        assert_eq!(stats.total_writes, 2);
        assert_eq!(stats.bytes_written, 2 * UNIT as u64);
        assert_eq!(stats.eviction_count, 0);

        assert_eq!(read_one(&mm, start), vec![1; UNIT as usize]);
        assert_eq!(read_one(&mm, start + 1), vec![0; UNIT as usize]);
        assert_eq!(read_one(&mm, start + 2), vec![0; UNIT as usize]);
        assert_eq!(read_one(&mm, pinned), vec![9; UNIT as usize]);
    }

    #[test]
    fn format_resets_everything() {
        let mm = MemoryManager::initialize(MIB).unwrap();
        let a = 3;
        let b = next_in_shard(shard_of(a), a);
        mm.write_units(a, 1, &vec![1; UNIT as usize], UNIT).unwrap();
        mm.write_units(b, 1, &vec![2; UNIT as usize], UNIT).unwrap();
        read_one(&mm, b);
        read_one(&mm, 1 << 30);
        let used = mm.statistics().used_memory;

        mm.format();

        let stats = mm.statistics();
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.cache_misses, 0);
        assert_eq!(stats.eviction_count, 0);
        assert_eq!(stats.total_reads, 0);
        assert_eq!(stats.total_writes, 0);
        assert_eq!(stats.used_memory, used);
        assert_eq!(mm.shard_statistics(shard_of(a)).unwrap().generation, 0);

        assert_eq!(read_one(&mm, a), vec![0; UNIT as usize]);
        assert_eq!(read_one(&mm, b), vec![0; UNIT as usize]);

        // The formatted chunk is reused without counting an eviction
        mm.write_units(a, 1, &vec![5; UNIT as usize], UNIT).unwrap();
        assert_eq!(mm.statistics().eviction_count, 0);
        assert_eq!(mm.statistics().used_memory, used);
        assert_eq!(read_one(&mm, a), vec![5; UNIT as usize]);
    }

    #[test]
    fn invalid_batches() {
        let mm = MemoryManager::initialize(MIB).unwrap();
        let mut buf = vec![0; UNIT as usize];

        let bad = [
            mm.read_units(0, 0, &mut buf, UNIT),
            mm.read_units(0, 1, &mut buf, 0),
            mm.read_units(0, 1, &mut [], UNIT),
            mm.read_units(0, 2, &mut buf, UNIT),
            mm.read_units(u64::MAX, 2, &mut vec![0; 2 * UNIT as usize], UNIT),
            mm.write_units(0, 1, &buf[..100], UNIT),
        ];
        for result in bad {
            assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
        }

        // Rejected calls do not count as batches
        let stats = mm.statistics();
        assert_eq!(stats.total_reads, 0);
        assert_eq!(stats.total_writes, 0);
    }

    #[test]
    fn oversized_unit_reads_zero() {
        let config = ManagerConfig::new(MIB).with_chunk_size(256);
        let mm = MemoryManager::with_config(config).unwrap();
        mm.write_units(1, 1, &vec![7; UNIT as usize], UNIT).unwrap();
        assert_eq!(read_one(&mm, 1), vec![0; UNIT as usize]);
        assert_eq!(mm.statistics().cache_misses, 1);
    }

    #[test]
    fn teardown_consumes() {
        let mm = MemoryManager::initialize(MIB).unwrap();
        mm.write_units(0, 1, &vec![1; UNIT as usize], UNIT).unwrap();
        mm.teardown();
    }
}
