use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ramdisk_cache::{
    hash, packed_version, parse_size, shard_index, version, CacheError, Result, Volume,
    VolumeConfig, VolumeRegistry, VolumeStatistics,
};

#[derive(Parser)]
#[command(name = "ramcache", about = "Sharded RAM-disk memory manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a write-then-verify workload against a fresh volume
    Run {
        /// Volume config file (TOML); overrides --size and --sector-size
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Disk size, e.g. 64M or 1G
        #[arg(short, long, default_value = "64M")]
        size: String,

        #[arg(long, default_value_t = 512)]
        sector_size: u32,

        /// Worker threads (1-255), each on its own sector range
        #[arg(
            short,
            long,
            default_value_t = 4,
            value_parser = clap::value_parser!(u8).range(1..)
        )]
        threads: u8,

        /// Write-then-verify operations per thread
        #[arg(short, long, default_value_t = 10_000)]
        ops: u64,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the hash and shard of unit addresses
    Hash {
        /// Decimal or 0x-prefixed hex addresses
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Print the crate version
    Version,
}

/// Longest transfer a worker issues, in sectors.
const MAX_SPAN: u64 = 8;

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct WorkerReport {
    operations: u64,
    verified: u64,
    /// Sectors that read back as zeros because another worker's write
    /// evicted them in between.
    evicted: u64,
    corrupt: u64,
}

impl WorkerReport {
    fn merge(mut self, other: WorkerReport) -> Self {
        self.operations += other.operations;
        self.verified += other.verified;
        self.evicted += other.evicted;
        self.corrupt += other.corrupt;
        self
    }
}

#[derive(Serialize)]
struct RunReport {
    threads: u8,
    elapsed_ms: u128,
    #[serde(flatten)]
    workload: WorkerReport,
    volume: VolumeStatistics,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Run {
            config,
            size,
            sector_size,
            threads,
            ops,
            json,
        } => volume_config(config, &size, sector_size)
            .and_then(|config| run(config, threads, ops, json)),
        Command::Hash { addresses } => print_hashes(&addresses),
        Command::Version => {
            let (major, minor, build) = version();
            println!("ramcache {major}.{minor}.{build} ({:#08x})", packed_version());
            Ok(true)
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn volume_config(path: Option<PathBuf>, size: &str, sector_size: u32) -> Result<VolumeConfig> {
    match path {
        Some(path) => VolumeConfig::from_file(path),
        None => Ok(VolumeConfig::new(0, parse_size(size)?).with_sector_size(sector_size)),
    }
}

fn print_hashes(addresses: &[String]) -> Result<bool> {
    for text in addresses {
        let address = parse_address(text)?;
        let h = hash(address);
        println!("{address:>20}  {h:#018x}  shard {}", shard_index(h));
    }
    Ok(true)
}

fn parse_address(text: &str) -> Result<u64> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| CacheError::Config(format!("invalid address: {text:?}")))
}

fn run(config: VolumeConfig, threads: u8, ops: u64, json: bool) -> Result<bool> {
    if threads == 0 {
        return Err(CacheError::Config("--threads must be at least 1".into()));
    }

    let registry = VolumeRegistry::new();
    let volume = registry.create(config)?;
    let sectors = volume.disk_size() / volume.sector_size() as u64;
    let per_thread = sectors / u64::from(threads);
    if per_thread == 0 {
        return Err(CacheError::Config(format!(
            "{sectors} sectors cannot be split across {threads} threads"
        )));
    }

    info!(threads, ops, sectors_per_thread = per_thread, "starting workload");
    let started = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let volume = Arc::clone(&volume);
            let first = u64::from(t) * per_thread;
            thread::spawn(move || worker(&volume, t, first, per_thread, ops))
        })
        .collect();

    let mut workload = WorkerReport::default();
    for handle in handles {
        match handle.join() {
            Ok(report) => workload = workload.merge(report?),
            Err(_) => return Err(CacheError::Config("worker thread panicked".into())),
        }
    }
    let elapsed = started.elapsed();

    let report = RunReport {
        threads,
        elapsed_ms: elapsed.as_millis(),
        workload,
        volume: volume.statistics(),
    };
    if json {
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| CacheError::Config(e.to_string()))?;
        println!("{text}");
    } else {
        print_table(&report, elapsed);
    }

    let device = volume.device_number();
    drop(volume);
    registry.remove(device)?;

    if workload.corrupt > 0 {
        warn!(corrupt = workload.corrupt, "data mismatch detected");
        return Ok(false);
    }
    Ok(true)
}

/// Fill of one sector for a given pass; never zero so evicted sectors
/// are distinguishable from corrupt ones.
fn pattern(worker: u8, sector: u64, pass: u64) -> u8 {
    let mixed = (sector ^ pass.rotate_left(7)).wrapping_mul(0x9E37_79B9) >> 24;
    (mixed as u8 ^ worker) | 1
}

fn worker(volume: &Volume, id: u8, first: u64, len: u64, ops: u64) -> Result<WorkerReport> {
    let sector = volume.sector_size() as usize;
    let mut report = WorkerReport::default();
    let mut cursor = 0u64;

    for pass in 0..ops {
        let span = (1 + pass % MAX_SPAN).min(len - cursor);
        let start = first + cursor;

        let data: Vec<u8> = (0..span)
            .flat_map(|s| std::iter::repeat(pattern(id, start + s, pass)).take(sector))
            .collect();
        volume.write_at(start * sector as u64, &data)?;

        let mut out = vec![0u8; data.len()];
        volume.read_at(start * sector as u64, &mut out)?;
        for (got, want) in out.chunks_exact(sector).zip(data.chunks_exact(sector)) {
            if got == want {
                report.verified += 1;
            } else if got.iter().all(|&b| b == 0) {
                report.evicted += 1;
            } else {
                report.corrupt += 1;
            }
        }

        report.operations += 1;
        cursor = (cursor + span) % len;
    }
    Ok(report)
}

fn print_table(report: &RunReport, elapsed: Duration) {
    let v = &report.volume;
    let m = &v.memory;
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);

    println!("device            {}", v.device_number);
    println!("disk size         {} bytes", v.disk_size);
    println!("sector size       {} bytes", v.sector_size);
    println!("threads           {}", report.threads);
    println!(
        "operations        {} ({:.0}/s)",
        report.workload.operations,
        report.workload.operations as f64 / secs
    );
    println!("verified sectors  {}", report.workload.verified);
    println!("evicted sectors   {}", report.workload.evicted);
    println!("corrupt sectors   {}", report.workload.corrupt);
    println!("read requests     {}", v.read_requests);
    println!("write requests    {}", v.write_requests);
    println!("bytes read        {}", m.bytes_read);
    println!("bytes written     {}", m.bytes_written);
    println!("cache hits        {}", m.cache_hits);
    println!("cache misses      {}", m.cache_misses);
    println!("evictions         {}", m.eviction_count);
    println!("used memory       {} bytes", m.used_memory);
    println!("elapsed           {:.3}s", secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1 << 20;

    #[test]
    fn run_releases_configured_device() {
        let config = VolumeConfig::new(7, MIB).with_chunk_size(512);
        assert!(run(config, 1, 4, true).unwrap());
    }

    #[test]
    fn run_splits_sectors_across_threads() {
        let config = VolumeConfig::new(0, 4 * MIB).with_chunk_size(512);
        assert!(run(config, 3, 16, false).unwrap());
    }

    #[test]
    fn run_rejects_unusable_thread_counts() {
        assert!(run(VolumeConfig::new(0, MIB), 0, 1, true).is_err());
        // Two 4 KiB sectors cannot feed three workers
        let tiny = VolumeConfig::new(0, 8192).with_sector_size(4096);
        assert!(run(tiny, 3, 1, true).is_err());
    }

    #[test]
    fn thread_count_bounded_by_parser() {
        assert!(Cli::try_parse_from(["ramcache", "run", "--threads", "256"]).is_err());
        assert!(Cli::try_parse_from(["ramcache", "run", "--threads", "0"]).is_err());
        assert!(Cli::try_parse_from(["ramcache", "run", "--threads", "255"]).is_ok());
    }

    #[test]
    fn volume_config_from_file_keeps_device_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.toml");
        std::fs::write(&path, "device_number = 9\ndisk_size = \"1M\"\n").unwrap();

        let config = volume_config(Some(path), "64M", 512).unwrap();
        assert_eq!(config.device_number, 9);
        assert_eq!(config.disk_size, MIB);
    }

    #[test]
    fn addresses_parse_decimal_and_hex() {
        assert_eq!(parse_address("42").unwrap(), 42);
        assert_eq!(parse_address("0xdeadbeef").unwrap(), 0xdead_beef);
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn pattern_never_zero() {
        for sector in 0..1024 {
            assert_ne!(pattern(255, sector, sector * 3), 0);
        }
    }
}
