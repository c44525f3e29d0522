// Host statistics for `/stats`
//
// Memory, CPU and disk come from sysinfo, network throughput from two
// interface counter samples, storage usage from a walk of the storage root.
// A sampler that fails reports zeros instead of failing the request.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Disks, Networks, System};
use tracing::warn;

use crate::config::AppConfig;
use crate::downloader::{StateCounts, TaskRegistry};
use crate::filesystem::{FilesystemService, FolderSummary};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskStats {
    pub mount_point: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStats {
    /// Bytes/s received during the sample window
    pub download_speed: f64,
    /// Bytes/s sent during the sample window
    pub upload_speed: f64,
    /// Cumulative bytes sent and received on all interfaces
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub cpu_count: usize,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub network: NetworkStats,
    pub storage: FolderSummary,
    pub transfers: StateCounts,
    pub crypting: usize,
}

#[derive(Debug, Clone, Default)]
struct SystemSample {
    cpu_count: usize,
    memory: MemoryStats,
    disk: DiskStats,
}

pub struct StatsCollector {
    files: FilesystemService,
    sample: Duration,
}

impl StatsCollector {
    pub fn new(root: impl Into<PathBuf>, sample: Duration) -> Self {
        Self {
            files: FilesystemService::new(root),
            sample,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.storage.root.clone(),
            Duration::from_millis(config.stats.network_sample_ms),
        )
    }

    pub async fn collect(&self, registry: &TaskRegistry, crypt_jobs: usize) -> HostStats {
        let root = self.files.guard().root().to_path_buf();
        let files = self.files.clone();

        let system = tokio::task::spawn_blocking(move || sample_system(&root));
        let storage = tokio::task::spawn_blocking(move || files.folder_summary());
        let (system, storage, network) = tokio::join!(system, storage, sample_network(self.sample));

        let system = system.unwrap_or_else(|e| {
            warn!("system sampling failed: {}", e);
            SystemSample::default()
        });
        let storage = storage.unwrap_or_else(|e| {
            warn!("storage walk failed: {}", e);
            FolderSummary::default()
        });

        HostStats {
            cpu_count: system.cpu_count,
            memory: system.memory,
            disk: system.disk,
            network,
            storage,
            transfers: registry.count_by_state(),
            crypting: crypt_jobs,
        }
    }
}

fn sample_system(root: &Path) -> SystemSample {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    SystemSample {
        cpu_count: sys.cpus().len(),
        memory: MemoryStats {
            total: sys.total_memory(),
            used: sys.used_memory(),
            available: sys.available_memory(),
        },
        disk: disk_for(root),
    }
}

/// Disk whose mount point is the longest prefix of `root`
fn disk_for(root: &Path) -> DiskStats {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| root.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| DiskStats {
            mount_point: disk.mount_point().to_string_lossy().to_string(),
            total: disk.total_space(),
            used: disk.total_space().saturating_sub(disk.available_space()),
            available: disk.available_space(),
        })
        .unwrap_or_default()
}

fn network_totals() -> (u64, u64) {
    let networks = Networks::new_with_refreshed_list();
    networks
        .list()
        .values()
        .fold((0, 0), |(rx, tx), data| {
            (rx + data.total_received(), tx + data.total_transmitted())
        })
}

async fn sample_network(window: Duration) -> NetworkStats {
    let (rx1, tx1) = network_totals();
    if window.is_zero() {
        return NetworkStats {
            total_bytes: rx1 + tx1,
            ..NetworkStats::default()
        };
    }

    tokio::time::sleep(window).await;
    let (rx2, tx2) = network_totals();
    let secs = window.as_secs_f64();

    NetworkStats {
        download_speed: rx2.saturating_sub(rx1) as f64 / secs,
        upload_speed: tx2.saturating_sub(tx1) as f64 / secs,
        total_bytes: rx2 + tx2,
    }
}
