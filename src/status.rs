// Status aggregator
//
// Point-in-time view of every registered transfer and active crypt job.
// Readers only take the per-task descriptor lock briefly and never block a
// running worker.

use serde::Serialize;

use crate::downloader::{format_speed, TaskRegistry, TransferDescriptor, TransferKind, TransferState};
use crate::encryption::{CryptJob, CryptManager, CryptMode};

/// One transfer as reported by `/status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    pub source_id: String,
    pub destination_name: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub percentage: f64,
    /// Bytes per second since the worker last entered Running
    pub speed: f64,
    pub speed_text: String,
    pub state: TransferState,
    pub kind: TransferKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&TransferDescriptor> for TransferStatus {
    fn from(d: &TransferDescriptor) -> Self {
        let speed = d.speed();
        Self {
            source_id: d.source_id.clone(),
            destination_name: d.destination_name(),
            total_bytes: d.total_bytes,
            transferred_bytes: d.transferred_bytes,
            percentage: d.percentage(),
            speed,
            speed_text: format_speed(speed),
            state: d.state,
            kind: d.kind,
            last_error: d.last_error.clone(),
        }
    }
}

/// One encrypt/decrypt job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptStatus {
    pub file_name: String,
    pub total_bytes: u64,
    pub transformed_bytes: u64,
    pub percentage: f64,
    pub mode: CryptMode,
}

impl From<&CryptJob> for CryptStatus {
    fn from(job: &CryptJob) -> Self {
        Self {
            file_name: job.file_name.clone(),
            total_bytes: job.total_bytes,
            transformed_bytes: job.transformed_bytes(),
            percentage: job.percentage(),
            mode: job.mode,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub downloads: Vec<TransferStatus>,
    pub crypting: Vec<CryptStatus>,
}

/// Snapshot all registered transfers (sorted by source id) and crypt jobs
pub fn collect(registry: &TaskRegistry, crypt: Option<&CryptManager>) -> StatusSnapshot {
    let mut downloads: Vec<TransferStatus> = registry
        .list_all()
        .iter()
        .map(|task| TransferStatus::from(&task.snapshot()))
        .collect();
    downloads.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    let crypting = crypt
        .map(|manager| {
            manager
                .jobs()
                .iter()
                .map(|job| CryptStatus::from(job.as_ref()))
                .collect()
        })
        .unwrap_or_default();

    StatusSnapshot {
        downloads,
        crypting,
    }
}
