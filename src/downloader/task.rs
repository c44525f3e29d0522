use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::engine::WorkerHandle;
use super::source::TransferSource;

/// Transfer state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    /// Registered, worker not yet streaming
    Idle,
    /// Worker is streaming bytes
    Running,
    /// Stopped on request, partial file kept
    Paused,
    /// Stopped on request, partial file removed
    Cancelled,
    /// Source stream fully written
    Completed,
    /// Stopped on error, partial file kept
    Failed,
}

impl TransferState {
    /// Whether the descriptor leaves the registry in this state
    pub fn is_final(self) -> bool {
        matches!(self, TransferState::Cancelled | TransferState::Completed)
    }

    /// Whether an explicit resume may start a new worker
    pub fn is_resumable(self) -> bool {
        matches!(self, TransferState::Paused | TransferState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Running => "running",
            TransferState::Paused => "paused",
            TransferState::Cancelled => "cancelled",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which adapter feeds the transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Plain HTTP(S) download with byte-range resume
    Direct,
    /// Payload piped from the external extraction tool (cancel-only)
    Extracted,
}

/// Record of one transfer's identity and progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDescriptor {
    /// Source URL, the registry key
    pub source_id: String,
    /// Local file being written
    pub destination_path: PathBuf,
    /// Announced size, 0 while unknown
    pub total_bytes: u64,
    /// Bytes present in the destination file
    pub transferred_bytes: u64,
    pub state: TransferState,
    /// Last time the worker entered Running
    pub started_at: Option<DateTime<Utc>>,
    /// Error detail, only set in Failed
    pub last_error: Option<String>,
    pub kind: TransferKind,
}

impl TransferDescriptor {
    pub fn new(source_id: impl Into<String>, destination_path: PathBuf, kind: TransferKind) -> Self {
        Self {
            source_id: source_id.into(),
            destination_path,
            total_bytes: 0,
            transferred_bytes: 0,
            state: TransferState::Idle,
            started_at: None,
            last_error: None,
            kind,
        }
    }

    /// Seed the size announced before the first response (extractor metadata)
    pub fn with_total_bytes(mut self, total_bytes: u64) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    /// File name of the destination
    pub fn destination_name(&self) -> String {
        self.destination_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Progress percentage in [0, 100], 0 while the size is unknown
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Average speed (bytes/s) since the worker last entered Running
    pub fn speed(&self) -> f64 {
        self.speed_at(Utc::now())
    }

    pub fn speed_at(&self, now: DateTime<Utc>) -> f64 {
        let Some(started_at) = self.started_at else {
            return 0.0;
        };
        let elapsed = (now - started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.transferred_bytes as f64 / elapsed
    }

    pub(crate) fn mark_running(&mut self, offset: u64, total_bytes: Option<u64>) {
        self.state = TransferState::Running;
        self.started_at = Some(Utc::now());
        self.transferred_bytes = offset;
        if let Some(total) = total_bytes {
            self.total_bytes = total;
        }
        if self.total_bytes > 0 && self.total_bytes < offset {
            self.total_bytes = offset;
        }
        self.last_error = None;
    }

    pub(crate) fn record_progress(&mut self, bytes: u64) {
        self.transferred_bytes += bytes;
        // sources may deliver more than they announced
        if self.total_bytes > 0 && self.transferred_bytes > self.total_bytes {
            self.total_bytes = self.transferred_bytes;
        }
    }

    pub(crate) fn mark_paused(&mut self) {
        self.state = TransferState::Paused;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.state = TransferState::Completed;
        self.total_bytes = self.transferred_bytes;
    }

    /// Completed without streaming: the local file already holds `size` bytes
    pub(crate) fn mark_already_complete(&mut self, size: u64) {
        self.transferred_bytes = size;
        self.mark_completed();
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.state = TransferState::Failed;
        self.last_error = Some(error);
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.state = TransferState::Cancelled;
    }
}

/// Human readable speed, e.g. `1.50 MiB/s`
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;

    if bytes_per_sec < KIB {
        format!("{:.2} B/s", bytes_per_sec)
    } else if bytes_per_sec < MIB {
        format!("{:.2} KiB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.2} MiB/s", bytes_per_sec / MIB)
    }
}

/// Registry entry: the descriptor, the source feeding it and its worker slot
///
/// Descriptor fields are only mutated by the worker currently holding the
/// slot; status readers take short read locks and never wait on I/O.
pub struct TransferTask {
    descriptor: RwLock<TransferDescriptor>,
    source: Arc<dyn TransferSource>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl TransferTask {
    pub fn new(descriptor: TransferDescriptor, source: Arc<dyn TransferSource>) -> Self {
        Self {
            descriptor: RwLock::new(descriptor),
            source,
            worker: Mutex::new(None),
        }
    }

    pub fn source_id(&self) -> String {
        self.descriptor.read().source_id.clone()
    }

    pub fn state(&self) -> TransferState {
        self.descriptor.read().state
    }

    pub fn kind(&self) -> TransferKind {
        self.descriptor.read().kind
    }

    pub fn destination_path(&self) -> PathBuf {
        self.descriptor.read().destination_path.clone()
    }

    /// Point-in-time copy of the descriptor
    pub fn snapshot(&self) -> TransferDescriptor {
        self.descriptor.read().clone()
    }

    pub fn supports_resume(&self) -> bool {
        self.source.supports_resume()
    }

    /// Whether a worker for this task is still executing
    pub async fn has_live_worker(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| handle.is_live())
    }

    /// Wait for the current worker (if any) to stop and return its final state
    ///
    /// The slot stays locked while waiting so no other worker can start.
    pub async fn wait(&self) -> Option<TransferState> {
        let mut slot = self.worker.lock().await;
        let handle = slot.take()?;
        Some(handle.wait().await)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut TransferDescriptor) -> R) -> R {
        f(&mut self.descriptor.write())
    }

    pub(crate) fn source(&self) -> &Arc<dyn TransferSource> {
        &self.source
    }

    pub(crate) fn worker_slot(&self) -> &Mutex<Option<WorkerHandle>> {
        &self.worker
    }
}

impl fmt::Debug for TransferTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferTask")
            .field("descriptor", &*self.descriptor.read())
            .finish_non_exhaustive()
    }
}
