// Transfer engine
//
// One tokio task per active transfer. The worker opens its source (with a
// byte range when resuming), appends chunks to the destination file and
// reacts to pause/cancel signals between chunks.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::registry::TaskRegistry;
use super::signal::{Signal, SignalChannel};
use super::source::{SourceBody, SourceResponse};
use super::task::{TransferState, TransferTask};
use crate::config::DownloadConfig;
use crate::error::{TransferError, TransferResult};

/// Handle to a spawned worker: its signal channel and join handle
#[derive(Debug)]
pub struct WorkerHandle {
    signals: SignalChannel,
    join: JoinHandle<TransferState>,
}

impl WorkerHandle {
    pub fn signals(&self) -> &SignalChannel {
        &self.signals
    }

    pub fn is_live(&self) -> bool {
        !self.join.is_finished()
    }

    /// Wait for the worker to exit and return the state it left the task in
    pub async fn wait(self) -> TransferState {
        match self.join.await {
            Ok(state) => state,
            Err(e) => {
                error!("transfer worker aborted: {}", e);
                TransferState::Failed
            }
        }
    }
}

/// How the read loop ended
enum PumpOutcome {
    Finished,
    Signalled(Signal),
    Error(String),
}

/// Drives transfer tasks through their lifecycle
#[derive(Debug)]
pub struct TransferEngine {
    chunk_size: usize,
    read_timeout: Option<Duration>,
    resume_existing_files: bool,
}

impl TransferEngine {
    pub fn new(config: &DownloadConfig) -> Self {
        Self::with_options(
            config.chunk_size,
            (config.read_timeout_secs > 0).then(|| Duration::from_secs(config.read_timeout_secs)),
            config.resume_existing_files,
        )
    }

    pub fn with_options(
        chunk_size: usize,
        read_timeout: Option<Duration>,
        resume_existing_files: bool,
    ) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            read_timeout,
            resume_existing_files,
        }
    }

    /// Start a worker for `task` with a fresh signal channel
    ///
    /// `resuming` applies the byte-range protocol to the existing partial
    /// file; fresh starts only do so when `resume_existing_files` is on.
    pub fn spawn(
        self: &Arc<Self>,
        task: Arc<TransferTask>,
        registry: Arc<TaskRegistry>,
        resuming: bool,
    ) -> WorkerHandle {
        let signals = SignalChannel::new();
        let engine = self.clone();
        let worker_signals = signals.clone();
        let join = tokio::spawn(async move {
            engine
                .run(&task, &registry, &worker_signals, resuming)
                .await
        });
        WorkerHandle { signals, join }
    }

    async fn run(
        &self,
        task: &Arc<TransferTask>,
        registry: &TaskRegistry,
        signals: &SignalChannel,
        resuming: bool,
    ) -> TransferState {
        let descriptor = task.snapshot();
        let source_id = descriptor.source_id;
        let path = descriptor.destination_path;

        let offset = if task.supports_resume() && (resuming || self.resume_existing_files) {
            existing_length(&path).await
        } else {
            0
        };

        info!(
            "transfer starting: source={}, dest={:?}, offset={}, resuming={}",
            source_id, path, offset, resuming
        );

        let opened = tokio::select! {
            biased;
            signal = signals.recv() => {
                return self.stop(task, registry, signal).await;
            }
            opened = task.source().open(offset) => opened,
        };

        let (body, total_bytes) = match opened {
            Ok(SourceResponse::Stream { body, total_bytes }) => (body, total_bytes),
            Ok(SourceResponse::AlreadyComplete { total_bytes }) => {
                task.update(|d| d.mark_already_complete(total_bytes));
                registry.remove_if_same(task);
                info!(
                    "transfer already complete on disk: source={}, bytes={}",
                    source_id, total_bytes
                );
                return TransferState::Completed;
            }
            Err(e) => return fail(task, &source_id, e.to_string()),
        };

        let mut file = match open_destination(&path, offset).await {
            Ok(file) => file,
            Err(e) => return fail(task, &source_id, e.to_string()),
        };

        task.update(|d| d.mark_running(offset, total_bytes));

        match self.pump(task, signals, body, &mut file).await {
            PumpOutcome::Finished => {
                if let Err(e) = file.flush().await {
                    return fail(task, &source_id, format!("flush {:?}: {}", path, e));
                }
                task.update(|d| d.mark_completed());
                registry.remove_if_same(task);
                info!(
                    "transfer completed: source={}, bytes={}",
                    source_id,
                    task.snapshot().transferred_bytes
                );
                TransferState::Completed
            }
            PumpOutcome::Signalled(signal) => {
                if let Err(e) = file.flush().await {
                    warn!("flush before stop failed: {:?}: {}", path, e);
                }
                drop(file);
                self.stop(task, registry, signal).await
            }
            PumpOutcome::Error(e) => {
                let _ = file.flush().await;
                fail(task, &source_id, e)
            }
        }
    }

    async fn pump(
        &self,
        task: &TransferTask,
        signals: &SignalChannel,
        mut body: SourceBody,
        file: &mut File,
    ) -> PumpOutcome {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            if let Some(signal) = signals.try_recv() {
                return PumpOutcome::Signalled(signal);
            }

            let read = tokio::select! {
                biased;
                signal = signals.recv() => return PumpOutcome::Signalled(signal),
                read = self.read_chunk(&mut body, &mut buf) => read,
            };

            let n = match read {
                Ok(0) => return PumpOutcome::Finished,
                Ok(n) => n,
                Err(e) => return PumpOutcome::Error(format!("read failed: {}", e)),
            };

            if let Err(e) = file.write_all(&buf[..n]).await {
                return PumpOutcome::Error(format!("write failed: {}", e));
            }
            task.update(|d| d.record_progress(n as u64));
        }
    }

    async fn read_chunk(&self, body: &mut SourceBody, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, body.read(buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no data within read timeout"))?,
            None => body.read(buf).await,
        }
    }

    async fn stop(
        &self,
        task: &Arc<TransferTask>,
        registry: &TaskRegistry,
        signal: Signal,
    ) -> TransferState {
        match signal {
            Signal::Pause => {
                task.update(|d| d.mark_paused());
                let d = task.snapshot();
                info!(
                    "transfer paused: source={}, bytes={}",
                    d.source_id, d.transferred_bytes
                );
                TransferState::Paused
            }
            Signal::Cancel => {
                if let Err(e) = discard(task, registry).await {
                    warn!("cancel cleanup failed: {}", e);
                }
                TransferState::Cancelled
            }
        }
    }
}

/// Cancellation cleanup: delete the partial file, mark Cancelled, unregister
///
/// The task leaves the registry even when the file could not be removed.
pub(crate) async fn discard(task: &Arc<TransferTask>, registry: &TaskRegistry) -> TransferResult<()> {
    let descriptor = task.snapshot();
    let removed = match tokio::fs::remove_file(&descriptor.destination_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransferError::io(
            format!("remove {:?}", descriptor.destination_path),
            e,
        )),
    };

    task.update(|d| d.mark_cancelled());
    registry.remove_if_same(task);
    info!("transfer cancelled: source={}", descriptor.source_id);
    removed
}

fn fail(task: &TransferTask, source_id: &str, error: String) -> TransferState {
    warn!("transfer failed: source={}, error={}", source_id, error);
    task.update(|d| d.mark_failed(error));
    TransferState::Failed
}

async fn existing_length(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

async fn open_destination(path: &Path, offset: u64) -> TransferResult<File> {
    if offset > 0 {
        return OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| TransferError::io(format!("open {:?}", path), e));
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io(format!("create {:?}", parent), e))?;
    }
    File::create(path)
        .await
        .map_err(|e| TransferError::io(format!("create {:?}", path), e))
}
