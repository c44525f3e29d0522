// Transfer manager
//
// Controller side of the engine: starts, pauses, resumes and cancels
// transfers keyed by their source URL.

use parking_lot::Mutex;
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::engine::{discard, TransferEngine};
use super::extractor::{Extractor, ExtractorSource};
use super::registry::TaskRegistry;
use super::source::{build_http_client, HttpSource};
use super::task::{TransferDescriptor, TransferKind, TransferState, TransferTask};
use crate::config::AppConfig;
use crate::error::{TransferError, TransferResult};
use crate::filesystem::{sanitize_file_name, PathGuard};

/// Name used when neither the client nor the source suggests one
const FALLBACK_FILE_NAME: &str = "download";

/// How a start request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// New worker from byte zero (or from an existing file, see config)
    Started,
    /// A paused or failed transfer for the same source was continued
    Resumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Requested,
    NotRunning(TransferState),
    NotFound,
    /// Extracted transfers cannot be paused
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    AlreadyRunning,
    NotResumable(TransferState),
    NotFound,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Worker stopped (if any), partial file removed, entry dropped
    Cancelled,
    /// No registered transfer, or it completed before the request landed
    NothingToCancel,
}

/// Owns the registry and the engine and arbitrates worker slots
pub struct TransferManager {
    registry: Arc<TaskRegistry>,
    engine: Arc<TransferEngine>,
    client: Client,
    extractor: Extractor,
    guard: PathGuard,
    /// Held while a new task is checked against other destinations and registered
    admission: Mutex<()>,
}

impl TransferManager {
    pub fn new(config: &AppConfig) -> TransferResult<Self> {
        let download_dir = config.storage.root.clone();
        if !download_dir.exists() {
            std::fs::create_dir_all(&download_dir)
                .map_err(|e| TransferError::io(format!("create {:?}", download_dir), e))?;
            info!("download directory created: {:?}", download_dir);
        }

        info!(
            "transfer manager: dir={:?}, chunk_size={}, read_timeout={}s, resume_existing={}",
            download_dir,
            config.download.chunk_size,
            config.download.read_timeout_secs,
            config.download.resume_existing_files
        );

        Ok(Self::with_parts(
            Arc::new(TransferEngine::new(&config.download)),
            build_http_client(&config.download)?,
            Extractor::from_config(&config.extractor),
            download_dir,
        ))
    }

    pub fn with_parts(
        engine: Arc<TransferEngine>,
        client: Client,
        extractor: Extractor,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::new()),
            engine,
            client,
            extractor,
            guard: PathGuard::new(download_dir),
            admission: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn download_dir(&self) -> &Path {
        self.guard.root()
    }

    /// Start (or continue) a plain HTTP download of `url`
    ///
    /// Without `file_name` the last URL path segment names the file.
    pub async fn start_direct(
        &self,
        url: &str,
        file_name: Option<&str>,
    ) -> TransferResult<(Arc<TransferTask>, StartOutcome)> {
        let (url, parsed) = parse_source_url(url)?;
        let name = match file_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => file_name_from_url(&parsed),
        };
        let destination = self.guard.resolve(&name)?;

        let source = Arc::new(HttpSource::new(self.client.clone(), url));
        let descriptor = TransferDescriptor::new(url, destination, TransferKind::Direct);
        self.start_task(Arc::new(TransferTask::new(descriptor, source)))
            .await
    }

    /// Ask the extraction tool about `url` and stream its output to disk
    pub async fn start_extracted(
        &self,
        url: &str,
    ) -> TransferResult<(Arc<TransferTask>, StartOutcome)> {
        let (url, _) = parse_source_url(url)?;
        if let Some(existing) = self.registry.lookup(url) {
            if existing.has_live_worker().await {
                return Err(TransferError::AlreadyRunning(url.to_string()));
            }
        }

        let info = self.extractor.fetch_info(url).await?;
        let name = info
            .file_name()
            .and_then(|n| sanitize_file_name(&n))
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
        let destination = self.guard.resolve(&name)?;

        let descriptor = TransferDescriptor::new(url, destination, TransferKind::Extracted)
            .with_total_bytes(info.size_hint());
        let source = Arc::new(ExtractorSource::new(self.extractor.clone(), info));
        self.start_task(Arc::new(TransferTask::new(descriptor, source)))
            .await
    }

    /// Register `candidate` and spawn its worker, or continue the registered
    /// transfer for the same source
    ///
    /// Decisions are taken while holding the task's worker slot, so two
    /// concurrent starts never produce two workers for one source. A new
    /// task is refused while another source still owns its destination file.
    pub async fn start_task(
        &self,
        candidate: Arc<TransferTask>,
    ) -> TransferResult<(Arc<TransferTask>, StartOutcome)> {
        let source_id = candidate.source_id();
        loop {
            // locked before the task becomes visible in the registry
            let mut candidate_slot = candidate.worker_slot().lock().await;
            let (registered, inserted) = {
                let _admission = self.admission.lock();
                if self.registry.lookup(&source_id).is_none() {
                    self.check_destination(&candidate)?;
                }
                self.registry.get_or_register(candidate.clone())
            };
            if inserted {
                *candidate_slot = Some(self.engine.spawn(
                    candidate.clone(),
                    self.registry.clone(),
                    false,
                ));
                info!("transfer registered: source={}", source_id);
                return Ok((candidate.clone(), StartOutcome::Started));
            }
            drop(candidate_slot);

            let mut slot = registered.worker_slot().lock().await;
            if !self.is_registered(&registered) {
                // finished or replaced while we waited for the slot
                continue;
            }
            if slot.as_ref().is_some_and(|handle| handle.is_live()) {
                return Err(TransferError::AlreadyRunning(source_id));
            }

            if registered.state().is_resumable()
                && registered.supports_resume()
                && registered.kind() == candidate.kind()
            {
                *slot = Some(self.engine.spawn(
                    registered.clone(),
                    self.registry.clone(),
                    true,
                ));
                info!("transfer continued on start request: source={}", source_id);
                return Ok((registered.clone(), StartOutcome::Resumed));
            }

            // stale entry without a worker: replace it
            let mut candidate_slot = candidate.worker_slot().lock().await;
            {
                let _admission = self.admission.lock();
                self.check_destination(&candidate)?;
                self.registry.register(candidate.clone());
            }
            *candidate_slot = Some(self.engine.spawn(
                candidate.clone(),
                self.registry.clone(),
                false,
            ));
            info!(
                "transfer replaced {} entry: source={}",
                registered.state(),
                source_id
            );
            return Ok((candidate.clone(), StartOutcome::Started));
        }
    }

    /// Ask the running worker to stop and keep its partial file
    pub async fn pause(&self, source_id: &str) -> PauseOutcome {
        let Some(task) = self.registry.lookup(source_id) else {
            return PauseOutcome::NotFound;
        };
        if !task.supports_resume() {
            return PauseOutcome::Unsupported;
        }

        let slot = task.worker_slot().lock().await;
        match slot.as_ref() {
            Some(handle) if handle.is_live() => {
                handle.signals().request_pause();
                info!("pause requested: source={}", source_id);
                PauseOutcome::Requested
            }
            _ => PauseOutcome::NotRunning(task.state()),
        }
    }

    /// Continue a paused (or failed) transfer from its current file length
    pub async fn resume(&self, source_id: &str) -> ResumeOutcome {
        let Some(task) = self.registry.lookup(source_id) else {
            return ResumeOutcome::NotFound;
        };
        if !task.supports_resume() {
            return ResumeOutcome::Unsupported;
        }

        let mut slot = task.worker_slot().lock().await;
        if slot.as_ref().is_some_and(|handle| handle.is_live()) {
            return ResumeOutcome::AlreadyRunning;
        }
        if !self.is_registered(&task) {
            return ResumeOutcome::NotFound;
        }
        let state = task.state();
        if !state.is_resumable() {
            return ResumeOutcome::NotResumable(state);
        }

        *slot = Some(self.engine.spawn(task.clone(), self.registry.clone(), true));
        info!("transfer resumed: source={}, from={}", source_id, state);
        ResumeOutcome::Resumed
    }

    /// Stop the transfer, delete its partial file and drop its entry
    ///
    /// Valid from Running, Paused and Failed. Waits for a live worker to
    /// finish its own cancellation before returning.
    pub async fn cancel(&self, source_id: &str) -> TransferResult<CancelOutcome> {
        let Some(task) = self.registry.lookup(source_id) else {
            return Ok(CancelOutcome::NothingToCancel);
        };

        let mut slot = task.worker_slot().lock().await;
        if let Some(handle) = slot.take() {
            handle.signals().request_cancel();
            match handle.wait().await {
                TransferState::Cancelled => return Ok(CancelOutcome::Cancelled),
                TransferState::Completed => return Ok(CancelOutcome::NothingToCancel),
                _ => {}
            }
        }

        match task.state() {
            TransferState::Completed | TransferState::Cancelled => {
                Ok(CancelOutcome::NothingToCancel)
            }
            _ => {
                discard(&task, &self.registry).await?;
                Ok(CancelOutcome::Cancelled)
            }
        }
    }

    /// Pause every live worker and wait for them to flush
    pub async fn shutdown(&self) -> usize {
        let mut stopping = Vec::new();
        for task in self.registry.list_all() {
            let mut slot = task.worker_slot().lock().await;
            if let Some(handle) = slot.take() {
                if handle.is_live() {
                    handle.signals().request_pause();
                }
                stopping.push((task.source_id(), handle));
            }
        }

        let count = stopping.len();
        for (source_id, handle) in stopping {
            let state = handle.wait().await;
            info!("worker stopped on shutdown: source={}, state={}", source_id, state);
        }
        if count > 0 {
            warn!("{} transfer(s) interrupted by shutdown", count);
        }
        count
    }

    /// Refuse `task` when a registered transfer for another source writes
    /// to the same file
    fn check_destination(&self, task: &TransferTask) -> TransferResult<()> {
        let destination = task.destination_path();
        match self
            .registry
            .destination_owner(&destination, &task.source_id())
        {
            Some(owner) => {
                warn!(
                    "destination {:?} already owned by source={}",
                    destination,
                    owner.source_id()
                );
                Err(TransferError::AlreadyRunning(format!(
                    "{} (destination of {})",
                    task.snapshot().destination_name(),
                    owner.source_id()
                )))
            }
            None => Ok(()),
        }
    }

    fn is_registered(&self, task: &Arc<TransferTask>) -> bool {
        self.registry
            .lookup(&task.source_id())
            .is_some_and(|current| Arc::ptr_eq(&current, task))
    }
}

fn parse_source_url(url: &str) -> TransferResult<(&str, Url)> {
    let url = url.trim();
    if url.is_empty() {
        return Err(TransferError::Parameter("`url` is required".to_string()));
    }
    let parsed = Url::parse(url)
        .map_err(|e| TransferError::Parameter(format!("invalid url {}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TransferError::Parameter(format!(
            "unsupported url scheme: {}",
            parsed.scheme()
        )));
    }
    Ok((url, parsed))
}

/// Last non-empty path segment, percent-decoded, as a single file name
fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .and_then(|name| sanitize_file_name(&name))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}
