// File encryption jobs
//
// Encrypts `name` into `name.crypted` and decrypts back, one tokio task per
// job, with a live byte counter for the status endpoint. Output is written
// to a `.part` sibling and renamed into place only once the job succeeds.

pub mod stream;

use aes_gcm::Aes256Gcm;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{BufReader, BufWriter};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{TransferError, TransferResult};
use crate::filesystem::PathGuard;

pub use stream::{cipher_from_passphrase, decrypt_stream, encrypt_stream, FRAME_SIZE};

/// Suffix appended to encrypted files
pub const CRYPT_SUFFIX: &str = ".crypted";

const STAGING_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CryptMode {
    Encrypt,
    Decrypt,
}

/// One running encrypt/decrypt job
#[derive(Debug)]
pub struct CryptJob {
    pub file_name: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub total_bytes: u64,
    pub mode: CryptMode,
    pub started_at: DateTime<Utc>,
    transformed: AtomicU64,
}

impl CryptJob {
    /// Input bytes processed so far
    pub fn transformed_bytes(&self) -> u64 {
        self.transformed.load(Ordering::Relaxed)
    }

    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.transformed_bytes() as f64 / self.total_bytes as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Runs crypt jobs against files below the storage root
pub struct CryptManager {
    cipher: Aes256Gcm,
    guard: PathGuard,
    jobs: DashMap<String, Arc<CryptJob>>,
}

impl CryptManager {
    pub fn from_passphrase(passphrase: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            cipher: cipher_from_passphrase(passphrase),
            guard: PathGuard::new(root),
            jobs: DashMap::new(),
        }
    }

    /// `None` when no key is configured (file or `ENCRYPT_KEY`)
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let key = config.crypto.effective_key()?;
        Some(Self::from_passphrase(&key, config.storage.root.clone()))
    }

    /// Active jobs, ordered by file name
    pub fn jobs(&self) -> Vec<Arc<CryptJob>> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        jobs
    }

    pub fn active_count(&self) -> usize {
        self.jobs.len()
    }

    /// Validate the request and start the job in the background
    pub async fn start(self: &Arc<Self>, name: &str, mode: CryptMode) -> TransferResult<Arc<CryptJob>> {
        let job = Arc::new(self.prepare(name, mode).await?);

        match self.jobs.entry(job.file_name.clone()) {
            Entry::Occupied(_) => return Err(TransferError::AlreadyRunning(job.file_name.clone())),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
            }
        }

        info!(
            "crypt job started: file={}, mode={:?}, bytes={}",
            job.file_name, job.mode, job.total_bytes
        );
        let manager = self.clone();
        let running = job.clone();
        tokio::spawn(async move {
            let result = manager.run(&running).await;
            manager.jobs.remove(&running.file_name);
            match result {
                Ok(()) => info!("crypt job finished: file={} -> {:?}", running.file_name, running.output),
                Err(e) => warn!("crypt job failed: file={}, error={}", running.file_name, e),
            }
        });
        Ok(job)
    }

    async fn prepare(&self, name: &str, mode: CryptMode) -> TransferResult<CryptJob> {
        let input = self.guard.resolve(name)?;
        let file_name = name.trim().to_string();
        let output = match mode {
            CryptMode::Encrypt => {
                if file_name.ends_with(CRYPT_SUFFIX) {
                    return Err(TransferError::Parameter(format!(
                        "{} is already encrypted",
                        file_name
                    )));
                }
                PathBuf::from(format!("{}{}", input.display(), CRYPT_SUFFIX))
            }
            CryptMode::Decrypt => {
                let stripped = file_name.strip_suffix(CRYPT_SUFFIX).ok_or_else(|| {
                    TransferError::Parameter(format!("{} is not an encrypted file", file_name))
                })?;
                self.guard.resolve(stripped)?
            }
        };

        let meta = tokio::fs::metadata(&input)
            .await
            .map_err(|e| TransferError::io(file_name.clone(), e))?;
        if !meta.is_file() {
            return Err(TransferError::Parameter(format!("{} is not a file", file_name)));
        }

        Ok(CryptJob {
            file_name,
            input,
            output,
            total_bytes: meta.len(),
            mode,
            started_at: Utc::now(),
            transformed: AtomicU64::new(0),
        })
    }

    async fn run(&self, job: &CryptJob) -> TransferResult<()> {
        let staging = staging_path(&job.output);
        let mut result = self.transform(job, &staging).await;
        if result.is_ok() {
            result = tokio::fs::rename(&staging, &job.output)
                .await
                .map_err(|e| TransferError::io(format!("rename {:?}", staging), e));
        }
        if result.is_err() {
            remove_partial(&staging).await;
        }
        result
    }

    async fn transform(&self, job: &CryptJob, staging: &Path) -> TransferResult<()> {
        let input = File::open(&job.input)
            .await
            .map_err(|e| TransferError::io(format!("open {:?}", job.input), e))?;
        let output = File::create(staging)
            .await
            .map_err(|e| TransferError::io(format!("create {:?}", staging), e))?;

        let mut reader = BufReader::new(input);
        let mut writer = BufWriter::new(output);
        let progress = |n: u64| {
            job.transformed.fetch_add(n, Ordering::Relaxed);
        };

        match job.mode {
            CryptMode::Encrypt => {
                encrypt_stream(&self.cipher, &mut reader, &mut writer, progress).await?;
            }
            CryptMode::Decrypt => {
                decrypt_stream(&self.cipher, &mut reader, &mut writer, progress).await?;
            }
        }
        Ok(())
    }
}

fn staging_path(output: &Path) -> PathBuf {
    PathBuf::from(format!("{}{}", output.display(), STAGING_SUFFIX))
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove partial output {:?}: {}", path, e);
        }
    }
}
