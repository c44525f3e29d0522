// Application state

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::downloader::TransferManager;
use crate::encryption::CryptManager;
use crate::filesystem::FilesystemService;
use crate::stats::StatsCollector;

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub transfers: Arc<TransferManager>,
    /// `None` when no encryption key is configured
    pub crypt: Option<Arc<CryptManager>>,
    pub stats: Arc<StatsCollector>,
    pub files: FilesystemService,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let transfers =
            TransferManager::new(&config).context("Failed to initialise transfer manager")?;

        let crypt = CryptManager::from_config(&config).map(Arc::new);
        if crypt.is_none() {
            warn!("no encryption key configured, /encrypt and /decrypt are disabled");
        }

        let files = FilesystemService::new(config.storage.root.clone());
        let stats = StatsCollector::from_config(&config);
        info!("storage root: {:?}", config.storage.root);

        Ok(Self {
            config: Arc::new(config),
            transfers: Arc::new(transfers),
            crypt,
            stats: Arc::new(stats),
            files,
        })
    }

    /// Pause live transfers so partial files are flushed before exit
    pub async fn shutdown(&self) {
        let stopped = self.transfers.shutdown().await;
        info!("shutdown complete, {} worker(s) stopped", stopped);
    }
}
