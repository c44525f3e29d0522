// Resumable download server library

// Configuration
pub mod config;

// Transfer engine, registry, signals and sources
pub mod downloader;

// File encryption jobs
pub mod encryption;

pub mod error;

// Storage root helpers
pub mod filesystem;

pub mod logging;

// HTTP surface
pub mod server;

// Host telemetry
pub mod stats;

// Status aggregation
pub mod status;

pub use config::AppConfig;
pub use downloader::{
    TaskRegistry, TransferDescriptor, TransferKind, TransferManager, TransferState, TransferTask,
};
pub use encryption::{CryptManager, CryptMode};
pub use error::{TransferError, TransferResult};
pub use server::{build_router, AppState};
pub use status::StatusSnapshot;
