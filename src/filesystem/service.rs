// File operations on the storage root: delete, rename, folder summary

use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::guard::PathGuard;
use crate::error::{TransferError, TransferResult};

/// Size and entry counts of a directory tree
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct FolderSummary {
    /// Sum of regular file sizes in bytes
    pub size: u64,
    pub files: u64,
    pub folders: u64,
}

/// File service confined to one storage root
#[derive(Debug, Clone)]
pub struct FilesystemService {
    guard: PathGuard,
}

impl FilesystemService {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            guard: PathGuard::new(root),
        }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Delete a file below the root
    pub async fn delete_file(&self, name: &str) -> TransferResult<()> {
        let path = self.guard.resolve(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| TransferError::io(format!("delete {}", name), e))?;
        info!("file deleted: {:?}", path);
        Ok(())
    }

    /// Rename a file below the root
    ///
    /// When `new_name` has no extension the old one is kept, so renaming
    /// `clip.mp4` to `talk` yields `talk.mp4`. Returns the final name.
    pub async fn rename_file(&self, old_name: &str, new_name: &str) -> TransferResult<String> {
        let old_path = self.guard.resolve(old_name)?;
        let final_name = keep_extension(old_name.trim(), new_name.trim());
        let new_path = self.guard.resolve(&final_name)?;

        if let Some(parent) = new_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(format!("create {:?}", parent), e))?;
        }
        tokio::fs::rename(&old_path, &new_path)
            .await
            .map_err(|e| TransferError::io(format!("rename {} -> {}", old_name, final_name), e))?;

        info!("file renamed: {:?} -> {:?}", old_path, new_path);
        Ok(final_name)
    }

    /// Walk the root and total up files and folders
    ///
    /// Blocking; callers on the runtime go through `spawn_blocking`.
    /// Unreadable entries are skipped and symlinks are not followed.
    pub fn folder_summary(&self) -> FolderSummary {
        summarize(self.guard.root())
    }
}

fn keep_extension(old_name: &str, new_name: &str) -> String {
    let new_has_ext = Path::new(new_name).extension().is_some();
    match Path::new(old_name).extension() {
        Some(ext) if !new_has_ext => format!("{}.{}", new_name, ext.to_string_lossy()),
        _ => new_name.to_string(),
    }
}

fn summarize(root: &Path) -> FolderSummary {
    let mut summary = FolderSummary::default();
    if !root.exists() {
        debug!("storage root missing, empty summary: {:?}", root);
        return summary;
    }

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            summary.folders += 1;
        } else if file_type.is_file() {
            summary.files += 1;
            summary.size += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    summary
}
