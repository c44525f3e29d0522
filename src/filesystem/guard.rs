// Path guard
//
// Resolves client-supplied names against the storage root and rejects
// anything that could escape it.

use std::path::{Component, Path, PathBuf};

use crate::error::{TransferError, TransferResult};

/// Confines file names to one root directory
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `name` to the root
    ///
    /// Empty names, absolute paths and any `..` component are rejected.
    /// Nested relative names (`videos/a.mp4`) are allowed.
    pub fn resolve(&self, name: &str) -> TransferResult<PathBuf> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TransferError::Parameter("file name is empty".to_string()));
        }
        if contains_traversal(name) {
            return Err(TransferError::Parameter(format!(
                "path traversal rejected: {}",
                name
            )));
        }

        let relative = Path::new(name);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(TransferError::Parameter(format!(
                        "name must be relative to the storage root: {}",
                        name
                    )));
                }
            }
        }

        if resolved == self.root {
            return Err(TransferError::Parameter(format!("not a file name: {}", name)));
        }
        Ok(resolved)
    }
}

/// Turn an arbitrary name (URL tail, extractor output) into a single path segment
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => None,
        _ => Some(cleaned),
    }
}

fn contains_traversal(path: &str) -> bool {
    let patterns = ["%2e%2e", "%252e%252e"];
    let lower = path.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
        || Path::new(path)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
}
