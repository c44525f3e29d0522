// Error taxonomy shared by the transfer engine, file helpers and crypt jobs

use std::fmt::Display;
use std::io;
use thiserror::Error;

/// Errors surfaced by transfers and the collaborators around them
#[derive(Debug, Error)]
pub enum TransferError {
    /// Missing or invalid request field; the operation was not attempted
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// File or task absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure while talking to the source
    #[error("transport error: {0}")]
    Transport(String),

    /// Open/write/rename/delete failure on the local filesystem
    #[error("{context}: {source}")]
    Filesystem {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Non-success reply from the remote source
    #[error("upstream replied {0}")]
    UpstreamStatus(String),

    /// The external extraction tool failed or produced unusable output
    #[error("extractor failed: {0}")]
    Extractor(String),

    /// A worker already owns this source
    #[error("transfer already running: {0}")]
    AlreadyRunning(String),

    /// A collaborator is not configured
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl TransferError {
    /// Wrap an io error, mapping `NotFound` to [`TransferError::NotFound`]
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(context)
        } else {
            Self::Filesystem { context, source }
        }
    }

    pub fn transport(err: impl Display) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = TransferError::io("open a.txt", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, TransferError::NotFound(ref ctx) if ctx == "open a.txt"));

        let err = TransferError::io("open a.txt", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, TransferError::Filesystem { .. }));
        assert!(err.to_string().starts_with("open a.txt: "));
    }
}
