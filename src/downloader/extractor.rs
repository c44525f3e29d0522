// Adapter around the external video extraction tool (yt-dlp)
//
// Metadata is fetched with a simulated run, handed back to the tool through
// a temporary info file, and the payload is read from the child's stdout.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::source::{SourceResponse, TransferSource};
use super::task::TransferKind;
use crate::config::ExtractorConfig;
use crate::error::{TransferError, TransferResult};

/// Fields of the tool's info JSON the server cares about
#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub original_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, rename = "_filename")]
    pub legacy_filename: Option<String>,
    #[serde(default)]
    pub filesize_approx: Option<f64>,
    #[serde(default)]
    pub filesize: Option<f64>,
    /// The JSON line as printed, handed back verbatim with `--load-info-json`
    #[serde(skip)]
    pub raw: String,
}

impl MediaInfo {
    /// Parse the first non-empty line of `--print-json` output
    pub fn parse(output: &str) -> TransferResult<Self> {
        let line = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| TransferError::Extractor("empty metadata output".to_string()))?;
        let mut info: MediaInfo = serde_json::from_str(line)
            .map_err(|e| TransferError::Extractor(format!("invalid metadata: {}", e)))?;
        info.raw = line.to_string();
        Ok(info)
    }

    /// Output file name suggested by the tool, without any directory part
    pub fn file_name(&self) -> Option<String> {
        self.filename
            .as_deref()
            .or(self.legacy_filename.as_deref())
            .and_then(|name| Path::new(name).file_name())
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Announced size, 0 when the tool gave no estimate
    pub fn size_hint(&self) -> u64 {
        self.filesize
            .or(self.filesize_approx)
            .filter(|size| size.is_finite() && *size > 0.0)
            .map(|size| size as u64)
            .unwrap_or(0)
    }
}

/// Handle to the configured extraction binary
#[derive(Debug, Clone)]
pub struct Extractor {
    binary: PathBuf,
    temp_dir: PathBuf,
}

impl Extractor {
    pub fn new(binary: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self::new(&config.binary, &config.temp_dir)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run `<binary> <url> -s --print-json` and parse the metadata
    pub async fn fetch_info(&self, url: &str) -> TransferResult<MediaInfo> {
        debug!("probing media: binary={:?}, url={}", self.binary, url);
        let output = Command::new(&self.binary)
            .arg(url)
            .arg("-s")
            .arg("--print-json")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                TransferError::Extractor(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(TransferError::Extractor(detail));
        }

        let info = MediaInfo::parse(&String::from_utf8_lossy(&output.stdout))?;
        info!(
            "media info fetched: url={}, file={:?}, size_hint={}",
            url,
            info.file_name(),
            info.size_hint()
        );
        Ok(info)
    }
}

/// Payload source backed by a `--load-info-json` child process
///
/// The stream cannot restart from an offset, so pause and resume are not
/// offered for extracted transfers.
pub struct ExtractorSource {
    extractor: Extractor,
    info: MediaInfo,
}

impl ExtractorSource {
    pub fn new(extractor: Extractor, info: MediaInfo) -> Self {
        Self { extractor, info }
    }
}

#[async_trait]
impl TransferSource for ExtractorSource {
    fn kind(&self) -> TransferKind {
        TransferKind::Extracted
    }

    fn supports_resume(&self) -> bool {
        false
    }

    async fn open(&self, _offset: u64) -> TransferResult<SourceResponse> {
        tokio::fs::create_dir_all(&self.extractor.temp_dir)
            .await
            .map_err(|e| TransferError::io("create extractor temp dir", e))?;
        let info_path = self
            .extractor
            .temp_dir
            .join(format!("info-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&info_path, self.info.raw.as_bytes())
            .await
            .map_err(|e| TransferError::io("write info json", e))?;

        let spawned = Command::new(&self.extractor.binary)
            .arg("--load-info-json")
            .arg(&info_path)
            .arg("-o")
            .arg("-")
            .arg("-q")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_file(&info_path);
                return Err(TransferError::Extractor(format!(
                    "failed to run {}: {}",
                    self.extractor.binary.display(),
                    e
                )));
            }
        };

        let Some(stdout) = child.stdout.take() else {
            let _ = std::fs::remove_file(&info_path);
            return Err(TransferError::Extractor("child stdout not captured".to_string()));
        };

        Ok(SourceResponse::Stream {
            body: Box::new(ExtractorStream {
                child: ChildState::Streaming(child),
                stdout,
                info_path,
            }),
            total_bytes: Some(self.info.size_hint()).filter(|size| *size > 0),
        })
    }
}

enum ChildState {
    Streaming(Child),
    /// stdout hit EOF, waiting for the exit status
    Exiting(BoxFuture<'static, io::Result<ExitStatus>>),
    Done,
}

/// Child stdout that kills the process and removes the info file on drop
///
/// End of stdout only counts as end of stream once the tool has exited with
/// status 0; any other exit surfaces as a read error.
struct ExtractorStream {
    child: ChildState,
    stdout: ChildStdout,
    info_path: PathBuf,
}

impl ExtractorStream {
    fn poll_exit(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.child = match std::mem::replace(&mut self.child, ChildState::Done) {
            ChildState::Streaming(mut child) => {
                ChildState::Exiting(async move { child.wait().await }.boxed())
            }
            other => other,
        };
        let ChildState::Exiting(exit) = &mut self.child else {
            return Poll::Ready(Ok(()));
        };

        let status = ready!(exit.poll_unpin(cx));
        self.child = ChildState::Done;
        Poll::Ready(match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(io::Error::other(format!("extractor exited with {}", status))),
            Err(e) => Err(e),
        })
    }
}

impl AsyncRead for ExtractorStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if matches!(this.child, ChildState::Streaming(_)) {
            let before = buf.filled().len();
            ready!(Pin::new(&mut this.stdout).poll_read(cx, buf))?;
            if buf.filled().len() > before || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
        }
        this.poll_exit(cx)
    }
}

impl Drop for ExtractorStream {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.info_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove info file {:?}: {}", self.info_path, e);
            }
        }
    }
}
