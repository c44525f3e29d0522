// Test doubles shared by the downloader tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, DuplexStream, ReadBuf};

use super::range::{interpret_reply, RangeReply};
use super::source::{SourceResponse, TransferSource};
use super::task::{TransferDescriptor, TransferKind, TransferTask};
use crate::error::{TransferError, TransferResult};

/// One scripted answer to `open`
pub(crate) enum Reply {
    /// Bytes arrive as the test writes them into the other duplex end
    Gated(DuplexStream, Option<u64>),
    /// A range-capable server holding this payload
    Range(Vec<u8>),
    /// Non-success status
    Status(reqwest::StatusCode),
    /// Delivers these bytes, then the connection breaks
    Broken(Vec<u8>),
}

impl Reply {
    pub(crate) fn range(payload: Vec<u8>) -> Self {
        Reply::Range(payload)
    }

    /// Returns the writer half the test feeds and the reply reading from it
    pub(crate) fn gated(total_bytes: Option<u64>) -> (DuplexStream, Self) {
        let (writer, reader) = tokio::io::duplex(64);
        (writer, Reply::Gated(reader, total_bytes))
    }
}

/// Source answering `open` calls from a queue and recording requested offsets
pub(crate) struct ScriptedSource {
    replies: Mutex<VecDeque<Reply>>,
    offsets: Mutex<Vec<u64>>,
    kind: TransferKind,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            offsets: Mutex::new(Vec::new()),
            kind: TransferKind::Direct,
        }
    }

    /// A source that behaves like the extractor (no resume)
    pub(crate) fn extracted() -> Self {
        Self {
            kind: TransferKind::Extracted,
            ..Self::new()
        }
    }

    pub(crate) fn with_reply(self, reply: Reply) -> Self {
        self.replies.lock().push_back(reply);
        self
    }

    pub(crate) fn push(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    pub(crate) fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().clone()
    }
}

#[async_trait]
impl TransferSource for ScriptedSource {
    fn kind(&self) -> TransferKind {
        self.kind
    }

    fn supports_resume(&self) -> bool {
        self.kind == TransferKind::Direct
    }

    async fn open(&self, offset: u64) -> TransferResult<SourceResponse> {
        self.offsets.lock().push(offset);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| TransferError::Transport("no scripted reply left".to_string()))?;

        match reply {
            Reply::Gated(reader, total_bytes) => Ok(SourceResponse::Stream {
                body: Box::new(reader),
                total_bytes,
            }),
            Reply::Range(payload) => {
                let len = payload.len() as u64;
                let (status, content_range) = if offset > 0 && offset >= len {
                    (
                        reqwest::StatusCode::RANGE_NOT_SATISFIABLE,
                        format!("bytes */{}", len),
                    )
                } else if offset > 0 {
                    (
                        reqwest::StatusCode::PARTIAL_CONTENT,
                        format!("bytes {}-{}/{}", offset, len - 1, len),
                    )
                } else {
                    (reqwest::StatusCode::OK, String::new())
                };
                let remaining = len.saturating_sub(offset);
                match interpret_reply(status, Some(remaining), Some(&content_range), offset) {
                    RangeReply::Body { total_bytes } => Ok(SourceResponse::Stream {
                        body: Box::new(Cursor::new(payload[offset as usize..].to_vec())),
                        total_bytes,
                    }),
                    RangeReply::AlreadyComplete { total_bytes } => {
                        Ok(SourceResponse::AlreadyComplete { total_bytes })
                    }
                    RangeReply::Rejected { status } => Err(TransferError::UpstreamStatus(status)),
                }
            }
            Reply::Status(status) => match interpret_reply(status, None, None, offset) {
                RangeReply::Rejected { status } => Err(TransferError::UpstreamStatus(status)),
                other => panic!("status reply must be a failure, got {:?}", other),
            },
            Reply::Broken(prefix) => Ok(SourceResponse::Stream {
                body: Box::new(BrokenBody {
                    data: Cursor::new(prefix),
                }),
                total_bytes: None,
            }),
        }
    }
}

struct BrokenBody {
    data: Cursor<Vec<u8>>,
}

impl AsyncRead for BrokenBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.data.position() < self.data.get_ref().len() as u64 {
            return Pin::new(&mut self.data).poll_read(cx, buf);
        }
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }
}

/// Task that is never run, for registry-level tests
pub(crate) fn scripted_task(source_id: &str, source: ScriptedSource) -> Arc<TransferTask> {
    task_at(
        source_id,
        std::env::temp_dir().join("mirror-server-unused.bin"),
        Arc::new(source),
    )
}

pub(crate) fn task_at(
    source_id: &str,
    destination: PathBuf,
    source: Arc<ScriptedSource>,
) -> Arc<TransferTask> {
    let kind = source.kind();
    Arc::new(TransferTask::new(
        TransferDescriptor::new(source_id, destination, kind),
        source,
    ))
}

/// Poll `condition` until it holds, failing the test after five seconds
pub(crate) async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Serve `payload` at `/file.bin` with byte-range support; returns the base URL
pub(crate) async fn spawn_range_server(payload: Vec<u8>) -> String {
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    let payload = Arc::new(payload);
    let app = Router::new().route(
        "/file.bin",
        get(move |headers: HeaderMap| {
            let payload = payload.clone();
            async move {
                let len = payload.len() as u64;
                let offset = headers
                    .get(header::RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("bytes="))
                    .and_then(|v| v.trim_end_matches('-').parse::<u64>().ok())
                    .unwrap_or(0);

                if offset > 0 && offset >= len {
                    (
                        StatusCode::RANGE_NOT_SATISFIABLE,
                        [(header::CONTENT_RANGE, format!("bytes */{}", len))],
                        Vec::new(),
                    )
                        .into_response()
                } else if offset > 0 {
                    (
                        StatusCode::PARTIAL_CONTENT,
                        [(
                            header::CONTENT_RANGE,
                            format!("bytes {}-{}/{}", offset, len - 1, len),
                        )],
                        payload[offset as usize..].to_vec(),
                    )
                        .into_response()
                } else {
                    (StatusCode::OK, payload.as_ref().clone()).into_response()
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Shell script mimicking the extraction tool
///
/// `<url> -s --print-json` prints metadata for `clip.mp4` (or fails for the
/// url `unsupported`), `--load-info-json <file> -o - -q` prints `payload`.
#[cfg(unix)]
pub(crate) fn fake_extractor(dir: &Path, payload: &str) -> PathBuf {
    fake_extractor_exiting(dir, payload, 0)
}

/// Like [`fake_extractor`], but the download run exits with `code` after
/// printing the payload
#[cfg(unix)]
pub(crate) fn fake_extractor_exiting(dir: &Path, payload: &str, code: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = format!(
        r#"#!/bin/sh
if [ "$1" = "--load-info-json" ]; then
  [ -f "$2" ] || exit 3
  printf '%s' '{payload}'
  exit {code}
fi
if [ "$1" = "unsupported" ]; then
  echo "ERROR: Unsupported URL: $1" >&2
  exit 1
fi
echo '{{"original_url":"'"$1"'","filename":"clip.mp4","filesize_approx":{size}}}'
"#,
        payload = payload,
        code = code,
        size = payload.len()
    );

    let path = dir.join("fake-yt-dlp");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
