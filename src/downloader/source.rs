// Byte sources feeding the transfer engine

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::Client;
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::range::{interpret_reply, range_header_value, RangeReply};
use super::task::TransferKind;
use crate::config::DownloadConfig;
use crate::error::{TransferError, TransferResult};

/// Readable payload of an opened source
pub type SourceBody = Box<dyn AsyncRead + Send + Unpin>;

/// Result of opening a source at a byte offset
pub enum SourceResponse {
    /// Bytes starting at the requested offset
    Stream {
        body: SourceBody,
        total_bytes: Option<u64>,
    },
    /// The requested offset is already the end of the resource
    AlreadyComplete { total_bytes: u64 },
}

impl std::fmt::Debug for SourceResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceResponse::Stream { total_bytes, .. } => f
                .debug_struct("Stream")
                .field("total_bytes", total_bytes)
                .finish_non_exhaustive(),
            SourceResponse::AlreadyComplete { total_bytes } => f
                .debug_struct("AlreadyComplete")
                .field("total_bytes", total_bytes)
                .finish(),
        }
    }
}

/// Anything a worker can stream bytes from
#[async_trait]
pub trait TransferSource: Send + Sync {
    fn kind(&self) -> TransferKind;

    /// Whether the source can restart from a non-zero offset
    fn supports_resume(&self) -> bool {
        true
    }

    /// Open the source so that the first byte read is byte `offset`
    async fn open(&self, offset: u64) -> TransferResult<SourceResponse>;
}

/// Plain HTTP(S) resource fetched with `GET` and byte ranges
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TransferSource for HttpSource {
    fn kind(&self) -> TransferKind {
        TransferKind::Direct
    }

    async fn open(&self, offset: u64) -> TransferResult<SourceResponse> {
        let mut request = self.client.get(&self.url);
        if let Some(range) = range_header_value(offset) {
            request = request.header(RANGE, range);
        }

        let response = request.send().await?;
        let status = response.status();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        debug!(
            "source replied: url={}, offset={}, status={}, content_range={:?}",
            self.url, offset, status, content_range
        );

        match interpret_reply(
            status,
            response.content_length(),
            content_range.as_deref(),
            offset,
        ) {
            RangeReply::Body { total_bytes } => {
                let stream = response.bytes_stream().map_err(io::Error::other);
                Ok(SourceResponse::Stream {
                    body: Box::new(StreamReader::new(Box::pin(stream))),
                    total_bytes,
                })
            }
            RangeReply::AlreadyComplete { total_bytes } => {
                Ok(SourceResponse::AlreadyComplete { total_bytes })
            }
            RangeReply::Rejected { status } => Err(TransferError::UpstreamStatus(status)),
        }
    }
}

/// Shared client for direct transfers
///
/// Only the connect timeout is set here; stalled bodies are handled by the
/// engine's per-chunk read timeout so long downloads are never cut off.
pub fn build_http_client(config: &DownloadConfig) -> TransferResult<Client> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
        .map_err(TransferError::transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::testing::spawn_range_server;
    use tokio::io::AsyncReadExt;

    fn client() -> Client {
        build_http_client(&DownloadConfig::default()).unwrap()
    }

    async fn read_all(response: SourceResponse) -> (Vec<u8>, Option<u64>) {
        match response {
            SourceResponse::Stream {
                mut body,
                total_bytes,
            } => {
                let mut buf = Vec::new();
                body.read_to_end(&mut buf).await.unwrap();
                (buf, total_bytes)
            }
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_and_ranged_reads() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let base = spawn_range_server(payload.clone()).await;
        let source = HttpSource::new(client(), format!("{}/file.bin", base));

        let (body, total) = read_all(source.open(0).await.unwrap()).await;
        assert_eq!(body, payload);
        assert_eq!(total, Some(1000));

        let (body, total) = read_all(source.open(400).await.unwrap()).await;
        assert_eq!(body, &payload[400..]);
        assert_eq!(total, Some(1000));
    }

    #[tokio::test]
    async fn test_offset_at_end_is_already_complete() {
        let base = spawn_range_server(vec![7u8; 1000]).await;
        let source = HttpSource::new(client(), format!("{}/file.bin", base));

        match source.open(1000).await.unwrap() {
            SourceResponse::AlreadyComplete { total_bytes } => assert_eq!(total_bytes, 1000),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_resource_is_upstream_error() {
        let base = spawn_range_server(vec![1u8; 10]).await;
        let source = HttpSource::new(client(), format!("{}/missing", base));

        let err = source.open(0).await.unwrap_err();
        assert!(matches!(err, TransferError::UpstreamStatus(ref s) if s.starts_with("404")));
    }
}
