use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::io::Read as _;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::FetchConfig;

/// Errors that can occur while reading a feed's raw content.
///
/// Covers both transports: local files and HTTP(S).
#[derive(Debug, Error)]
pub enum ReadError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Local file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The location uses a scheme this reader cannot open
    #[error("Unsupported location: {0}")]
    Unsupported(String),
}

/// Blocking content reader used by the sequential fetcher.
pub trait ContentReader: Send + Sync {
    fn read(&self, location: &Url) -> Result<Vec<u8>, ReadError>;
}

/// Non-blocking content reader used by the concurrent fetcher.
///
/// Returns a boxed future so implementations stay object safe; the future
/// borrows the reader and the location for its whole lifetime.
pub trait AsyncContentReader: Send + Sync {
    fn read<'a>(&'a self, location: &'a Url) -> BoxFuture<'a, Result<Vec<u8>, ReadError>>;
}

fn file_path(location: &Url) -> Result<std::path::PathBuf, ReadError> {
    location
        .to_file_path()
        .map_err(|_| ReadError::Unsupported(location.to_string()))
}

fn check_size(len: u64, limit: usize) -> Result<(), ReadError> {
    if len > limit as u64 {
        return Err(ReadError::ResponseTooLarge);
    }
    Ok(())
}

// ============================================================================
// Blocking reader
// ============================================================================

/// Reads `file://` locations from disk and HTTP(S) locations through
/// `reqwest::blocking`. Blocks the calling thread until the body is read.
///
/// Must not be constructed or dropped inside an async context; the
/// blocking client owns its own runtime.
pub struct BlockingReader {
    client: reqwest::blocking::Client,
    max_size: usize,
}

impl BlockingReader {
    pub fn new(config: &FetchConfig) -> Result<Self, ReadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            max_size: config.max_feed_size,
        })
    }

    fn read_file(&self, location: &Url) -> Result<Vec<u8>, ReadError> {
        let path = file_path(location)?;
        check_size(std::fs::metadata(&path)?.len(), self.max_size)?;
        Ok(std::fs::read(path)?)
    }

    fn read_http(&self, location: &Url) -> Result<Vec<u8>, ReadError> {
        let response = self
            .client
            .get(location.clone())
            .send()
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(ReadError::HttpStatus(response.status().as_u16()));
        }

        let expected_length = response.content_length();
        if let Some(len) = expected_length {
            check_size(len, self.max_size)?;
        }

        // Read one byte past the limit so an oversized body is detectable
        let mut bytes = Vec::new();
        response
            .take(self.max_size as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(map_body_error)?;
        if bytes.len() > self.max_size {
            return Err(ReadError::ResponseTooLarge);
        }

        check_complete(expected_length, bytes.len())?;
        Ok(bytes)
    }
}

impl ContentReader for BlockingReader {
    fn read(&self, location: &Url) -> Result<Vec<u8>, ReadError> {
        tracing::debug!(location = %location, "Reading feed content");
        match location.scheme() {
            "file" => self.read_file(location),
            "http" | "https" => self.read_http(location),
            _ => Err(ReadError::Unsupported(location.to_string())),
        }
    }
}

// ============================================================================
// Async reader
// ============================================================================

/// Async counterpart of [`BlockingReader`]: `tokio::fs` for files and a
/// shared `reqwest::Client` with streamed, size-limited bodies for HTTP(S).
#[derive(Clone)]
pub struct HttpReader {
    client: reqwest::Client,
    timeout: Duration,
    max_size: usize,
}

impl HttpReader {
    pub fn new(config: &FetchConfig) -> Result<Self, ReadError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Builds a reader around a caller-configured client.
    pub fn with_client(client: reqwest::Client, config: &FetchConfig) -> Self {
        Self {
            client,
            timeout: config.timeout(),
            max_size: config.max_feed_size,
        }
    }

    async fn read_file(&self, location: &Url) -> Result<Vec<u8>, ReadError> {
        let path = file_path(location)?;
        check_size(tokio::fs::metadata(&path).await?.len(), self.max_size)?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Request and body share one deadline.
    async fn read_http(&self, location: &Url) -> Result<Vec<u8>, ReadError> {
        tokio::time::timeout(self.timeout, self.send_and_read(location))
            .await
            .map_err(|_| ReadError::Timeout)?
    }

    async fn send_and_read(&self, location: &Url) -> Result<Vec<u8>, ReadError> {
        let response = self
            .client
            .get(location.clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(ReadError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_size).await
    }
}

impl AsyncContentReader for HttpReader {
    fn read<'a>(&'a self, location: &'a Url) -> BoxFuture<'a, Result<Vec<u8>, ReadError>> {
        async move {
            tracing::debug!(location = %location, "Reading feed content");
            match location.scheme() {
                "file" => self.read_file(location).await,
                "http" | "https" => self.read_http(location).await,
                _ => Err(ReadError::Unsupported(location.to_string())),
            }
        }
        .boxed()
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ReadError {
    if err.is_timeout() {
        ReadError::Timeout
    } else {
        ReadError::Network(err)
    }
}

/// The blocking body reader reports failures as `io::Error`, wrapping the
/// underlying `reqwest::Error` when there is one.
fn map_body_error(err: std::io::Error) -> ReadError {
    if err.kind() == std::io::ErrorKind::TimedOut {
        return ReadError::Timeout;
    }
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
    {
        Some(inner) if inner.is_timeout() => ReadError::Timeout,
        _ => ReadError::Io(err),
    }
}

fn check_complete(expected: Option<u64>, received: usize) -> Result<(), ReadError> {
    if let Some(expected) = expected {
        if (received as u64) < expected {
            return Err(ReadError::IncompleteResponse { expected, received });
        }
    }
    Ok(())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ReadError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        check_size(len, limit)?;
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ReadError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ReadError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    check_complete(expected_length, bytes.len())?;
    Ok(bytes)
}
