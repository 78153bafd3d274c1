//! Network I/O isolated behind a trait so the download cache's concurrency
//! protocol can be tested without touching a real origin.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

/// Bounds the connect+read time for a single fetch (spec §5: 600s default).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(600);

/// Failure taxonomy for a single fetch attempt.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// HTTP 401/403/404.
    NotFound,
    /// Any other transport or I/O error.
    Transport(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NotFound => write!(f, "origin returned not-found/forbidden"),
            FetchError::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Fetches an origin URL to a local destination file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Production fetcher: a `reqwest::Client` with the spec's connect/read
/// timeout, streaming the response body straight to the temp file.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is static and known-valid");
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let response =
            self.client.get(url).send().await.map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 || status.as_u16() == 404 {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Transport(format!("unexpected status {status}")));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| FetchError::Transport(err.to_string()))?;
            file.write_all(&chunk).await.map_err(|err| FetchError::Transport(err.to_string()))?;
        }
        file.flush().await.map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(())
    }
}
