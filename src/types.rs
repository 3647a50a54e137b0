//! Data structures for fetch operations.

use crate::error::FetchError;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// User agent sent with every request unless a caller overrides it.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36 Edg/87.0.664.66";

/// Size ceiling used when embedding chat images (30 MiB).
pub const IMAGE_SIZE_LIMIT: u64 = 30 * 1024 * 1024;

/// Describes a single fetch: where to go, what to send, how much to accept.
///
/// A `Resource` is never mutated once handed to the fetcher. Deriving a
/// ranged request produces a new value with its own header map.
///
/// # Example
///
/// ```
/// use rangefetch::Resource;
///
/// let resource = Resource::new("https://example.com/cat.jpg")
///     .with_header("Referer", "https://example.com/")
///     .unwrap()
///     .with_size_limit(1024 * 1024);
/// assert_eq!(resource.size_limit(), Some(1024 * 1024));
/// ```
#[derive(Debug, Clone)]
pub struct Resource {
    url: String,
    headers: HeaderMap,
    size_limit: Option<u64>,
}

impl Resource {
    /// Creates a descriptor for `url` with no extra headers and the
    /// fetcher's default size limit.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            size_limit: None,
        }
    }

    /// Adds or replaces a request header. Names are case-insensitive.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, FetchError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::InvalidHeader(format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::InvalidHeader(format!("{}: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets the byte ceiling for this resource. `0` disables the ceiling.
    pub fn with_size_limit(mut self, limit: u64) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Returns a copy of this descriptor carrying `Range: <range>`.
    pub(crate) fn with_range(&self, range: &str) -> Result<Self, FetchError> {
        let mut derived = self.clone();
        let value = HeaderValue::from_str(range)
            .map_err(|e| FetchError::InvalidHeader(format!("range {}: {}", range, e)))?;
        derived.headers.insert(RANGE, value);
        Ok(derived)
    }

    /// The target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Caller-supplied headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The per-resource ceiling, if one was set.
    pub fn size_limit(&self) -> Option<u64> {
        self.size_limit
    }
}

/// Tuning for how a 206 response is split into blocks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct PartitionPolicy {
    /// Resources at or below this many bytes are fetched as one block
    /// (default: 1 MiB).
    pub threshold: u64,
    /// Bytes subtracted from `content_length / workers` when sizing blocks
    /// (default: 10). Some origin servers are off by one at range
    /// boundaries; the final block absorbs the difference.
    pub margin: u64,
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        Self {
            threshold: 1024 * 1024,
            margin: 10,
        }
    }
}

/// Configuration for a [`Fetcher`](crate::Fetcher).
///
/// # Example
///
/// ```
/// use rangefetch::FetcherConfig;
///
/// let config = FetcherConfig {
///     worker_count: 8,
///     size_limit: 64 * 1024 * 1024,
///     ..FetcherConfig::default()
/// };
/// assert_eq!(config.timeout.as_secs(), 60);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FetcherConfig {
    /// Default byte ceiling for resources that do not set their own
    /// (default: 0, unlimited).
    pub size_limit: u64,
    /// Parallel range workers used by [`Fetcher::download`](crate::Fetcher::download)
    /// (default: 4).
    pub worker_count: usize,
    /// End-to-end timeout applied to every request (default: 60s).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// User agent applied before any caller headers.
    pub user_agent: String,
    /// Headers applied to every request, after the user agent and before
    /// per-resource headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Idle connections kept per host (default: 999).
    ///
    /// Range workers hit the same host at once, so a large pool lets them
    /// reuse connections instead of reconnecting.
    pub pool_max_idle_per_host: usize,
    /// Buffer size for file writers (default: 64 KiB).
    pub write_buffer_size: usize,
    /// Block sizing policy for parallel downloads.
    pub partition: PartitionPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            size_limit: 0,
            worker_count: 4,
            timeout: Duration::from_secs(60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            extra_headers: BTreeMap::new(),
            pool_max_idle_per_host: 999,
            write_buffer_size: 64 * 1024,
            partition: PartitionPolicy::default(),
        }
    }
}

/// A fully drained response body.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    /// Response status. Non-2xx bodies are returned as-is.
    pub status: StatusCode,
    /// The decoded body.
    pub data: Bytes,
    /// The `Content-Type` header, describing the decoded payload.
    pub content_type: Option<String>,
}

/// The successful result of a fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The body was read into memory.
    Bytes {
        /// The decoded body.
        data: Bytes,
        /// The `Content-Type` header, if present.
        content_type: Option<String>,
    },
    /// The body was written to a file.
    WrittenToFile {
        /// Destination path.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
}

impl From<FetchedBytes> for FetchOutcome {
    fn from(fetched: FetchedBytes) -> Self {
        FetchOutcome::Bytes {
            data: fetched.data,
            content_type: fetched.content_type,
        }
    }
}
