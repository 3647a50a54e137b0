//! The shared transport client and request construction.

use crate::error::FetchError;
use crate::types::{FetcherConfig, Resource};
use indicatif::ProgressBar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Fetches resources over one pooled HTTP client.
///
/// Cloning a `Fetcher` is cheap and shares the underlying connection pool,
/// which is how range workers reuse connections. Every request made through
/// it carries the configured user agent and extra headers, overridable per
/// resource.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: Arc<FetcherConfig>,
    default_headers: HeaderMap,
    progress: Option<ProgressBar>,
}

impl Fetcher {
    /// Builds a fetcher and its transport from `config`.
    ///
    /// # Errors
    ///
    /// Fails if a configured header is invalid or the TLS backend cannot be
    /// initialised.
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let default_headers = default_headers(&config)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http1_only()
            .danger_accept_invalid_certs(false)
            .build()?;

        debug!(
            "Built transport client (timeout {:?}, {} idle connections per host)",
            config.timeout, config.pool_max_idle_per_host
        );

        Ok(Self {
            client,
            config: Arc::new(config),
            default_headers,
            progress: None,
        })
    }

    /// Returns the process-wide fetcher built from [`FetcherConfig::default`].
    pub fn shared() -> Result<&'static Fetcher, FetchError> {
        static SHARED: OnceLock<Fetcher> = OnceLock::new();

        if let Some(fetcher) = SHARED.get() {
            return Ok(fetcher);
        }
        let fetcher = Fetcher::new(FetcherConfig::default())?;
        Ok(SHARED.get_or_init(|| fetcher))
    }

    /// Reports every byte written to disk on `pb`.
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    /// The configuration this fetcher was built with.
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Builds a GET for `resource`: user agent, then configured headers, then
    /// the resource's own headers, later layers replacing earlier ones.
    pub(crate) fn request(&self, resource: &Resource) -> reqwest::RequestBuilder {
        let mut headers = self.default_headers.clone();
        headers.extend(resource.headers().clone());
        self.client.get(resource.url()).headers(headers)
    }

    pub(crate) async fn send(&self, resource: &Resource) -> Result<reqwest::Response, FetchError> {
        Ok(self.request(resource).send().await?)
    }

    /// The ceiling in force for `resource`, or `None` when unlimited.
    pub(crate) fn limit_for(&self, resource: &Resource) -> Option<u64> {
        match resource.size_limit().unwrap_or(self.config.size_limit) {
            0 => None,
            limit => Some(limit),
        }
    }

    pub(crate) fn report_progress(&self, written: u64) {
        if let Some(ref pb) = self.progress {
            pb.inc(written);
        }
    }
}

fn default_headers(config: &FetcherConfig) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    let agent = HeaderValue::from_str(&config.user_agent)
        .map_err(|e| FetchError::InvalidHeader(format!("user agent: {}", e)))?;
    headers.insert(USER_AGENT, agent);

    for (name, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::InvalidHeader(format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::InvalidHeader(format!("{}: {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Rejects a response whose declared length exceeds `limit`.
pub(crate) fn check_size(limit: Option<u64>, declared: Option<u64>) -> Result<(), FetchError> {
    match (limit, declared) {
        (Some(limit), Some(len)) if len > limit => Err(FetchError::OverSize {
            limit,
            declared: Some(len),
        }),
        _ => Ok(()),
    }
}
