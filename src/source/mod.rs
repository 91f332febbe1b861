//! Fetching partial bodies from URLs and files.
//!
//! A dashboard may name a partial by location instead of carrying its body inline:
//!
//! ```yaml
//! partials:
//!   header:
//!     url: https://example.com/partials/header.jinja
//!   footer:
//!     url: partials/footer.eta   # relative to the dashboard file
//!     dialect: eta
//! ```
//!
//! [`HttpFetcher`] implements [`FetchText`] for `http(s)://` URLs (reqwest, with a
//! per-request timeout and exponential-backoff retries on transient failures) and
//! for local paths and `file://` URLs (tokio fs). [`fetch_partials`] fetches a set
//! of partials concurrently; a failed fetch excludes only that partial.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;

use crate::config::FetchConfig;
use crate::constants::{STARTING_BACKOFF_DELAY_MS, max_backoff_delay};
use crate::templating::{Dialect, Partial};

/// Why a partial body could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    Http {
        /// Requested URL
        url: String,
        /// Response status code
        status: u16,
    },

    /// The request itself failed (connection, timeout, body decoding).
    #[error("Request to {url} failed: {source}")]
    Request {
        /// Requested URL
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// A local file could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The location is neither a supported URL nor a path.
    #[error("Invalid partial location '{url}': {reason}")]
    InvalidUrl {
        /// The location as written
        url: String,
        /// What is wrong with it
        reason: String,
    },
}

impl FetchError {
    /// Whether retrying the same request might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http {
                status,
                ..
            } => *status >= 500 || *status == 429,
            Self::Request {
                source,
                ..
            } => source.is_timeout() || source.is_connect() || source.is_request(),
            Self::Io {
                ..
            }
            | Self::InvalidUrl {
                ..
            } => false,
        }
    }
}

/// Retrieves text by URL or path.
pub trait FetchText {
    /// Fetch the text at `location`.
    fn fetch_text(&self, location: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Where a location points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Remote(reqwest::Url),
    Local(PathBuf),
}

/// Fetches over HTTP(S) and from the local filesystem.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_dir: PathBuf,
    retries: usize,
}

impl HttpFetcher {
    /// A fetcher resolving relative paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("cardtpl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_dir: base_dir.into(),
            retries: config.retries,
        })
    }

    fn classify(&self, location: &str) -> Result<Location, FetchError> {
        let invalid = |reason: &str| FetchError::InvalidUrl {
            url: location.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = location.trim();
        if trimmed.is_empty() {
            return Err(invalid("location is empty"));
        }

        if let Some(path) = trimmed.strip_prefix("file://") {
            if path.is_empty() {
                return Err(invalid("file URL has no path"));
            }
            return Ok(Location::Local(self.local_path(path)));
        }

        match reqwest::Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Location::Remote(url)),
            // A single-letter scheme is a Windows drive, not a URL
            Ok(url) if url.scheme().len() == 1 => Ok(Location::Local(self.local_path(trimmed))),
            Ok(url) => Err(invalid(&format!("unsupported scheme '{}'", url.scheme()))),
            Err(e) if trimmed.contains("://") => Err(invalid(&e.to_string())),
            Err(_) => Ok(Location::Local(self.local_path(trimmed))),
        }
    }

    fn local_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    async fn fetch_remote(&self, url: reqwest::Url) -> Result<String, FetchError> {
        let strategy = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(max_backoff_delay())
            .take(self.retries);

        RetryIf::start(
            strategy,
            || {
                let url = url.clone();
                async move {
                    let result = self.get_once(url.clone()).await;
                    if let Err(e) = &result {
                        tracing::debug!(target: "source::fetch", "Fetch of {} failed: {}", url, e);
                    }
                    result
                }
            },
            FetchError::is_transient,
        )
        .await
    }

    async fn get_once(&self, url: reqwest::Url) -> Result<String, FetchError> {
        let url_text = url.to_string();
        let response = self.client.get(url).send().await.map_err(|source| FetchError::Request {
            url: url_text.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url_text,
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| FetchError::Request {
            url: url_text,
            source,
        })
    }
}

impl FetchText for HttpFetcher {
    async fn fetch_text(&self, location: &str) -> Result<String, FetchError> {
        match self.classify(location)? {
            Location::Remote(url) => self.fetch_remote(url).await,
            Location::Local(path) => tokio::fs::read_to_string(&path).await.map_err(|source| {
                FetchError::Io {
                    path,
                    source,
                }
            }),
        }
    }
}

/// A partial whose body lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePartial {
    /// Partial name
    pub name: String,
    /// URL or path of the body
    pub location: String,
    /// Dialect of the body
    pub dialect: Dialect,
    /// Registration priority
    pub priority: i64,
}

/// A partial that could not be fetched.
#[derive(Debug)]
pub struct PartialFetchFailure {
    /// Partial name
    pub name: String,
    /// What went wrong
    pub error: FetchError,
}

impl std::fmt::Display for PartialFetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "partial '{}': {}", self.name, self.error)
    }
}

/// Outcome of fetching a set of partials.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Partials with their fetched bodies, in request order
    pub partials: Vec<Partial>,
    /// Partials left out
    pub failures: Vec<PartialFetchFailure>,
}

/// Fetch every partial body, at most `concurrency` at once.
///
/// Never fails as a whole: each failure is logged, reported, and excludes only its
/// own partial.
pub async fn fetch_partials<F>(fetcher: &F, remotes: Vec<RemotePartial>, concurrency: usize) -> FetchReport
where
    F: FetchText + Sync,
{
    let mut results: Vec<(usize, RemotePartial, Result<String, FetchError>)> =
        stream::iter(remotes.into_iter().enumerate())
            .map(|(index, remote)| async move {
                let result = fetcher.fetch_text(&remote.location).await;
                (index, remote, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
    results.sort_by_key(|(index, ..)| *index);

    let mut report = FetchReport::default();
    for (_, remote, result) in results {
        match result {
            Ok(body) => {
                tracing::debug!("Fetched partial '{}' from {}", remote.name, remote.location);
                report.partials.push(
                    Partial::new(remote.name, body, remote.dialect).with_priority(remote.priority),
                );
            }
            Err(error) => {
                tracing::warn!("Skipping partial '{}': {}", remote.name, error);
                report.failures.push(PartialFetchFailure {
                    name: remote.name,
                    error,
                });
            }
        }
    }
    report
}
