//! HTTP retrieval with an on-disk cache.
//!
//! Cached copies live at `<cache_dir>/<sha256(url)>.<ext>`. A resource with a
//! cached copy counts as downloaded without touching the network.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use docassembler_shared::{DocAssemblerError, Result, RunConfig, SourceKind};

/// Whether a cached copy may satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Use the cached copy when present.
    PreferCache,
    /// Always go to the network; the response still refreshes the cache.
    Refresh,
}

/// A retrieved resource body.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: Url,
    pub body: String,
    /// Served from the cache without network access.
    pub from_cache: bool,
    /// When the cached copy was written.
    pub cached_at: DateTime<Utc>,
}

/// Cache-aware HTTP client.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    cache_dir: PathBuf,
}

impl Fetcher {
    /// Build a fetcher from run settings.
    pub fn new(config: &RunConfig) -> Result<Self> {
        Self::with_settings(config.cache_dir(), &config.user_agent, config.timeout)
    }

    /// Build a fetcher with explicit settings.
    pub fn with_settings(cache_dir: PathBuf, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| DocAssemblerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache location for a URL.
    pub fn cache_path(&self, url: &Url, kind: SourceKind) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", url_hash(url), kind.cache_extension()))
    }

    /// Whether a cached copy exists.
    pub fn is_cached(&self, url: &Url, kind: SourceKind) -> bool {
        self.cache_path(url, kind).is_file()
    }

    /// Retrieve a resource.
    ///
    /// HTTP 404 maps to [`DocAssemblerError::NotFound`]; every other failure
    /// maps to [`DocAssemblerError::Network`].
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url, kind: SourceKind, policy: CachePolicy) -> Result<Fetched> {
        let path = self.cache_path(url, kind);

        if policy == CachePolicy::PreferCache {
            if let Some(fetched) = self.read_cached(url, &path).await? {
                debug!(path = %path.display(), "served from cache");
                return Ok(fetched);
            }
        }

        let body = self.download(url).await?;
        self.write_cache(&path, &body).await?;

        Ok(Fetched {
            url: url.clone(),
            body,
            from_cache: false,
            cached_at: Utc::now(),
        })
    }

    async fn download(&self, url: &Url) -> Result<String> {
        debug!("fetching");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DocAssemblerError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DocAssemblerError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(DocAssemblerError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| DocAssemblerError::Network(format!("{url}: body read failed: {e}")))
    }

    async fn read_cached(&self, url: &Url, path: &Path) -> Result<Option<Fetched>> {
        let body = match tokio::fs::read_to_string(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DocAssemblerError::io(path, e)),
        };

        let cached_at = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(Fetched {
            url: url.clone(),
            body,
            from_cache: true,
            cached_at,
        }))
    }

    async fn write_cache(&self, path: &Path, body: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| DocAssemblerError::io(&self.cache_dir, e))?;
        tokio::fs::write(path, body)
            .await
            .map_err(|e| DocAssemblerError::io(path, e))
    }
}

/// Hex SHA-256 of the URL text.
pub fn url_hash(url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}
