use crate::cache::{Clock, ReplicaCache, SystemClock, TenantKey};
use crate::config::Config;
use crate::metrics_defs::{RESOLVE_DURATION, RESOLVE_FAILURE};
use crate::selector::{SelectError, parse_records, select_replica};
use crate::sse::{LineReader, SseError, SseEvent, extract_events};
use http::StatusCode;
use http::header::ACCEPT;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("invalid discovery url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("discovery request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("discovery endpoint returned {0}")]
    Status(StatusCode),

    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not read metrics stream: {0}")]
    Stream(#[from] SseError),

    #[error(transparent)]
    Selection(#[from] SelectError),
}

impl ResolveError {
    /// Short tag used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ResolveError::InvalidUrl(_) => "invalid_url",
            ResolveError::Transport(_) => "transport",
            ResolveError::Status(_) => "status",
            ResolveError::Timeout(_) => "timeout",
            ResolveError::Stream(_) => "stream",
            ResolveError::Selection(SelectError::NoRecords) => "no_records",
            ResolveError::Selection(SelectError::NoReplica) => "no_replica",
        }
    }
}

/// Outcome of a resolution attempt.
#[derive(Debug)]
pub enum Resolution {
    Cached(String),
    Discovered(String),
    Unresolved(ResolveError),
}

impl Resolution {
    pub fn replica(&self) -> Option<&str> {
        match self {
            Resolution::Cached(replica) | Resolution::Discovered(replica) => Some(replica),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn into_replica(self) -> Option<String> {
        match self {
            Resolution::Cached(replica) | Resolution::Discovered(replica) => Some(replica),
            Resolution::Unresolved(_) => None,
        }
    }
}

struct ResolverInner {
    client: reqwest::Client,
    config: Config,
    cache: ReplicaCache,
}

/// Finds the replica that should serve a tenant.
///
/// Built once at startup and cloned into every request handler; clones share
/// the same cache and HTTP client.
#[derive(Clone)]
pub struct ReplicaResolver {
    inner: Arc<ResolverInner>,
}

impl ReplicaResolver {
    pub fn new(config: Config) -> Result<Self, ResolveError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .build()?;
        let cache = ReplicaCache::with_clock(config.ttl(), config.max_entries, clock);

        Ok(ReplicaResolver {
            inner: Arc::new(ResolverInner {
                client,
                config,
                cache,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the replica for the tenant, or `None` if it could not be determined.
    /// Never fails: callers fall back to the non-replica path.
    pub async fn resolve_replica(&self, user: &str, repo: &str) -> Option<String> {
        self.resolve(user, repo).await.into_replica()
    }

    pub async fn resolve(&self, user: &str, repo: &str) -> Resolution {
        let key = TenantKey::new(user, repo);

        if let Some(replica) = self.inner.cache.get(&key) {
            tracing::debug!(tenant = %key, %replica, "replica cache hit");
            return Resolution::Cached(replica);
        }

        let start = Instant::now();
        let result = self.discover(&key).await;
        histogram!(RESOLVE_DURATION).record(start.elapsed().as_secs_f64());

        match result {
            Ok(replica) => {
                tracing::info!(tenant = %key, %replica, "selected replica");
                self.inner.cache.put(key, replica.clone());
                Resolution::Discovered(replica)
            }
            Err(err) => {
                tracing::warn!(tenant = %key, error = %err, "replica resolution failed");
                counter!(RESOLVE_FAILURE, "reason" => err.reason()).increment(1);
                Resolution::Unresolved(err)
            }
        }
    }

    async fn discover(&self, key: &TenantKey) -> Result<String, ResolveError> {
        let config = &self.inner.config;
        let url = config.discovery_url_for(key.user(), key.repo())?;

        let events = timeout(config.timeout(), self.fetch_events(url))
            .await
            .map_err(|_| ResolveError::Timeout(config.timeout()))??;

        let records = parse_records(events.iter().map(|event| event.data.as_str()));
        tracing::debug!(
            tenant = %key,
            events = events.len(),
            records = records.len(),
            "read replica metrics"
        );

        Ok(select_replica(&records, &mut rand::rng())?)
    }

    async fn fetch_events(&self, url: Url) -> Result<Vec<SseEvent>, ResolveError> {
        let config = &self.inner.config;
        let response = self
            .inner
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status));
        }

        let mut reader = LineReader::new(Box::pin(response.bytes_stream()));
        Ok(extract_events(&mut reader, &config.event_name, config.max_events).await?)
    }
}
