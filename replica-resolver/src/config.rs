use crate::cache::MAX_TTL;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const DEFAULT_DISCOVERY_URL: &str = "https://api.hf.space/v1/{user}/{repo}/live-metrics/sse";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("discovery url template is missing the {0} placeholder")]
    MissingPlaceholder(&'static str),

    #[error("discovery url template is not a valid url: {0}")]
    InvalidDiscoveryUrl(String),

    #[error("event name cannot be empty")]
    EmptyEventName,

    #[error("max_events must be greater than 0")]
    ZeroMaxEvents,

    #[error("ttl_secs must be greater than 0")]
    ZeroTtl,

    #[error("ttl_secs cannot exceed {max}")]
    TtlTooLong { max: u64 },

    #[error("timeout_secs must be greater than 0")]
    ZeroTimeout,

    #[error("max_entries must be greater than 0")]
    ZeroMaxEntries,
}

/// Replica resolution settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Resolve a replica for requests that do not pin one explicitly
    pub enabled: bool,
    /// Discovery endpoint. `{user}` and `{repo}` are substituted per tenant.
    pub discovery_url: String,
    /// SSE event type carrying replica metrics
    pub event_name: String,
    /// Maximum number of events read from the stream before selecting
    pub max_events: usize,
    /// Sliding expiry of a cached replica, renewed on every hit
    pub ttl_secs: u64,
    /// Upper bound on a single discovery attempt, including streaming the body
    pub timeout_secs: u64,
    /// Maximum number of tenants held in the cache
    pub max_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            discovery_url: DEFAULT_DISCOVERY_URL.into(),
            event_name: "metric".into(),
            max_events: 3,
            ttl_secs: 300,
            timeout_secs: 5,
            max_entries: 10_000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for placeholder in ["{user}", "{repo}"] {
            if !self.discovery_url.contains(placeholder) {
                return Err(ValidationError::MissingPlaceholder(placeholder));
            }
        }
        Url::parse(&render_template(&self.discovery_url, "user", "repo"))
            .map_err(|e| ValidationError::InvalidDiscoveryUrl(e.to_string()))?;

        if self.event_name.is_empty() {
            return Err(ValidationError::EmptyEventName);
        }
        if self.max_events == 0 {
            return Err(ValidationError::ZeroMaxEvents);
        }
        if self.ttl_secs == 0 {
            return Err(ValidationError::ZeroTtl);
        }
        if self.ttl_secs > MAX_TTL.as_secs() {
            return Err(ValidationError::TtlTooLong {
                max: MAX_TTL.as_secs(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout);
        }
        if self.max_entries == 0 {
            return Err(ValidationError::ZeroMaxEntries);
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn discovery_url_for(&self, user: &str, repo: &str) -> Result<Url, url::ParseError> {
        Url::parse(&render_template(&self.discovery_url, user, repo))
    }
}

// Single pass so a `{repo}` inside a user name is never substituted again.
fn render_template(template: &str, user: &str, repo: &str) -> String {
    let mut out = String::with_capacity(template.len() + user.len() + repo.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        if let Some(after) = tail.strip_prefix("{user}") {
            out.push_str(user);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{repo}") {
            out.push_str(repo);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
