use serde::Deserialize;
use std::fmt;
use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Upstream domain cannot be empty")]
    EmptyUpstreamDomain,

    #[error("Upstream timeout must be greater than 0")]
    ZeroUpstreamTimeout,

    #[error("Empty credential in credential list")]
    EmptyCredential,

    #[error("Invalid replica resolution config: {0}")]
    ReplicaResolution(#[from] replica_resolver::config::ValidationError),
}

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Main listener for proxied requests
    pub listener: Listener,
    /// Admin listener serving health and readiness probes
    #[serde(default = "Listener::admin_default")]
    pub admin_listener: Listener,
    /// Where tenant spaces are hosted
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Bearer tokens attached to requests that carry no Authorization header
    #[serde(default)]
    pub credentials: Vec<String>,
    #[serde(default)]
    pub replica_resolution: replica_resolver::Config,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.upstream.domain.is_empty() {
            return Err(ValidationError::EmptyUpstreamDomain);
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ValidationError::ZeroUpstreamTimeout);
        }
        if self.credentials.iter().any(|c| c.is_empty()) {
            return Err(ValidationError::EmptyCredential);
        }

        self.replica_resolution.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    fn admin_default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8081,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant spaces are served from `{user}-{repo}.{domain}`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    pub domain: String,
    pub scheme: Scheme,
    /// Time allowed for the upstream to return response headers. The body
    /// itself is streamed without a deadline.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            domain: "hf.space".into(),
            scheme: Scheme::Https,
            timeout_secs: 300,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
