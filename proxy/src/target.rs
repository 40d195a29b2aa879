// Maps an inbound request path `/{user}/{repo}/{rest...}` onto the tenant's own host.
// `/{user}/{repo}/--replicas/{replica}/{rest...}` pins the request to a replica.
use crate::config::{Scheme, UpstreamConfig};
use hyper::Uri;
use reqwest::Url;

const REPLICAS_SEGMENT: &str = "--replicas";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TargetError {
    #[error("Invalid URL path. Expected a space name.")]
    MissingSpace,
    #[error("Invalid target URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid replica id: {0:?}")]
    InvalidReplica(String),
}

/// How the replica for a request is chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplicaHint {
    /// Nothing in the path, ask the resolver.
    Resolve,
    /// Given in the path. `None` when the path ends right after `--replicas`.
    Explicit(Option<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetRequest {
    pub user: String,
    pub repo: String,
    pub host: String,
    pub replica: ReplicaHint,
    scheme: Scheme,
    path: String,
    query: Option<String>,
}

impl TargetRequest {
    pub fn parse(uri: &Uri, upstream: &UpstreamConfig) -> Result<Self, TargetError> {
        let mut segments = uri.path().split('/').filter(|s| !s.is_empty());

        let (Some(user), Some(repo)) = (segments.next(), segments.next()) else {
            return Err(TargetError::MissingSpace);
        };
        let mut rest: Vec<&str> = segments.collect();

        let replica = if rest.first() == Some(&REPLICAS_SEGMENT) {
            let pinned = rest.get(1).map(|r| r.to_string());
            rest.drain(..rest.len().min(2));
            ReplicaHint::Explicit(pinned)
        } else {
            ReplicaHint::Resolve
        };

        Ok(TargetRequest {
            user: user.to_string(),
            repo: repo.to_string(),
            host: space_host(user, repo, &upstream.domain),
            replica,
            scheme: upstream.scheme,
            path: rest.join("/"),
            query: uri.query().map(|q| q.to_string()),
        })
    }

    /// Builds the upstream URL, routed through `/--replicas/{replica}` when one is given.
    /// The replica id is always a single, percent-encoded path segment.
    pub fn url(&self, replica: Option<&str>) -> Result<Url, TargetError> {
        let mut url = Url::parse(&format!("{}://{}/", self.scheme, self.host))
            .map_err(|e| TargetError::InvalidUrl(e.to_string()))?;

        if let Some(replica) = replica {
            if matches!(replica, "" | "." | "..") {
                return Err(TargetError::InvalidReplica(replica.to_string()));
            }
            url.path_segments_mut()
                .map_err(|_| TargetError::InvalidUrl(format!("{}://{}", self.scheme, self.host)))?
                .pop_if_empty()
                .push(REPLICAS_SEGMENT)
                .push(replica);
        }

        // the remaining path is forwarded with its original encoding
        let path = match url.path() {
            "/" => format!("/{}", self.path),
            prefix => format!("{prefix}/{}", self.path),
        };
        url.set_path(&path);
        url.set_query(self.query.as_deref());

        Ok(url)
    }
}

fn space_host(user: &str, repo: &str, domain: &str) -> String {
    let normalized_repo: String = repo
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();

    format!("{user}-{normalized_repo}.{domain}").to_lowercase()
}
