//! Replica resolution for tenant spaces.
//!
//! A tenant (`user`, `repo`) may be served by several replicas. The resolver
//! reads the tenant's live metrics stream from the discovery endpoint, picks
//! one of the first reported replicas at random and caches the choice with a
//! sliding expiry, so requests from the same tenant keep landing on the same
//! replica. Any failure yields no replica and callers use the default route.

pub mod cache;
pub mod config;
pub mod metrics_defs;
pub mod resolver;
pub mod selector;
pub mod sse;

#[cfg(test)]
mod testutils;

pub use cache::{Clock, ReplicaCache, SystemClock, TenantKey};
pub use config::Config;
pub use resolver::{ReplicaResolver, Resolution, ResolveError};
