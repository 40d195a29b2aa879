mod analytics;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod metrics_defs;
pub mod proxy_service;
pub mod target;

pub use errors::ProxyError;
pub use proxy_service::ProxyService;

use shared::admin_service::AdminService;
use shared::http::run_http_service;

/// Runs the proxy and admin listeners until one of them fails.
pub async fn run(config: config::Config) -> Result<(), ProxyError> {
    let proxy_service = ProxyService::new(&config)?;

    tracing::info!(
        upstream = %config.upstream.domain,
        credentials = config.credentials.len(),
        replica_resolution = config.replica_resolution.enabled,
        "starting proxy"
    );

    let proxy_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        proxy_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, ProxyError>::new(|| true),
    );

    tokio::try_join!(proxy_task, admin_task)?;
    Ok(())
}
