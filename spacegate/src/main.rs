mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use replica_resolver::{ReplicaResolver, Resolution};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "spacegate", version, about = "Edge proxy for tenant spaces")]
enum CliCommand {
    /// Run the proxy and admin listeners
    Proxy(ConfigArgs),
    /// Resolve the replica of a single space and print it
    ResolveReplica(ResolveReplicaArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(Args)]
struct ResolveReplicaArgs {
    #[command(flatten)]
    config: ConfigArgs,
    user: String,
    repo: String,
}

impl CliCommand {
    fn config_args(&self) -> &ConfigArgs {
        match self {
            CliCommand::Proxy(args) => args,
            CliCommand::ResolveReplica(args) => &args.config,
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid config: {0}")]
    Validation(#[from] proxy::config::ValidationError),
    #[error("invalid sentry dsn: {0}")]
    SentryDsn(#[from] sentry::types::ParseDsnError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("could not set up statsd exporter: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    MetricsRecorder,
    #[error(transparent)]
    Proxy(#[from] proxy::ProxyError),
    #[error(transparent)]
    Resolve(#[from] replica_resolver::ResolveError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliCommand) -> Result<(), CliError> {
    let config = load_config(&cli)?;

    // errors are reported while the sentry guard is still alive
    let _sentry = init_logging(config.common.logging.as_ref())?;
    report_failure(serve(cli, config))
}

fn report_failure<T>(result: Result<T, CliError>) -> Result<T, CliError> {
    if let Err(err) = &result {
        tracing::error!(error = %err, "spacegate exited with an error");
    }
    result
}

fn load_config(cli: &CliCommand) -> Result<Config, CliError> {
    let mut config = Config::from_file(&cli.config_args().config_file_path)?;
    config.merge_env_credentials(
        std::env::var("HF_TOKEN").ok(),
        std::env::var("HF_TOKENS").ok(),
    );
    config.proxy.validate()?;
    Ok(config)
}

fn serve(cli: CliCommand, config: Config) -> Result<(), CliError> {
    if let Some(metrics_config) = &config.common.metrics {
        init_statsd(metrics_config)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli {
        CliCommand::Proxy(_) => runtime.block_on(proxy::run(config.proxy))?,
        CliCommand::ResolveReplica(args) => {
            let resolver = ReplicaResolver::new(config.proxy.replica_resolution)?;
            match runtime.block_on(resolver.resolve(&args.user, &args.repo)) {
                Resolution::Cached(replica) | Resolution::Discovered(replica) => {
                    println!("{replica}")
                }
                Resolution::Unresolved(err) => {
                    eprintln!("no replica: {err}");
                    println!("<none>");
                }
            }
        }
    }

    Ok(())
}

fn init_logging(
    logging: Option<&LoggingConfig>,
) -> Result<Option<sentry::ClientInitGuard>, CliError> {
    let guard = match logging {
        Some(logging) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(logging.sentry_dsn.parse()?),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(sentry_layer)
        .init();

    Ok(guard)
}

fn init_statsd(metrics_config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(&metrics_config.statsd_host, metrics_config.statsd_port)
        .build(Some("spacegate"))?;
    metrics::set_global_recorder(recorder).map_err(|_| CliError::MetricsRecorder)?;

    for defs in [
        proxy::metrics_defs::ALL_METRICS,
        replica_resolver::metrics_defs::ALL_METRICS,
    ] {
        shared::metrics_defs::describe_all(defs);
    }

    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "statsd exporter installed"
    );
    Ok(())
}
