mod config;
mod logging;

use clap::Parser;
use config::{Config, ConfigError, MetricsConfig};
use discovery::metadata::{KubernetesClient, MetadataError};
use discovery::object_store::S3ObjectStore;
use discovery::{Discovery, DiscoveryError};
use metrics_exporter_statsd::StatsdBuilder;
use renderer::RendererError;
use renderer::service::ErrorPageService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use shared::metrics_defs::describe_all;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "errpages", about = "Custom error pages for ingress-nginx")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, default_value = "/etc/errpages/config.yaml")]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not create kubernetes client: {0}")]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("error page listener failed: {0}")]
    Renderer(#[from] RendererError),
    #[error("admin listener failed: {0}")]
    Admin(#[from] std::io::Error),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", AppError::from(e));
            process::exit(1);
        }
    };

    let _sentry = logging::init(&config.logging);

    if let Some(metrics) = &config.metrics
        && let Err(e) = init_metrics(metrics)
    {
        tracing::warn!(error = %e, "Continuing without metrics");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Could not start runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        tracing::error!(error = %e, "Exiting");
        process::exit(1);
    }
}

fn init_metrics(config: &MetricsConfig) -> Result<(), AppError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(&config.prefix))
        .map_err(|e| AppError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| AppError::Metrics(e.to_string()))?;

    describe_all(discovery::metrics_defs::ALL_METRICS);
    describe_all(renderer::metrics_defs::ALL_METRICS);
    Ok(())
}

async fn run(config: Config) -> Result<(), AppError> {
    let source = Arc::new(KubernetesClient::new(&config.discovery.kubernetes)?);
    let object_store = Arc::new(S3ObjectStore::from_env(&config.discovery.object_store).await);

    let discovery = Discovery::start(
        &config.discovery,
        config.template_root.clone(),
        source,
        Some(object_store),
    )?;
    tracing::info!(
        template_root = %config.template_root.display(),
        interval_secs = config.discovery.scan_interval_secs,
        "Discovery started"
    );

    let service = ErrorPageService::new(
        &config.renderer,
        config.template_root.clone(),
        discovery.store(),
    );
    let readiness = discovery.clone();
    let admin = AdminService::new(move || readiness.is_ready());

    let pages_task = async {
        renderer::run(&config.listener.host, config.listener.port, service).await?;
        Ok::<_, AppError>(())
    };
    let admin_task = async {
        run_http_service::<_, std::io::Error>(
            &config.admin_listener.host,
            config.admin_listener.port,
            admin,
        )
        .await?;
        Ok::<_, AppError>(())
    };

    let result = tokio::select! {
        result = async { tokio::try_join!(pages_task, admin_task).map(|_| ()) } => result,
        _ = shutdown_signal() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    };

    discovery.shutdown().await;
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
