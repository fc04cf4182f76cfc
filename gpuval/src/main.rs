//! GPU cluster validator (gpuval)
//!
//! Checks that a Kubernetes/OpenShift cluster can actually run GPU workloads:
//! operator installation, driver rollout, node discovery labels, and a
//! short-lived diagnostic pod on every accelerator node.

mod cli;
mod config;
mod report;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{BackendArg, Cli, OutputFormat};
use config::{Backend, Config};
use gpuval_core::metrics::MetricsRegistry;
use gpuval_core::{CommandGateway, Orchestrator, ResultLedger};
use gpuval_k8s::{CliGateway, KubeGateway};

/// Initialize the tracing/logging subsystem
fn init_logging(log_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn to_backend(arg: BackendArg) -> Backend {
    match arg {
        BackendArg::Cli => Backend::Cli,
        BackendArg::Api => Backend::Api,
    }
}

/// Build the configured gateway
async fn create_gateway(config: &Config) -> Result<Arc<dyn CommandGateway>> {
    match config.gateway.backend {
        Backend::Cli => {
            info!(binary = %config.gateway.binary, "Using CLI gateway");
            Ok(Arc::new(CliGateway::new(config.to_cli_config())))
        }
        Backend::Api => {
            info!("Using Kubernetes API gateway");
            let gateway = KubeGateway::connect(
                config.gateway.kubeconfig.as_deref(),
                config.gateway.context.as_deref(),
                config.gateway.command_timeout,
            )
            .await?;
            Ok(Arc::new(gateway))
        }
    }
}

/// Load the config file and apply CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        warn!(path = ?cli.config, "Config file not found, using defaults");
        Config::default()
    };

    if let Some(namespace) = &cli.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(backend) = cli.backend {
        config.gateway.backend = to_backend(backend);
    }
    if cli.skip_node_checks {
        config.workload.enabled = false;
    }
    if cli.metrics_file.is_some() {
        config.metrics.textfile = cli.metrics_file.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Flip the shutdown channel on Ctrl+C or SIGTERM
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, tearing down in-flight workloads");
            }
            _ = terminate => {
                info!("Received SIGTERM, tearing down in-flight workloads");
            }
        }

        let _ = shutdown_tx.send(true);
    });
}

fn write_metrics(path: &std::path::Path, metrics: &MetricsRegistry) -> Result<()> {
    let text = metrics.gather_text().context("Failed to encode metrics")?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write metrics file {:?}", path))?;
    info!(path = ?path, "Metrics written");
    Ok(())
}

fn print_report(ledger: &ResultLedger, format: OutputFormat, verbose: bool) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", report::render_text(ledger, verbose)),
        OutputFormat::Json => {
            println!("{}", report::render_json(ledger).context("Failed to encode report")?)
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let settings = config.to_validator_settings(cli.nodes.clone());
    info!(
        namespace = %settings.namespace,
        node_checks = settings.node_checks,
        backend = ?config.gateway.backend,
        "Configuration loaded"
    );

    let gateway = create_gateway(&config).await?;
    let metrics = Arc::new(MetricsRegistry::new());
    let orchestrator = Orchestrator::new(gateway, settings).with_metrics(metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let ledger = match cli.workload_target() {
        Some(target) => {
            let (namespace, pod) = target.map_err(anyhow::Error::msg)?;
            orchestrator.check_workload(namespace, pod).await
        }
        None => orchestrator.run(shutdown_rx).await,
    };

    print_report(&ledger, cli.output, cli.verbose)?;

    if let Some(path) = &config.metrics.textfile {
        if let Err(e) = write_metrics(path, &metrics) {
            warn!(error = %e, "Metrics export failed");
        }
    }

    Ok(if ledger.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse_args();

    init_logging(&cli.log_level, cli.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "gpuval starting");

    run(cli).await
}
