//! CLI argument parsing for gpuval

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Which gateway talks to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// Shell out to `oc` / `kubectl`
    Cli,
    /// Use the Kubernetes API directly
    Api,
}

/// Report format on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// GPU cluster validator - checks operator, driver, labels and per-node GPU access
#[derive(Debug, Parser)]
#[command(name = "gpuval")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/gpuval/config.yaml")]
    pub config: PathBuf,

    /// Operator namespace (overrides config)
    #[arg(long, env = "GPUVAL_NAMESPACE")]
    pub namespace: Option<String>,

    /// Gateway backend (overrides config)
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GPUVAL_LOG_LEVEL")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long, default_value = "false", env = "GPUVAL_LOG_JSON")]
    pub log_json: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Print result details under each line
    #[arg(short, long)]
    pub verbose: bool,

    /// Only exercise these nodes (repeatable)
    #[arg(long = "node", value_name = "NODE")]
    pub nodes: Vec<String>,

    /// Skip the per-node workload checks
    #[arg(long)]
    pub skip_node_checks: bool,

    /// Check an existing GPU workload instead, given as namespace/pod
    #[arg(long, value_name = "NAMESPACE/POD")]
    pub workload: Option<String>,

    /// Write Prometheus text exposition to this file after the run
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Split `--workload` into namespace and pod name
    pub fn workload_target(&self) -> Option<Result<(&str, &str), String>> {
        self.workload.as_deref().map(|target| {
            match target.split_once('/') {
                Some((namespace, pod)) if !namespace.is_empty() && !pod.is_empty() => {
                    Ok((namespace, pod))
                }
                _ => Err(format!("--workload expects NAMESPACE/POD, got {:?}", target)),
            }
        })
    }
}
