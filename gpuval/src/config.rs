//! Configuration module for gpuval
//!
//! Handles loading and validating configuration from YAML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use gpuval_core::inventory::DEFAULT_ACCELERATOR_RESOURCE;
use gpuval_core::probes::{DEFAULT_DRIVER_MATCH, DEFAULT_EXPECTED_LABELS, DEFAULT_NFD_NAMESPACE};
use gpuval_core::{ValidatorSettings, WorkloadSettings};
use gpuval_k8s::CliGatewayConfig;

/// Gateway backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `oc` / `kubectl` subprocess
    #[default]
    Cli,
    /// Kubernetes API client
    Api,
}

/// Cluster access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub backend: Backend,

    /// CLI binary for the cli backend
    #[serde(default = "default_binary")]
    pub binary: String,

    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default)]
    pub context: Option<String>,

    /// Upper bound for each control-plane call
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            binary: default_binary(),
            kubeconfig: None,
            context: None,
            command_timeout: default_command_timeout(),
        }
    }
}

/// Per-node diagnostic workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Run a diagnostic workload on each accelerator node
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_workload_namespace")]
    pub namespace: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_entry_command")]
    pub entry_command: Vec<String>,

    #[serde(default = "default_diagnostic_command")]
    pub diagnostic_command: Vec<String>,

    #[serde(default = "default_accelerator_count")]
    pub accelerator_count: u32,

    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Tolerate a taint keyed by the accelerator resource name
    #[serde(default)]
    pub tolerate_accelerator_taint: bool,

    /// Node workloads in flight at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: default_workload_namespace(),
            image: default_image(),
            entry_command: default_entry_command(),
            diagnostic_command: default_diagnostic_command(),
            accelerator_count: default_accelerator_count(),
            poll_attempts: default_poll_attempts(),
            poll_interval: default_poll_interval(),
            tolerate_accelerator_taint: false,
            max_parallel: default_max_parallel(),
        }
    }
}

/// Optional probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedConfig {
    /// Check for a NodeFeatureDiscovery instance
    #[serde(default)]
    pub nfd: bool,

    #[serde(default = "default_nfd_namespace")]
    pub nfd_namespace: String,

    /// Check ClusterPolicy readiness
    #[serde(default)]
    pub cluster_policy: bool,
}

impl Default for ExtendedConfig {
    fn default() -> Self {
        Self {
            nfd: false,
            nfd_namespace: default_nfd_namespace(),
            cluster_policy: false,
        }
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Write the text exposition here after the run
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Namespace of the GPU operator
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_accelerator_resource")]
    pub accelerator_resource: String,

    #[serde(default = "default_operator_match")]
    pub operator_match: String,

    /// Label selector for the operator pod check, e.g. `app=gpu-operator`
    #[serde(default)]
    pub operator_pod_selector: Option<String>,

    #[serde(default = "default_driver_match")]
    pub driver_daemonset_match: String,

    /// Feature labels every accelerator node should carry
    #[serde(default = "default_expected_labels")]
    pub expected_labels: Vec<String>,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,

    #[serde(default)]
    pub extended: ExtendedConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            accelerator_resource: default_accelerator_resource(),
            operator_match: default_operator_match(),
            operator_pod_selector: None,
            driver_daemonset_match: default_driver_match(),
            expected_labels: default_expected_labels(),
            gateway: GatewayConfig::default(),
            workload: WorkloadConfig::default(),
            extended: ExtendedConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            anyhow::bail!("namespace must not be empty");
        }
        if self.workload.namespace.trim().is_empty() {
            anyhow::bail!("workload.namespace must not be empty");
        }
        if self.gateway.backend == Backend::Cli && self.gateway.binary.trim().is_empty() {
            anyhow::bail!("gateway.binary must not be empty for the cli backend");
        }
        if self.gateway.command_timeout.is_zero() {
            anyhow::bail!("gateway.command_timeout must be > 0");
        }
        if self.workload.accelerator_count == 0 {
            anyhow::bail!("workload.accelerator_count must be > 0");
        }
        if self.workload.poll_attempts == 0 {
            anyhow::bail!("workload.poll_attempts must be > 0");
        }
        if self.workload.poll_interval.is_zero() {
            anyhow::bail!("workload.poll_interval must be > 0");
        }
        if self.workload.max_parallel == 0 {
            anyhow::bail!("workload.max_parallel must be > 0");
        }
        if self.workload.diagnostic_command.is_empty() {
            anyhow::bail!("workload.diagnostic_command must not be empty");
        }
        Ok(())
    }

    /// Settings for the orchestrator
    pub fn to_validator_settings(&self, target_nodes: Vec<String>) -> ValidatorSettings {
        ValidatorSettings {
            namespace: self.namespace.clone(),
            operator_match: self.operator_match.clone(),
            operator_pod_selector: self.operator_pod_selector.clone(),
            driver_match: self.driver_daemonset_match.clone(),
            accelerator_resource: self.accelerator_resource.clone(),
            expected_labels: self.expected_labels.clone(),
            nfd: self.extended.nfd,
            nfd_namespace: self.extended.nfd_namespace.clone(),
            cluster_policy: self.extended.cluster_policy,
            node_checks: self.workload.enabled,
            target_nodes,
            max_parallel: self.workload.max_parallel,
            workload: self.to_workload_settings(),
        }
    }

    fn to_workload_settings(&self) -> WorkloadSettings {
        WorkloadSettings {
            namespace: self.workload.namespace.clone(),
            image: self.workload.image.clone(),
            entry_command: self.workload.entry_command.clone(),
            diagnostic_command: self.workload.diagnostic_command.clone(),
            accelerator_resource: self.accelerator_resource.clone(),
            accelerator_count: self.workload.accelerator_count,
            poll_attempts: self.workload.poll_attempts,
            poll_interval: self.workload.poll_interval,
            tolerate_accelerator_taint: self.workload.tolerate_accelerator_taint,
            ..WorkloadSettings::default()
        }
    }

    /// Settings for the subprocess gateway
    pub fn to_cli_config(&self) -> CliGatewayConfig {
        CliGatewayConfig {
            binary: self.gateway.binary.clone(),
            kubeconfig: self.gateway.kubeconfig.clone(),
            context: self.gateway.context.clone(),
            command_timeout: self.gateway.command_timeout,
        }
    }
}

// Default value functions
fn default_namespace() -> String {
    "nvidia-gpu-operator".to_string()
}

fn default_accelerator_resource() -> String {
    DEFAULT_ACCELERATOR_RESOURCE.to_string()
}

fn default_operator_match() -> String {
    "gpu-operator".to_string()
}

fn default_driver_match() -> String {
    DEFAULT_DRIVER_MATCH.to_string()
}

fn default_expected_labels() -> Vec<String> {
    DEFAULT_EXPECTED_LABELS.iter().map(|l| l.to_string()).collect()
}

fn default_binary() -> String {
    "oc".to_string()
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_workload_namespace() -> String {
    "default".to_string()
}

fn default_image() -> String {
    "nvidia/cuda:11.8.0-base-ubuntu22.04".to_string()
}

fn default_entry_command() -> Vec<String> {
    vec!["sleep".to_string(), "infinity".to_string()]
}

fn default_diagnostic_command() -> Vec<String> {
    vec!["nvidia-smi".to_string()]
}

fn default_accelerator_count() -> u32 {
    1
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_parallel() -> usize {
    1
}

fn default_nfd_namespace() -> String {
    DEFAULT_NFD_NAMESPACE.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.backend, Backend::Cli);
        assert!(config.workload.enabled);
        assert!(config.operator_pod_selector.is_none());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
namespace: gpu-operator-resources
operator_pod_selector: app=gpu-operator
driver_daemonset_match: nvidia-driver-daemonset

gateway:
  backend: api
  context: lab
  command_timeout: 30s

workload:
  namespace: gpu-validation
  image: nvcr.io/nvidia/cuda:12.2.0-base-ubuntu22.04
  accelerator_count: 2
  poll_attempts: 60
  poll_interval: 2s
  tolerate_accelerator_taint: true
  max_parallel: 4

extended:
  nfd: true
  cluster_policy: true

metrics:
  textfile: /var/lib/node_exporter/gpuval.prom
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.backend, Backend::Api);
        assert_eq!(config.gateway.command_timeout, Duration::from_secs(30));
        assert_eq!(config.workload.poll_interval, Duration::from_secs(2));
        assert_eq!(config.extended.nfd_namespace, "openshift-nfd");
        assert_eq!(
            config.metrics.textfile,
            Some(PathBuf::from("/var/lib/node_exporter/gpuval.prom"))
        );

        let settings = config.to_validator_settings(vec!["worker-1".to_string()]);
        assert_eq!(settings.namespace, "gpu-operator-resources");
        assert_eq!(settings.driver_match, "nvidia-driver-daemonset");
        assert_eq!(settings.operator_pod_selector.as_deref(), Some("app=gpu-operator"));
        assert_eq!(settings.max_parallel, 4);
        assert!(settings.nfd && settings.cluster_policy);
        assert_eq!(settings.target_nodes, vec!["worker-1"]);
        assert_eq!(settings.workload.accelerator_count, 2);
        assert_eq!(settings.workload.accelerator_resource, "nvidia.com/gpu");
        assert!(settings.workload.tolerate_accelerator_taint);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.workload.poll_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workload.accelerator_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.gateway.command_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workload.max_parallel = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_binary_only_matters_for_cli() {
        let mut config = Config::default();
        config.gateway.binary = String::new();
        assert!(config.validate().is_err());

        config.gateway.backend = Backend::Api;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_config_conversion() {
        let yaml = "gateway:\n  binary: kubectl\n  kubeconfig: /tmp/kubeconfig\n";
        let cli = Config::from_yaml(yaml).unwrap().to_cli_config();
        assert_eq!(cli.binary, "kubectl");
        assert_eq!(cli.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
        assert_eq!(cli.command_timeout, Duration::from_secs(60));
    }
}
