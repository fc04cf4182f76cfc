//! Validation orchestrator
//!
//! Runs connectivity first and stops there if the cluster is unreachable.
//! Otherwise the read-only probes run in a fixed order, followed by one
//! diagnostic workload per accelerator node.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::gateway::{CommandGateway, ResourceKind, ResourceQuery};
use crate::inventory::{parse_nodes, DEFAULT_ACCELERATOR_RESOURCE};
use crate::ledger::ResultLedger;
use crate::metrics::MetricsRegistry;
use crate::probes::{
    gateway_failure, names, shape_failure, ClusterPolicyProbe, ConnectivityProbe,
    DriverDaemonSetProbe, FeatureLabelProbe, NfdInstanceProbe, NodeAcceleratorProbe,
    OperatorInstallProbe, OperatorPodsProbe, Probe, WorkloadProbe, DEFAULT_DRIVER_MATCH,
    DEFAULT_EXPECTED_LABELS, DEFAULT_NFD_NAMESPACE,
};
use crate::result::{ProbeResult, ProbeStatus};
use crate::workload::{WorkloadManager, WorkloadOutcome, WorkloadSettings};

/// What a validation run checks
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    /// Namespace of the GPU operator
    pub namespace: String,
    pub operator_match: String,
    /// Label selector narrowing the operator pod check
    pub operator_pod_selector: Option<String>,
    pub driver_match: String,
    pub accelerator_resource: String,
    pub expected_labels: Vec<String>,
    pub nfd: bool,
    pub nfd_namespace: String,
    pub cluster_policy: bool,
    /// Run a diagnostic workload on each accelerator node
    pub node_checks: bool,
    /// Restrict node checks to these nodes; empty means all
    pub target_nodes: Vec<String>,
    /// Concurrent node workloads
    pub max_parallel: usize,
    pub workload: WorkloadSettings,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            namespace: "nvidia-gpu-operator".to_string(),
            operator_match: "gpu-operator".to_string(),
            operator_pod_selector: None,
            driver_match: DEFAULT_DRIVER_MATCH.to_string(),
            accelerator_resource: DEFAULT_ACCELERATOR_RESOURCE.to_string(),
            expected_labels: DEFAULT_EXPECTED_LABELS.iter().map(|l| l.to_string()).collect(),
            nfd: false,
            nfd_namespace: DEFAULT_NFD_NAMESPACE.to_string(),
            cluster_policy: false,
            node_checks: true,
            target_nodes: Vec::new(),
            max_parallel: 1,
            workload: WorkloadSettings::default(),
        }
    }
}

/// Sequences probes and per-node workloads into a [`ResultLedger`]
pub struct Orchestrator {
    gateway: Arc<dyn CommandGateway>,
    settings: ValidatorSettings,
    metrics: Arc<MetricsRegistry>,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn CommandGateway>, settings: ValidatorSettings) -> Self {
        Self {
            gateway,
            settings,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Read-only probes that follow connectivity, in run order
    pub fn probes(&self) -> Vec<Box<dyn Probe>> {
        let s = &self.settings;
        let mut operator_pods = OperatorPodsProbe::new(&s.namespace);
        if let Some(selector) = &s.operator_pod_selector {
            operator_pods = operator_pods.with_selector(selector);
        }
        let mut probes: Vec<Box<dyn Probe>> = vec![
            Box::new(OperatorInstallProbe::new(&s.namespace, &s.operator_match)),
            Box::new(operator_pods),
            Box::new(NodeAcceleratorProbe::new(&s.accelerator_resource)),
            Box::new(FeatureLabelProbe::new(
                &s.accelerator_resource,
                s.expected_labels.clone(),
            )),
            Box::new(DriverDaemonSetProbe::new(&s.namespace, &s.driver_match)),
        ];
        if s.nfd {
            probes.push(Box::new(NfdInstanceProbe::new(&s.nfd_namespace)));
        }
        if s.cluster_policy {
            probes.push(Box::new(ClusterPolicyProbe));
        }
        probes
    }

    async fn evaluate(&self, probe: &dyn Probe) -> ProbeResult {
        let start = Instant::now();
        let result = probe.evaluate(self.gateway.as_ref()).await;
        self.observe(&result, start.elapsed());
        result
    }

    fn observe(&self, result: &ProbeResult, elapsed: Duration) {
        self.metrics.record_probe(&result.name, result.status, elapsed);
        debug!(
            probe = %result.name,
            status = %result.status,
            duration = ?elapsed,
            message = %result.message,
            "Probe finished"
        );
    }

    /// Connectivity check; the ledger is returned early when it does not pass
    async fn connect(&self, ledger: &mut ResultLedger) -> bool {
        let result = self.evaluate(&ConnectivityProbe).await;
        let connected = result.is_passed();
        if !connected {
            warn!(message = %result.message, "Cluster not reachable, skipping remaining checks");
        }
        ledger.record(result);
        connected
    }

    /// Full validation run
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> ResultLedger {
        let mut ledger = ResultLedger::new();
        info!(namespace = %self.settings.namespace, "Starting GPU cluster validation");

        if !self.connect(&mut ledger).await {
            return ledger;
        }

        for probe in self.probes() {
            let result = self.evaluate(probe.as_ref()).await;
            ledger.record(result);
        }

        if !self.settings.node_checks {
            info!("Per-node diagnostics disabled");
        } else if *shutdown.borrow() {
            info!("Shutdown requested, skipping per-node diagnostics");
        } else {
            self.run_node_checks(&mut ledger, shutdown).await;
        }

        info!(
            entries = ledger.len(),
            failed = ledger.count(ProbeStatus::Failed),
            "Validation run complete"
        );
        ledger
    }

    /// Validate one existing workload pod
    pub async fn check_workload(&self, namespace: &str, pod: &str) -> ResultLedger {
        let mut ledger = ResultLedger::new();
        if !self.connect(&mut ledger).await {
            return ledger;
        }

        let probe = WorkloadProbe::new(namespace, pod, &self.settings.accelerator_resource);
        let result = self.evaluate(&probe).await;
        ledger.record(result);
        ledger
    }

    /// Accelerator nodes to exercise, in inventory order
    async fn discover_targets(&self) -> Result<Vec<String>, ProbeResult> {
        let name = names::NODE_DISCOVERY;
        let tree = self
            .gateway
            .get(&ResourceQuery::list(ResourceKind::NODE))
            .await
            .map_err(|e| gateway_failure(name, &e, || "Failed to discover GPU nodes".to_string()))?;

        let nodes = parse_nodes(&tree, &self.settings.accelerator_resource)
            .map_err(|e| shape_failure(name, e, &tree))?;

        let wanted = &self.settings.target_nodes;
        for missing in wanted
            .iter()
            .filter(|w| !nodes.iter().any(|n| &n.name == *w && n.has_accelerators()))
        {
            warn!(node = %missing, "Requested node has no accelerators or does not exist");
        }

        Ok(nodes
            .into_iter()
            .filter(|n| n.has_accelerators())
            .filter(|n| wanted.is_empty() || wanted.contains(&n.name))
            .map(|n| n.name)
            .collect())
    }

    async fn run_node_checks(&self, ledger: &mut ResultLedger, shutdown: watch::Receiver<bool>) {
        let start = Instant::now();
        let targets = match self.discover_targets().await {
            Ok(targets) => targets,
            Err(result) => {
                self.observe(&result, start.elapsed());
                ledger.record(result);
                return;
            }
        };

        if targets.is_empty() {
            info!("No accelerator nodes to exercise");
            return;
        }

        let parallel = self.settings.max_parallel.max(1);
        info!(nodes = targets.len(), parallel = parallel, "Running per-node diagnostics");

        let manager = WorkloadManager::new(self.gateway.clone(), self.settings.workload.clone())
            .with_shutdown(shutdown);
        let manager = &manager;

        let outcomes: Vec<(String, WorkloadOutcome, Duration)> = stream::iter(targets)
            .map(|node| async move {
                let start = Instant::now();
                let outcome = manager.run(&node).await;
                (node, outcome, start.elapsed())
            })
            .buffered(parallel)
            .collect()
            .await;

        for (node, outcome, elapsed) in outcomes {
            self.observe(&outcome.result, elapsed);
            self.metrics.set_poll_attempts(&node, outcome.poll_attempts);
            let warning = outcome.teardown_warning(&node);
            ledger.record(outcome.result);
            if let Some(warning) = warning {
                self.metrics.inc_teardown_failure(&node);
                self.observe(&warning, Duration::ZERO);
                ledger.record(warning);
            }
        }
    }
}
