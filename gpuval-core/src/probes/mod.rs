//! Health probes
//!
//! Each probe issues read queries through a [`CommandGateway`] and maps the
//! response to exactly one [`ProbeResult`]. Probes never fail outward: command
//! errors, parse errors and missing resources all become `Failed` results with
//! the raw diagnostic attached.

mod connectivity;
mod driver;
mod extended;
mod nodes;
mod operator;
mod pod_workload;

pub use connectivity::ConnectivityProbe;
pub use driver::{DriverDaemonSetProbe, DEFAULT_DRIVER_MATCH};
pub use extended::{ClusterPolicyProbe, NfdInstanceProbe, DEFAULT_NFD_NAMESPACE};
pub use nodes::{FeatureLabelProbe, NodeAcceleratorProbe, DEFAULT_EXPECTED_LABELS};
pub use operator::{OperatorInstallProbe, OperatorPodsProbe};
pub use pod_workload::{WorkloadProbe, DEFAULT_ERROR_SIGNATURES};

use std::fmt::Display;

use async_trait::async_trait;

use crate::gateway::{CommandGateway, GatewayError, ResourceQuery};
use crate::result::{Detail, ProbeResult};

/// Ledger keys of the built-in probes
pub mod names {
    pub const CONNECTIVITY: &str = "oc_connection";
    pub const OPERATOR_INSTALL: &str = "gpu_operator";
    pub const OPERATOR_PODS: &str = "gpu_operator_pods";
    pub const NODE_ACCELERATORS: &str = "node_gpu_status";
    pub const FEATURE_LABELS: &str = "gpu_feature_discovery";
    pub const DRIVER_DAEMONSET: &str = "driver_daemonset";
    pub const NFD_INSTANCE: &str = "nfd_instance";
    pub const CLUSTER_POLICY: &str = "cluster_policy";
    pub const WORKLOAD: &str = "gpu_workload";
    pub const NODE_DISCOVERY: &str = "gpu_node_discovery";
}

/// One independent health check
#[async_trait]
pub trait Probe: Send + Sync {
    /// Ledger key for this probe's result
    fn name(&self) -> &str;

    /// Run the check
    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult;
}

/// Issue a read query, converting gateway failures into a `Failed` result
pub(crate) async fn fetch(
    gateway: &dyn CommandGateway,
    name: &str,
    query: &ResourceQuery,
    failure_message: impl FnOnce() -> String,
) -> Result<serde_json::Value, ProbeResult> {
    gateway
        .get(query)
        .await
        .map_err(|error| gateway_failure(name, &error, failure_message))
}

/// `Failed` result for a gateway error
pub(crate) fn gateway_failure(
    name: &str,
    error: &GatewayError,
    failure_message: impl FnOnce() -> String,
) -> ProbeResult {
    let message = match error {
        GatewayError::Parse { .. } => "Failed to parse JSON output from the control plane".to_string(),
        _ => failure_message(),
    };
    ProbeResult::failed(name, message).with_detail(error.diagnostic())
}

/// `Failed` result for a response that does not have the expected shape
pub(crate) fn shape_failure(name: &str, error: impl Display, tree: &serde_json::Value) -> ProbeResult {
    ProbeResult::failed(name, format!("Unexpected control-plane response: {}", error)).with_detail(
        Detail::map()
            .with("error", error.to_string())
            .with("raw", tree.to_string()),
    )
}
