//! Node accelerator inventory and feature-label probes

use async_trait::async_trait;

use super::{fetch, names, shape_failure, Probe};
use crate::gateway::{CommandGateway, ResourceKind, ResourceQuery};
use crate::inventory::{parse_nodes, NodeDescriptor};
use crate::result::{Detail, ProbeResult};

/// Labels published by node feature discovery on a working GPU node
pub const DEFAULT_EXPECTED_LABELS: &[&str] = &[
    // NVIDIA PCI vendor ID
    "feature.node.kubernetes.io/pci-10de.present",
    "nvidia.com/gpu.present",
    "nvidia.com/gpu.count",
    "nvidia.com/gpu.product",
    "nvidia.com/gpu.memory",
];

async fn fetch_nodes(
    gateway: &dyn CommandGateway,
    name: &str,
    accelerator_resource: &str,
) -> Result<Vec<NodeDescriptor>, ProbeResult> {
    let tree = fetch(gateway, name, &ResourceQuery::list(ResourceKind::NODE), || {
        "Failed to get nodes information".to_string()
    })
    .await?;

    parse_nodes(&tree, accelerator_resource).map_err(|e| shape_failure(name, e, &tree))
}

/// Checks that at least one node advertises accelerator capacity
#[derive(Debug, Clone)]
pub struct NodeAcceleratorProbe {
    pub accelerator_resource: String,
}

impl NodeAcceleratorProbe {
    pub fn new(accelerator_resource: impl Into<String>) -> Self {
        Self {
            accelerator_resource: accelerator_resource.into(),
        }
    }
}

#[async_trait]
impl Probe for NodeAcceleratorProbe {
    fn name(&self) -> &str {
        names::NODE_ACCELERATORS
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let nodes = match fetch_nodes(gateway, self.name(), &self.accelerator_resource).await {
            Ok(nodes) => nodes,
            Err(result) => return result,
        };

        let (with, without): (Vec<&NodeDescriptor>, Vec<&NodeDescriptor>) =
            nodes.iter().partition(|n| n.has_accelerators());

        let nodes_with: Vec<Detail> = with
            .iter()
            .map(|n| {
                Detail::from(
                    Detail::map()
                        .with("name", &n.name)
                        .with("gpu_count", n.accelerator_capacity),
                )
            })
            .collect();
        let nodes_without: Vec<String> = without.iter().map(|n| n.name.clone()).collect();

        if nodes_with.is_empty() {
            ProbeResult::failed(self.name(), "No nodes with GPUs found in the cluster").with_detail(
                Detail::map()
                    .with("nodes_checked", nodes.len())
                    .with("nodes_without_accelerators", nodes_without),
            )
        } else {
            ProbeResult::passed(
                self.name(),
                format!("Found {} nodes with GPUs", nodes_with.len()),
            )
            .with_detail(
                Detail::map()
                    .with("nodes_with_accelerators", nodes_with)
                    .with("nodes_without_accelerators", nodes_without),
            )
        }
    }
}

/// Checks that every accelerator node carries the expected feature labels
#[derive(Debug, Clone)]
pub struct FeatureLabelProbe {
    pub accelerator_resource: String,
    pub expected_labels: Vec<String>,
}

impl FeatureLabelProbe {
    pub fn new(accelerator_resource: impl Into<String>, expected_labels: Vec<String>) -> Self {
        Self {
            accelerator_resource: accelerator_resource.into(),
            expected_labels,
        }
    }

    /// Probe with [`DEFAULT_EXPECTED_LABELS`]
    pub fn with_default_labels(accelerator_resource: impl Into<String>) -> Self {
        Self::new(
            accelerator_resource,
            DEFAULT_EXPECTED_LABELS.iter().map(|l| l.to_string()).collect(),
        )
    }
}

/// Split accelerator nodes by label completeness
///
/// Nodes without accelerator capacity are skipped entirely.
fn classify(nodes: &[NodeDescriptor], expected: &[String]) -> (Vec<Detail>, Vec<Detail>) {
    let mut complete: Vec<Detail> = Vec::new();
    let mut missing: Vec<Detail> = Vec::new();

    for node in nodes.iter().filter(|n| n.has_accelerators()) {
        let mut present = Detail::map();
        let mut absent = Vec::new();
        for label in expected {
            match node.labels.get(label) {
                Some(value) => present.insert(label.clone(), value),
                None => absent.push(label.clone()),
            }
        }

        if absent.is_empty() {
            complete.push(
                Detail::map()
                    .with("name", &node.name)
                    .with("gpu_labels", present)
                    .into(),
            );
        } else {
            missing.push(
                Detail::map()
                    .with("name", &node.name)
                    .with("missing_labels", absent)
                    .with("existing_gpu_labels", present)
                    .into(),
            );
        }
    }

    (complete, missing)
}

#[async_trait]
impl Probe for FeatureLabelProbe {
    fn name(&self) -> &str {
        names::FEATURE_LABELS
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let nodes = match fetch_nodes(gateway, self.name(), &self.accelerator_resource).await {
            Ok(nodes) => nodes,
            Err(result) => return result,
        };

        let (complete, missing) = classify(&nodes, &self.expected_labels);
        let complete_count = complete.len();
        let missing_count = missing.len();
        let detail = Detail::map()
            .with("nodes_with_complete_labels", complete)
            .with("nodes_with_missing_labels", missing);

        if missing_count > 0 {
            ProbeResult::failed(
                self.name(),
                format!(
                    "Found {} nodes with missing GPU feature labels",
                    missing_count
                ),
            )
            .with_detail(detail)
        } else if complete_count == 0 {
            ProbeResult::failed(self.name(), "No nodes with GPU feature labels found")
                .with_detail(detail)
        } else {
            ProbeResult::passed(
                self.name(),
                format!(
                    "Found {} nodes with proper GPU feature labels",
                    complete_count
                ),
            )
            .with_detail(detail)
        }
    }
}
