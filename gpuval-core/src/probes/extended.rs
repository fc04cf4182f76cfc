//! Operator custom resource probes
//!
//! Both are opt-in and only meaningful on clusters running the NFD and GPU
//! operators from the operator catalog.

use async_trait::async_trait;
use serde::Deserialize;

use super::{fetch, names, shape_failure, Probe};
use crate::gateway::{CommandGateway, ResourceKind, ResourceQuery};
use crate::objects::{parse_items, Metadata};
use crate::result::{Detail, ProbeResult};

/// Default namespace of the node feature discovery operator
pub const DEFAULT_NFD_NAMESPACE: &str = "openshift-nfd";

/// Checks a NodeFeatureDiscovery instance exists
#[derive(Debug, Clone)]
pub struct NfdInstanceProbe {
    pub namespace: String,
}

impl NfdInstanceProbe {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl Default for NfdInstanceProbe {
    fn default() -> Self {
        Self::new(DEFAULT_NFD_NAMESPACE)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamedView {
    metadata: Metadata,
}

#[async_trait]
impl Probe for NfdInstanceProbe {
    fn name(&self) -> &str {
        names::NFD_INSTANCE
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let query = ResourceQuery::list(ResourceKind::NODE_FEATURE_DISCOVERY)
            .in_namespace(&self.namespace);
        let tree = match fetch(gateway, self.name(), &query, || {
            format!(
                "Failed to get NodeFeatureDiscovery instances from {} namespace",
                self.namespace
            )
        })
        .await
        {
            Ok(tree) => tree,
            Err(result) => return result,
        };

        let instances: Vec<NamedView> = match parse_items(&tree) {
            Ok(instances) => instances,
            Err(e) => return shape_failure(self.name(), e, &tree),
        };

        if instances.is_empty() {
            return ProbeResult::failed(
                self.name(),
                format!("No NodeFeatureDiscovery instance in {} namespace", self.namespace),
            );
        }

        let names: Vec<String> = instances
            .iter()
            .map(|i| i.metadata.name_or_unknown())
            .collect();
        ProbeResult::passed(
            self.name(),
            format!("Found {} NodeFeatureDiscovery instance(s)", names.len()),
        )
        .with_detail(Detail::map().with("instances", names))
    }
}

/// Checks every GPU operator ClusterPolicy reports `ready`
#[derive(Debug, Clone, Default)]
pub struct ClusterPolicyProbe;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClusterPolicyView {
    metadata: Metadata,
    status: ClusterPolicyStatusView,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClusterPolicyStatusView {
    state: Option<String>,
    conditions: Vec<ConditionView>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConditionView {
    #[serde(rename = "type")]
    type_: String,
    status: String,
    message: Option<String>,
}

impl ClusterPolicyView {
    fn state(&self) -> &str {
        self.status.state.as_deref().unwrap_or("unknown")
    }

    /// Message of a `Ready=False` condition
    fn not_ready_message(&self) -> Option<String> {
        self.status
            .conditions
            .iter()
            .find(|c| c.type_ == "Ready" && c.status == "False")
            .and_then(|c| c.message.clone())
    }
}

#[async_trait]
impl Probe for ClusterPolicyProbe {
    fn name(&self) -> &str {
        names::CLUSTER_POLICY
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let query = ResourceQuery::list(ResourceKind::CLUSTER_POLICY);
        let tree = match fetch(gateway, self.name(), &query, || {
            "Failed to get ClusterPolicy instances (is the ClusterPolicy CRD installed?)".to_string()
        })
        .await
        {
            Ok(tree) => tree,
            Err(result) => return result,
        };

        let policies: Vec<ClusterPolicyView> = match parse_items(&tree) {
            Ok(policies) => policies,
            Err(e) => return shape_failure(self.name(), e, &tree),
        };

        if policies.is_empty() {
            return ProbeResult::failed(self.name(), "No ClusterPolicy instances found");
        }

        let mut not_ready = 0;
        let entries: Vec<Detail> = policies
            .iter()
            .map(|policy| {
                let mut entry = Detail::map()
                    .with("name", policy.metadata.name_or_unknown())
                    .with("state", policy.state());
                if policy.state() != "ready" {
                    not_ready += 1;
                    entry.insert("message", policy.not_ready_message());
                }
                Detail::from(entry)
            })
            .collect();

        if not_ready > 0 {
            ProbeResult::failed(
                self.name(),
                format!("{} of {} ClusterPolicy instance(s) not ready", not_ready, policies.len()),
            )
            .with_detail(entries)
        } else {
            ProbeResult::passed(
                self.name(),
                format!("All {} ClusterPolicy instance(s) ready", policies.len()),
            )
            .with_detail(entries)
        }
    }
}
