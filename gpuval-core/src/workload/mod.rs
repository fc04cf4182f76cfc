//! Ephemeral diagnostic workloads
//!
//! A workload is a single-container pod pinned to one node that requests an
//! accelerator, sleeps, and lets the manager exec a diagnostic command in it.
//!
//! Lifecycle:
//! CREATED → SUBMITTED → POLLING → READY → EXERCISING → TEARING_DOWN → DONE
//!
//! - CREATED → DONE: submission failed, nothing to remove
//! - POLLING → READY: phase is Running, terminal, or the poll budget is spent
//! - POLLING → TEARING_DOWN: run cancelled
//! - any state after SUBMITTED reaches TEARING_DOWN exactly once

mod manager;

pub use manager::{teardown_key, workload_key, TeardownReport, WorkloadManager, WorkloadOutcome};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{
    Affinity, Container, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    Pod, PodSpec, ResourceRequirements, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use tracing::debug;

use crate::gateway::ResourceRef;
use crate::inventory::DEFAULT_ACCELERATOR_RESOURCE;
use crate::objects::{parse_object, PodView};

/// Longest DNS-1123 label
const MAX_NAME_LEN: usize = 63;

const NAME_PREFIX: &str = "gpu-diag";

/// Label marking workloads created by this tool
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label naming the node a workload is pinned to
pub const TARGET_NODE_LABEL: &str = "gpuval.io/target-node";

/// How diagnostic workloads are built and driven
#[derive(Debug, Clone)]
pub struct WorkloadSettings {
    pub namespace: String,
    pub image: String,
    /// Keeps the container alive while the diagnostic runs
    pub entry_command: Vec<String>,
    pub diagnostic_command: Vec<String>,
    pub accelerator_resource: String,
    /// Units requested and limited; at least 1
    pub accelerator_count: u32,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub tolerate_accelerator_taint: bool,
    /// Token the diagnostic output must contain to pass
    pub banner_token: String,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "nvidia/cuda:11.8.0-base-ubuntu22.04".to_string(),
            entry_command: vec!["sleep".to_string(), "infinity".to_string()],
            diagnostic_command: vec!["nvidia-smi".to_string()],
            accelerator_resource: DEFAULT_ACCELERATOR_RESOURCE.to_string(),
            accelerator_count: 1,
            poll_attempts: 30,
            poll_interval: Duration::from_secs(1),
            tolerate_accelerator_taint: false,
            banner_token: "NVIDIA-SMI".to_string(),
        }
    }
}

/// Lowercase alphanumerics and `-`, no leading or trailing `-`
fn dns_label(raw: &str, max_len: usize) -> String {
    let mut label: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    label.truncate(max_len);
    label.trim_matches('-').to_string()
}

/// 32-bit FNV-1a over the full node name
fn name_digest(node: &str) -> u32 {
    node.bytes().fold(0x811c_9dc5, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Description of one diagnostic workload
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub name: String,
    pub target_node: Option<String>,
    pub namespace: String,
    pub image: String,
    pub entry_command: Vec<String>,
    pub diagnostic_command: Vec<String>,
    pub accelerator_resource: String,
    pub accelerator_count: u32,
    pub tolerate_accelerator_taint: bool,
}

impl WorkloadSpec {
    /// Spec pinned to `node`, named from the node's short name, a digest of
    /// the full node name, and `now`
    pub fn for_node(node: &str, settings: &WorkloadSettings, now: DateTime<Utc>) -> Self {
        let stamp = now.format("%Y%m%d%H%M%S").to_string();
        let digest = format!("{:08x}", name_digest(node));
        let budget = MAX_NAME_LEN - NAME_PREFIX.len() - digest.len() - stamp.len() - 3;
        let short = node.split('.').next().unwrap_or(node);
        let mut short = dns_label(short, budget);
        if short.is_empty() {
            short = "node".to_string();
        }

        Self {
            name: format!("{}-{}-{}-{}", NAME_PREFIX, short, digest, stamp),
            target_node: Some(node.to_string()),
            namespace: settings.namespace.clone(),
            image: settings.image.clone(),
            entry_command: settings.entry_command.clone(),
            diagnostic_command: settings.diagnostic_command.clone(),
            accelerator_resource: settings.accelerator_resource.clone(),
            accelerator_count: settings.accelerator_count.max(1),
            tolerate_accelerator_taint: settings.tolerate_accelerator_taint,
        }
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::pod(&self.name, &self.namespace)
    }

    /// Typed pod object for this spec
    pub fn to_pod(&self) -> Pod {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), "gpuval".to_string());
        if let Some(node) = &self.target_node {
            labels.insert(TARGET_NODE_LABEL.to_string(), dns_label(node, MAX_NAME_LEN));
        }

        let quantity = BTreeMap::from([(
            self.accelerator_resource.clone(),
            Quantity(self.accelerator_count.max(1).to_string()),
        )]);

        let affinity = self.target_node.as_ref().map(|node| Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_fields: Some(vec![NodeSelectorRequirement {
                            key: "metadata.name".to_string(),
                            operator: "In".to_string(),
                            values: Some(vec![node.clone()]),
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let tolerations = self.tolerate_accelerator_taint.then(|| {
            vec![Toleration {
                key: Some(self.accelerator_resource.clone()),
                operator: Some("Exists".to_string()),
                effect: Some("NoSchedule".to_string()),
                ..Default::default()
            }]
        });

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "diagnostic".to_string(),
                    image: Some(self.image.clone()),
                    command: Some(self.entry_command.clone()),
                    resources: Some(ResourceRequirements {
                        limits: Some(quantity.clone()),
                        requests: Some(quantity),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                affinity,
                tolerations,
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Pod manifest as submitted through the gateway
    pub fn to_manifest(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self.to_pod())
    }
}

/// Workload phase as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkloadPhase {
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
    Terminating,
    Deleted,
}

impl WorkloadPhase {
    /// Phase of a pod object; a deletion timestamp wins over `status.phase`
    pub fn from_pod(tree: &serde_json::Value) -> Self {
        let Ok(pod) = parse_object::<PodView>(tree) else {
            return WorkloadPhase::Unknown;
        };
        if pod.metadata.deletion_timestamp.is_some() {
            return WorkloadPhase::Terminating;
        }
        match pod.phase() {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }

    /// Phases the pod can no longer leave
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkloadPhase::Succeeded | WorkloadPhase::Failed | WorkloadPhase::Deleted
        )
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkloadPhase::Unknown => "Unknown",
            WorkloadPhase::Pending => "Pending",
            WorkloadPhase::Running => "Running",
            WorkloadPhase::Succeeded => "Succeeded",
            WorkloadPhase::Failed => "Failed",
            WorkloadPhase::Terminating => "Terminating",
            WorkloadPhase::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// Manager lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkloadState {
    Created,
    Submitted,
    Polling,
    Ready,
    Exercising,
    TearingDown,
    Done,
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadState::Created => write!(f, "CREATED"),
            WorkloadState::Submitted => write!(f, "SUBMITTED"),
            WorkloadState::Polling => write!(f, "POLLING"),
            WorkloadState::Ready => write!(f, "READY"),
            WorkloadState::Exercising => write!(f, "EXERCISING"),
            WorkloadState::TearingDown => write!(f, "TEARING_DOWN"),
            WorkloadState::Done => write!(f, "DONE"),
        }
    }
}

/// A workload owned by one manager run
#[derive(Debug, Clone)]
pub struct WorkloadHandle {
    pub spec: WorkloadSpec,
    pub observed_phase: WorkloadPhase,
    pub creation_time: DateTime<Utc>,
    state: WorkloadState,
    trace: Vec<WorkloadState>,
}

impl WorkloadHandle {
    pub fn new(spec: WorkloadSpec, creation_time: DateTime<Utc>) -> Self {
        Self {
            spec,
            observed_phase: WorkloadPhase::Unknown,
            creation_time,
            state: WorkloadState::Created,
            trace: vec![WorkloadState::Created],
        }
    }

    /// Every state visited so far, in order
    pub fn trace(&self) -> &[WorkloadState] {
        &self.trace
    }

    pub(crate) fn transition(&mut self, next: WorkloadState) {
        debug!(
            workload = %self.spec.name,
            from = %self.state,
            to = %next,
            "Workload state transition"
        );
        self.state = next;
        self.trace.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_name_is_short_node_digest_and_timestamp() {
        let spec = WorkloadSpec::for_node(
            "ip-10-0-1-23.ec2.internal",
            &WorkloadSettings::default(),
            now(),
        );
        let digest = format!("{:08x}", name_digest("ip-10-0-1-23.ec2.internal"));
        assert_eq!(
            spec.name,
            format!("gpu-diag-ip-10-0-1-23-{}-20240517093000", digest)
        );
        assert_eq!(spec.target_node.as_deref(), Some("ip-10-0-1-23.ec2.internal"));
    }

    #[test]
    fn test_name_digest_is_fnv1a() {
        assert_eq!(name_digest(""), 0x811c_9dc5);
        assert_eq!(name_digest("a"), 0xe40c_292c);
    }

    #[test]
    fn test_names_differ_for_nodes_sharing_short_name() {
        let settings = WorkloadSettings::default();
        let a = WorkloadSpec::for_node("worker-1.zone-a.example.com", &settings, now());
        let b = WorkloadSpec::for_node("worker-1.zone-b.example.com", &settings, now());
        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with("gpu-diag-worker-1-"));
        assert!(b.name.starts_with("gpu-diag-worker-1-"));
    }

    #[test]
    fn test_names_differ_for_long_nodes_sharing_prefix() {
        let settings = WorkloadSettings::default();
        let prefix = "gpu-worker-".repeat(6);
        let a = WorkloadSpec::for_node(&format!("{}a", prefix), &settings, now());
        let b = WorkloadSpec::for_node(&format!("{}b", prefix), &settings, now());
        assert_ne!(a.name, b.name);
        assert!(a.name.len() <= MAX_NAME_LEN);
        assert!(b.name.len() <= MAX_NAME_LEN);
    }

    #[test]
    fn test_name_is_dns_safe_and_bounded() {
        let node = format!("GPU_Worker_{}", "x".repeat(80));
        let spec = WorkloadSpec::for_node(&node, &WorkloadSettings::default(), now());
        assert!(spec.name.len() <= MAX_NAME_LEN);
        assert!(spec
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert!(!spec.name.contains("--"));
    }

    #[test]
    fn test_accelerator_count_at_least_one() {
        let settings = WorkloadSettings {
            accelerator_count: 0,
            ..Default::default()
        };
        let spec = WorkloadSpec::for_node("worker-1", &settings, now());
        assert_eq!(spec.accelerator_count, 1);
    }

    #[test]
    fn test_manifest_pins_and_requests_accelerator() {
        let settings = WorkloadSettings {
            namespace: "gpu-validation".to_string(),
            tolerate_accelerator_taint: true,
            ..Default::default()
        };
        let manifest = WorkloadSpec::for_node("worker-1", &settings, now())
            .to_manifest()
            .unwrap();

        assert_eq!(manifest["kind"], "Pod");
        assert_eq!(manifest["apiVersion"], "v1");
        assert_eq!(manifest["metadata"]["namespace"], "gpu-validation");
        assert_eq!(manifest["metadata"]["labels"][MANAGED_BY_LABEL], "gpuval");

        let spec = &manifest["spec"];
        assert_eq!(spec["restartPolicy"], "Never");
        let container = &spec["containers"][0];
        assert_eq!(container["image"], "nvidia/cuda:11.8.0-base-ubuntu22.04");
        assert_eq!(container["command"][0], "sleep");
        assert_eq!(container["resources"]["limits"]["nvidia.com/gpu"], "1");
        assert_eq!(container["resources"]["requests"]["nvidia.com/gpu"], "1");

        let term = &spec["affinity"]["nodeAffinity"]["requiredDuringSchedulingIgnoredDuringExecution"]
            ["nodeSelectorTerms"][0]["matchFields"][0];
        assert_eq!(term["key"], "metadata.name");
        assert_eq!(term["operator"], "In");
        assert_eq!(term["values"][0], "worker-1");

        assert_eq!(spec["tolerations"][0]["key"], "nvidia.com/gpu");
    }

    #[test]
    fn test_manifest_without_toleration() {
        let manifest = WorkloadSpec::for_node("worker-1", &WorkloadSettings::default(), now())
            .to_manifest()
            .unwrap();
        assert!(manifest["spec"].get("tolerations").is_none());
    }

    #[test]
    fn test_phase_from_pod() {
        use serde_json::json;

        assert_eq!(
            WorkloadPhase::from_pod(&json!({"status": {"phase": "Running"}})),
            WorkloadPhase::Running
        );
        assert_eq!(
            WorkloadPhase::from_pod(&json!({
                "metadata": {"deletionTimestamp": "2024-05-17T09:31:00Z"},
                "status": {"phase": "Running"}
            })),
            WorkloadPhase::Terminating
        );
        assert_eq!(WorkloadPhase::from_pod(&json!({})), WorkloadPhase::Unknown);
        assert!(WorkloadPhase::Failed.is_terminal());
        assert!(!WorkloadPhase::Pending.is_terminal());
    }

    #[test]
    fn test_handle_trace() {
        let spec = WorkloadSpec::for_node("worker-1", &WorkloadSettings::default(), now());
        let mut handle = WorkloadHandle::new(spec, now());

        handle.transition(WorkloadState::Submitted);
        handle.transition(WorkloadState::Polling);
        assert_eq!(
            handle.trace(),
            &[
                WorkloadState::Created,
                WorkloadState::Submitted,
                WorkloadState::Polling
            ]
        );
    }
}
