//! GPU operator installation and pod probes

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{fetch, names, shape_failure, Probe};
use crate::gateway::{CommandGateway, ResourceKind, ResourceQuery, ResourceRef};
use crate::objects::{parse_items, Metadata, PodView};
use crate::result::{Detail, ProbeResult};

/// Checks that an operator install record matching `name_match` exists
#[derive(Debug, Clone)]
pub struct OperatorInstallProbe {
    pub namespace: String,
    /// Case-insensitive substring of the ClusterServiceVersion name
    pub name_match: String,
}

impl OperatorInstallProbe {
    pub fn new(namespace: impl Into<String>, name_match: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name_match: name_match.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvView {
    metadata: Metadata,
    spec: CsvSpecView,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvSpecView {
    version: Option<String>,
}

#[async_trait]
impl Probe for OperatorInstallProbe {
    fn name(&self) -> &str {
        names::OPERATOR_INSTALL
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let query =
            ResourceQuery::list(ResourceKind::CLUSTER_SERVICE_VERSION).in_namespace(&self.namespace);
        let tree = match fetch(gateway, self.name(), &query, || {
            format!(
                "Failed to get ClusterServiceVersions from {} namespace",
                self.namespace
            )
        })
        .await
        {
            Ok(tree) => tree,
            Err(result) => return result,
        };

        let csvs: Vec<CsvView> = match parse_items(&tree) {
            Ok(csvs) => csvs,
            Err(e) => return shape_failure(self.name(), e, &tree),
        };

        let needle = self.name_match.to_lowercase();
        let found = csvs.iter().find(|csv| {
            csv.metadata
                .name
                .as_deref()
                .map_or(false, |name| name.to_lowercase().contains(&needle))
        });

        match found {
            Some(csv) => {
                let name = csv.metadata.name_or_unknown();
                let version = csv.spec.version.clone().unwrap_or_else(|| "unknown".to_string());
                debug!(csv = %name, version = %version, "GPU operator found");
                ProbeResult::passed(
                    self.name(),
                    format!("GPU Operator installed, version: {}", version),
                )
                .with_detail(Detail::map().with("name", name).with("version", version))
            }
            None => ProbeResult::failed(
                self.name(),
                format!("GPU Operator not found in the {} namespace", self.namespace),
            )
            .with_detail(Detail::map().with(
                "installed",
                csvs.iter()
                    .map(|csv| csv.metadata.name_or_unknown())
                    .collect::<Vec<_>>(),
            )),
        }
    }
}

/// Checks that every pod in the operator namespace is running
#[derive(Debug, Clone)]
pub struct OperatorPodsProbe {
    pub namespace: String,
    pub label_selector: Option<String>,
}

impl OperatorPodsProbe {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }
}

/// Lines of pod log kept for crash-looping containers
const LOG_TAIL_LINES: usize = 20;

/// Completed validator jobs are not a problem
fn phase_is_healthy(phase: &str) -> bool {
    matches!(phase, "Running" | "Succeeded")
}

fn reason_hint(reason: &str) -> Option<&'static str> {
    match reason {
        "ImagePullBackOff" | "ErrImagePull" => {
            Some("image pull failing: maybe the NVIDIA registry is down")
        }
        "CrashLoopBackOff" => Some("container crash looping: review the operator logs"),
        _ => None,
    }
}

/// A running pod can still have a container stuck in a back-off loop
fn is_problematic(pod: &PodView) -> bool {
    !phase_is_healthy(pod.phase()) || pod.waiting_codes().any(|c| reason_hint(c).is_some())
}

fn log_tail(logs: &str, lines: usize) -> String {
    let all: Vec<&str> = logs.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

impl OperatorPodsProbe {
    async fn describe_problem(&self, gateway: &dyn CommandGateway, pod: &PodView) -> Detail {
        let name = pod.metadata.name_or_unknown();
        let mut entry = Detail::map()
            .with("name", &name)
            .with("phase", pod.phase())
            .with("reasons", pod.waiting_reasons());

        let codes: Vec<&str> = pod.waiting_codes().collect();
        let mut hints: Vec<&str> = codes.iter().filter_map(|c| reason_hint(c)).collect();
        hints.dedup();
        if !hints.is_empty() {
            entry.insert("hints", hints);
        }

        if codes.contains(&"CrashLoopBackOff") {
            let logs = gateway.logs(&ResourceRef::pod(&name, &self.namespace)).await;
            if logs.is_success() {
                entry.insert("logs", log_tail(&logs.stdout, LOG_TAIL_LINES));
            } else {
                debug!(pod = %name, "Could not read logs of crash-looping pod");
                entry.insert("log_error", logs.diagnostic().trim());
            }
        }

        entry.into()
    }
}

#[async_trait]
impl Probe for OperatorPodsProbe {
    fn name(&self) -> &str {
        names::OPERATOR_PODS
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let mut query = ResourceQuery::list(ResourceKind::POD).in_namespace(&self.namespace);
        if let Some(selector) = &self.label_selector {
            query = query.with_selector(selector);
        }

        let tree = match fetch(gateway, self.name(), &query, || {
            format!("Failed to get pods from {} namespace", self.namespace)
        })
        .await
        {
            Ok(tree) => tree,
            Err(result) => return result,
        };

        let pods: Vec<PodView> = match parse_items(&tree) {
            Ok(pods) => pods,
            Err(e) => return shape_failure(self.name(), e, &tree),
        };

        if pods.is_empty() {
            return ProbeResult::failed(
                self.name(),
                format!("No pods found in {} namespace", self.namespace),
            );
        }

        let mut problematic: Vec<Detail> = Vec::new();
        for pod in pods.iter().filter(|pod| is_problematic(pod)) {
            problematic.push(self.describe_problem(gateway, pod).await);
        }

        if problematic.is_empty() {
            ProbeResult::passed(
                self.name(),
                format!("All {} pods in {} namespace are running", pods.len(), self.namespace),
            )
            .with_detail(
                Detail::map().with(
                    "pods",
                    pods.iter()
                        .map(|pod| pod.metadata.name_or_unknown())
                        .collect::<Vec<_>>(),
                ),
            )
        } else {
            ProbeResult::failed(
                self.name(),
                format!("Found {} problematic pods", problematic.len()),
            )
            .with_detail(problematic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CommandOutput, FakeGateway, GatewayCall, GatewayError};
    use crate::result::ProbeStatus;
    use serde_json::json;

    const NS: &str = "nvidia-gpu-operator";

    #[tokio::test]
    async fn test_operator_installed_reports_version() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::CLUSTER_SERVICE_VERSION,
            Ok(json!({"items": [
                {"metadata": {"name": "nfd.4.14.0"}, "spec": {"version": "4.14.0"}},
                {"metadata": {"name": "gpu-operator-certified.v24.3.0"}, "spec": {"version": "24.3.0"}}
            ]})),
        );

        let result = OperatorInstallProbe::new(NS, "gpu-operator").evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Passed);
        assert_eq!(result.detail.get("version").and_then(Detail::as_str), Some("24.3.0"));
        assert_eq!(
            result.detail.get("name").and_then(Detail::as_str),
            Some("gpu-operator-certified.v24.3.0")
        );
    }

    #[tokio::test]
    async fn test_operator_missing() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::CLUSTER_SERVICE_VERSION,
            Ok(json!({"items": [{"metadata": {"name": "nfd.4.14.0"}}]})),
        );

        let result = OperatorInstallProbe::new(NS, "gpu-operator").evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert!(result.message.contains("not found"));
    }

    #[tokio::test]
    async fn test_operator_command_error_keeps_stderr() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::CLUSTER_SERVICE_VERSION,
            Err(GatewayError::Command {
                exit_status: 1,
                stderr: "namespaces \"nvidia-gpu-operator\" not found".to_string(),
            }),
        );

        let result = OperatorInstallProbe::new(NS, "gpu-operator").evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert!(result.message.contains(NS));
        assert!(result.detail.as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_operator_parse_error_keeps_raw_output() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::CLUSTER_SERVICE_VERSION,
            Err(GatewayError::Parse {
                reason: "expected value at line 1".to_string(),
                raw: "Invalid JSON".to_string(),
            }),
        );

        let result = OperatorInstallProbe::new(NS, "gpu-operator").evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert!(result.message.contains("parse"));
        assert_eq!(result.detail.as_str(), Some("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_pods_all_running() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::POD,
            Ok(json!({"items": [
                {"metadata": {"name": "gpu-operator-6b8f"}, "status": {"phase": "Running"}},
                {"metadata": {"name": "nvidia-cuda-validator-x2"}, "status": {"phase": "Succeeded"}}
            ]})),
        );

        let result = OperatorPodsProbe::new(NS).evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Passed);
        assert_eq!(result.detail.get("pods").and_then(Detail::as_list).map(|p| p.len()), Some(2));
    }

    #[tokio::test]
    async fn test_pods_some_failing() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::POD,
            Ok(json!({"items": [
                {"metadata": {"name": "gpu-operator-6b8f"}, "status": {"phase": "Running"}},
                {
                    "metadata": {"name": "nvidia-driver-daemonset-abc"},
                    "status": {
                        "phase": "Pending",
                        "containerStatuses": [{
                            "ready": false,
                            "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off restarting"}}
                        }]
                    }
                }
            ]})),
        );

        let result = OperatorPodsProbe::new(NS).evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        let problems = result.detail.as_list().unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(
            problems[0].get("name").and_then(Detail::as_str),
            Some("nvidia-driver-daemonset-abc")
        );
        let reasons = problems[0].get("reasons").and_then(Detail::as_list).unwrap();
        assert_eq!(reasons[0].as_str(), Some("CrashLoopBackOff: back-off restarting"));
    }

    fn crash_looping_pod(phase: &str) -> serde_json::Value {
        json!({
            "metadata": {"name": "gpu-operator-7c9d"},
            "status": {
                "phase": phase,
                "containerStatuses": [{
                    "ready": false,
                    "state": {"waiting": {"reason": "CrashLoopBackOff", "message": "back-off 5m0s"}}
                }]
            }
        })
    }

    #[tokio::test]
    async fn test_crash_looping_pod_includes_log_tail() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::POD,
            Ok(json!({"items": [crash_looping_pod("Running")]})),
        );
        let logs: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        fake.set_logs(CommandOutput::success(logs));

        let result = OperatorPodsProbe::new(NS).evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        let problems = result.detail.as_list().unwrap();
        assert_eq!(problems.len(), 1);

        let tail = problems[0].get("logs").and_then(Detail::as_str).unwrap();
        assert_eq!(tail.lines().count(), LOG_TAIL_LINES);
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 30"));

        let hints = problems[0].get("hints").and_then(Detail::as_list).unwrap();
        assert!(hints[0].as_str().unwrap().contains("operator logs"));

        assert!(fake.calls().iter().any(|call| matches!(
            call,
            GatewayCall::Logs(target) if target.name == "gpu-operator-7c9d"
                && target.namespace.as_deref() == Some(NS)
        )));
    }

    #[tokio::test]
    async fn test_crash_looping_pod_log_failure_is_kept() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::POD,
            Ok(json!({"items": [crash_looping_pod("Pending")]})),
        );
        fake.set_logs(CommandOutput::failure(1, "Error from server (BadRequest): container is waiting\n"));

        let result = OperatorPodsProbe::new(NS).evaluate(&fake).await;
        let problems = result.detail.as_list().unwrap();
        assert!(problems[0].get("logs").is_none());
        assert_eq!(
            problems[0].get("log_error").and_then(Detail::as_str),
            Some("Error from server (BadRequest): container is waiting")
        );
    }

    #[tokio::test]
    async fn test_image_pull_backoff_hint_without_logs() {
        let fake = FakeGateway::new();
        fake.respond_list(
            ResourceKind::POD,
            Ok(json!({"items": [{
                "metadata": {"name": "nvidia-device-plugin-q8"},
                "status": {
                    "phase": "Pending",
                    "containerStatuses": [{
                        "ready": false,
                        "state": {"waiting": {"reason": "ImagePullBackOff", "message": "Back-off pulling image"}}
                    }]
                }
            }]})),
        );

        let result = OperatorPodsProbe::new(NS).evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Failed);
        let problems = result.detail.as_list().unwrap();
        let hints = problems[0].get("hints").and_then(Detail::as_list).unwrap();
        assert_eq!(
            hints[0].as_str(),
            Some("image pull failing: maybe the NVIDIA registry is down")
        );
        assert!(problems[0].get("logs").is_none());
        assert!(!fake.calls().iter().any(|call| matches!(call, GatewayCall::Logs(_))));
    }

    #[test]
    fn test_log_tail_short_input() {
        assert_eq!(log_tail("a\nb", 20), "a\nb");
        assert_eq!(log_tail("", 20), "");
    }

    #[tokio::test]
    async fn test_pods_empty_namespace_fails() {
        let fake = FakeGateway::new();
        fake.respond_list(ResourceKind::POD, Ok(json!({"items": []})));

        let result = OperatorPodsProbe::new(NS).evaluate(&fake).await;
        assert_eq!(result.status, ProbeStatus::Failed);
    }

    #[tokio::test]
    async fn test_pods_selector_is_sent() {
        let fake = FakeGateway::new();
        fake.respond_list(ResourceKind::POD, Ok(json!({"items": []})));

        OperatorPodsProbe::new(NS)
            .with_selector("app=gpu-operator")
            .evaluate(&fake)
            .await;

        let calls = fake.calls();
        assert!(matches!(
            &calls[0],
            GatewayCall::Get(q) if q.label_selector.as_deref() == Some("app=gpu-operator")
        ));
    }
}
