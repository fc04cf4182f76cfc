//! Drives one diagnostic workload through its lifecycle

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{WorkloadHandle, WorkloadPhase, WorkloadSettings, WorkloadSpec, WorkloadState};
use crate::gateway::{CommandGateway, CommandOutput, ResourceRef};
use crate::result::{Detail, DetailMap, ProbeResult};

static DRIVER_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Driver Version:\s*(\d+\.\d+(?:\.\d+)?)")
        .expect("Failed to compile driver version pattern")
});

static CUDA_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"CUDA Version:\s*(\d+\.\d+(?:\.\d+)?)")
        .expect("Failed to compile CUDA version pattern")
});

/// Ledger key of the per-node diagnostic result
pub fn workload_key(node: &str) -> String {
    format!("nvidia_smi_{}", node)
}

/// Ledger key of the teardown warning for a node
pub fn teardown_key(node: &str) -> String {
    format!("{}_teardown", workload_key(node))
}

/// What happened when the workload was removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReport {
    /// Creation failed, nothing to remove
    NotSubmitted,
    Deleted,
    /// The delete found no workload
    AlreadyDeleted,
    /// The delete call failed; the workload may have leaked
    Failed(String),
}

impl TeardownReport {
    /// Whether an operator should look at the cluster
    pub fn is_anomalous(&self) -> bool {
        matches!(self, TeardownReport::AlreadyDeleted | TeardownReport::Failed(_))
    }

    pub fn describe(&self) -> String {
        match self {
            TeardownReport::NotSubmitted => "not_submitted".to_string(),
            TeardownReport::Deleted => "deleted".to_string(),
            TeardownReport::AlreadyDeleted => "already_deleted".to_string(),
            TeardownReport::Failed(error) => format!("failed: {}", error),
        }
    }
}

/// Result of one manager run
#[derive(Debug, Clone)]
pub struct WorkloadOutcome {
    pub result: ProbeResult,
    pub teardown: TeardownReport,
    pub workload: String,
    pub namespace: String,
    pub poll_attempts: u32,
}

impl WorkloadOutcome {
    /// Separate warning entry for an anomalous teardown
    pub fn teardown_warning(&self, node: &str) -> Option<ProbeResult> {
        let message = match &self.teardown {
            TeardownReport::AlreadyDeleted => format!(
                "Diagnostic workload {}/{} was already gone at teardown",
                self.namespace, self.workload
            ),
            TeardownReport::Failed(_) => format!(
                "Diagnostic workload {}/{} could not be deleted and may still be running",
                self.namespace, self.workload
            ),
            TeardownReport::NotSubmitted | TeardownReport::Deleted => return None,
        };
        Some(
            ProbeResult::warning(teardown_key(node), message).with_detail(
                Detail::map()
                    .with("workload", &self.workload)
                    .with("namespace", &self.namespace)
                    .with("teardown", self.teardown.describe()),
            ),
        )
    }
}

/// How the exercise step ended
enum Exercise {
    Ran(CommandOutput),
    Cancelled,
    Panicked(String),
}

/// What polling observed
#[derive(Debug, Clone, Copy)]
struct PollSummary {
    attempts: u32,
    /// Phase seen by the last poll
    phase: WorkloadPhase,
    reached_running: bool,
    cancelled: bool,
}

impl Default for PollSummary {
    fn default() -> Self {
        Self {
            attempts: 0,
            phase: WorkloadPhase::Unknown,
            reached_running: false,
            cancelled: false,
        }
    }
}

/// Creates, polls, exercises and removes one diagnostic workload per run
pub struct WorkloadManager {
    gateway: Arc<dyn CommandGateway>,
    settings: WorkloadSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl WorkloadManager {
    pub fn new(gateway: Arc<dyn CommandGateway>, settings: WorkloadSettings) -> Self {
        Self {
            gateway,
            settings,
            shutdown: None,
        }
    }

    /// Stop polling and skip the exec once `shutdown` flips to true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Run the diagnostic on `node`
    pub async fn run(&self, node: &str) -> WorkloadOutcome {
        let now = Utc::now();
        let spec = WorkloadSpec::for_node(node, &self.settings, now);
        let mut handle = WorkloadHandle::new(spec, now);
        let target = handle.spec.resource_ref();
        let key = workload_key(node);

        let submitted = match handle.spec.to_manifest() {
            Ok(manifest) => self.gateway.create(&manifest).await.map_err(|e| e.diagnostic()),
            Err(e) => Err(format!("failed to build workload manifest: {}", e)),
        };
        if let Err(error) = submitted {
            warn!(node = %node, workload = %target, error = %error, "Failed to create diagnostic workload");
            handle.transition(WorkloadState::Done);
            let detail = base_detail(
                &handle,
                node,
                &PollSummary::default(),
                None,
                &TeardownReport::NotSubmitted,
            )
            .with("error", error);
            return WorkloadOutcome {
                result: ProbeResult::failed(
                    key,
                    format!("Failed to create diagnostic workload on node {}", node),
                )
                .with_detail(detail),
                teardown: TeardownReport::NotSubmitted,
                workload: handle.spec.name.clone(),
                namespace: handle.spec.namespace.clone(),
                poll_attempts: 0,
            };
        }
        handle.transition(WorkloadState::Submitted);
        info!(node = %node, workload = %target, "Diagnostic workload submitted");

        let mut poll = PollSummary::default();
        let exercise = AssertUnwindSafe(self.poll_and_exercise(&mut handle, &target, &mut poll))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Exercise::Panicked(panic_message(panic.as_ref())));

        handle.transition(WorkloadState::TearingDown);
        let teardown = self.teardown(&target).await;
        if !matches!(teardown, TeardownReport::Failed(_)) {
            handle.observed_phase = WorkloadPhase::Deleted;
        }
        handle.transition(WorkloadState::Done);

        let result = self.judge(&handle, node, &key, &poll, exercise, &teardown);
        info!(node = %node, status = %result.status, teardown = %teardown.describe(), "Workload diagnostic finished");

        WorkloadOutcome {
            result,
            teardown,
            workload: handle.spec.name.clone(),
            namespace: handle.spec.namespace.clone(),
            poll_attempts: poll.attempts,
        }
    }

    async fn poll_and_exercise(
        &self,
        handle: &mut WorkloadHandle,
        target: &ResourceRef,
        poll: &mut PollSummary,
    ) -> Exercise {
        handle.transition(WorkloadState::Polling);
        self.poll(handle, target, poll).await;
        if poll.cancelled {
            return Exercise::Cancelled;
        }

        handle.transition(WorkloadState::Ready);
        if !poll.reached_running {
            warn!(
                workload = %target,
                phase = %handle.observed_phase,
                attempts = poll.attempts,
                "Workload not running after polling, exercising anyway"
            );
        }

        handle.transition(WorkloadState::Exercising);
        Exercise::Ran(
            self.gateway
                .exec(target, &handle.spec.diagnostic_command)
                .await,
        )
    }

    async fn poll(&self, handle: &mut WorkloadHandle, target: &ResourceRef, poll: &mut PollSummary) {
        let query = target.query();
        let attempts = self.settings.poll_attempts.max(1);

        for attempt in 1..=attempts {
            if self.is_cancelled() {
                poll.cancelled = true;
                return;
            }

            poll.attempts = attempt;
            match self.gateway.get(&query).await {
                Ok(tree) => handle.observed_phase = WorkloadPhase::from_pod(&tree),
                Err(e) => {
                    debug!(workload = %target, error = %e, "Workload phase query failed");
                    handle.observed_phase = WorkloadPhase::Unknown;
                }
            }
            poll.phase = handle.observed_phase;

            if handle.observed_phase == WorkloadPhase::Running {
                poll.reached_running = true;
                return;
            }
            if handle.observed_phase.is_terminal() {
                debug!(workload = %target, phase = %handle.observed_phase, "Workload reached terminal phase");
                return;
            }

            if attempt < attempts {
                self.pause().await;
            }
        }

        poll.cancelled = self.is_cancelled();
    }

    /// Sleep one poll interval, waking early on shutdown
    async fn pause(&self) {
        let interval = self.settings.poll_interval;
        match self.shutdown.clone() {
            Some(mut rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = wait_for_shutdown(&mut rx) => {}
                }
            }
            None => tokio::time::sleep(interval).await,
        }
    }

    async fn teardown(&self, target: &ResourceRef) -> TeardownReport {
        match self.gateway.delete(target).await {
            Ok(()) => TeardownReport::Deleted,
            Err(e) if e.is_not_found() => {
                warn!(workload = %target, "Diagnostic workload already deleted");
                TeardownReport::AlreadyDeleted
            }
            Err(e) => {
                warn!(workload = %target, error = %e, "Failed to delete diagnostic workload");
                TeardownReport::Failed(e.diagnostic())
            }
        }
    }

    fn judge(
        &self,
        handle: &WorkloadHandle,
        node: &str,
        key: &str,
        poll: &PollSummary,
        exercise: Exercise,
        teardown: &TeardownReport,
    ) -> ProbeResult {
        let output = match exercise {
            Exercise::Cancelled => {
                return ProbeResult::failed(key, "cancelled")
                    .with_detail(base_detail(handle, node, poll, None, teardown));
            }
            Exercise::Panicked(message) => {
                return ProbeResult::failed(
                    key,
                    format!("Diagnostic on node {} aborted: {}", node, message),
                )
                .with_detail(base_detail(handle, node, poll, None, teardown));
            }
            Exercise::Ran(output) => output,
        };

        let mut detail = base_detail(handle, node, poll, Some(output.exit_status), teardown);

        let command = handle.spec.diagnostic_command.join(" ");
        let driver_version = DRIVER_VERSION
            .captures(&output.stdout)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        let failure = if !output.is_success() {
            Some(format!(
                "{} failed on node {} (exit status {})",
                command, node, output.exit_status
            ))
        } else if !output.stdout.contains(&self.settings.banner_token) {
            Some(format!(
                "{} output on node {} is missing {}",
                command, node, self.settings.banner_token
            ))
        } else if driver_version.is_none() {
            Some(format!(
                "{} output on node {} has no driver version",
                command, node
            ))
        } else {
            None
        };

        match (failure, driver_version) {
            (None, Some(driver_version)) => {
                let cuda_version = CUDA_VERSION
                    .captures(&output.stdout)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                let message = format!(
                    "{} succeeded on node {}, driver version {}",
                    command, node, driver_version
                );
                detail.insert("driver_version", driver_version);
                detail.insert("cuda_version", cuda_version);
                detail.insert("gpu_info", gpu_info_lines(&output.stdout));
                ProbeResult::passed(key, message).with_detail(detail)
            }
            (failure, _) => {
                detail.insert("stdout", output.stdout);
                detail.insert("stderr", output.stderr);
                ProbeResult::failed(
                    key,
                    failure.unwrap_or_else(|| format!("{} failed on node {}", command, node)),
                )
                .with_detail(detail)
            }
        }
    }
}

/// Detail keys present on every per-node result
fn base_detail(
    handle: &WorkloadHandle,
    node: &str,
    poll: &PollSummary,
    exit_status: Option<i32>,
    teardown: &TeardownReport,
) -> DetailMap {
    Detail::map()
        .with("workload", &handle.spec.name)
        .with("namespace", &handle.spec.namespace)
        .with("node", node)
        .with(
            "states",
            handle
                .trace()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        )
        .with("poll_attempts", poll.attempts)
        .with("phase_at_exec", poll.phase.to_string())
        .with("reached_running", poll.reached_running)
        .with("exit_status", exit_status)
        .with("teardown", teardown.describe())
}

/// Per-accelerator table rows of nvidia-smi output
fn gpu_info_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.contains('|') && line.contains('%') && line.contains("MiB"))
        .map(|line| line.trim().to_string())
        .collect()
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::gateway::{FakeGateway, GatewayCall, GatewayError, ResourceKind};
    use crate::result::ProbeStatus;
    use serde_json::json;

    const SMI_OUTPUT: &str = "\
+---------------------------------------------------------------------------------------+
| NVIDIA-SMI 535.104.05             Driver Version: 535.104.05   CUDA Version: 12.2     |
|-----------------------------------------+----------------------+----------------------+
| GPU  Name                 Persistence-M | Bus-Id        Disp.A | Volatile Uncorr. ECC |
| Fan  Temp   Perf          Pwr:Usage/Cap |         Memory-Usage | GPU-Util  Compute M. |
|=========================================+======================+======================|
|   0  NVIDIA A100-SXM4-40GB          On  | 00000000:00:04.0 Off |                    0 |
| N/A   34C    P0              43W / 400W |      4MiB / 40960MiB |      0%      Default |
+-----------------------------------------+----------------------+----------------------+
";

    fn settings() -> WorkloadSettings {
        WorkloadSettings {
            namespace: "gpu-validation".to_string(),
            poll_attempts: 3,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn fake_with_phase(phase: &str) -> Arc<FakeGateway> {
        let fake = Arc::new(FakeGateway::new());
        fake.respond_any_named(ResourceKind::POD, Ok(json!({"status": {"phase": phase}})));
        fake
    }

    fn manager(fake: &Arc<FakeGateway>) -> WorkloadManager {
        WorkloadManager::new(fake.clone(), settings())
    }

    fn detail_str<'a>(result: &'a ProbeResult, key: &str) -> Option<&'a str> {
        result.detail.get(key).and_then(Detail::as_str)
    }

    #[tokio::test]
    async fn test_diagnostic_passes_with_driver_version() {
        let fake = fake_with_phase("Running");
        fake.set_exec(CommandOutput::success(SMI_OUTPUT));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        let result = &outcome.result;

        assert_eq!(result.name, "nvidia_smi_gpu-worker-1");
        assert_eq!(result.status, ProbeStatus::Passed);
        assert_eq!(detail_str(result, "driver_version"), Some("535.104.05"));
        assert_eq!(detail_str(result, "cuda_version"), Some("12.2"));
        assert_eq!(
            result.detail.get("gpu_info").and_then(Detail::as_list).map(|l| l.len()),
            Some(1)
        );
        assert_eq!(result.detail.get("reached_running").and_then(Detail::as_bool), Some(true));
        assert_eq!(result.detail.get("poll_attempts").and_then(Detail::as_int), Some(1));
        assert_eq!(detail_str(result, "teardown"), Some("deleted"));
        assert_eq!(outcome.teardown, TeardownReport::Deleted);
        assert_eq!(fake.delete_count(), 1);
        assert!(outcome.teardown_warning("gpu-worker-1").is_none());

        let states: Vec<&str> = result
            .detail
            .get("states")
            .and_then(Detail::as_list)
            .unwrap()
            .iter()
            .filter_map(Detail::as_str)
            .collect();
        assert_eq!(
            states,
            vec!["CREATED", "SUBMITTED", "POLLING", "READY", "EXERCISING", "TEARING_DOWN", "DONE"]
        );
    }

    #[tokio::test]
    async fn test_exec_failure_still_deletes() {
        let fake = fake_with_phase("Running");
        fake.set_exec(CommandOutput::failure(
            1,
            "NVIDIA-SMI has failed because it couldn't communicate with the NVIDIA driver",
        ));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Failed);
        assert!(detail_str(&outcome.result, "stderr")
            .unwrap()
            .contains("couldn't communicate"));
        assert_eq!(outcome.result.detail.get("exit_status").and_then(Detail::as_int), Some(1));
        assert_eq!(fake.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_skips_teardown() {
        let fake = fake_with_phase("Running");
        fake.set_create(Err(GatewayError::Command {
            exit_status: 1,
            stderr: "pods is forbidden: exceeded quota".to_string(),
        }));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Failed);
        assert_eq!(outcome.teardown, TeardownReport::NotSubmitted);
        assert!(detail_str(&outcome.result, "error").unwrap().contains("exceeded quota"));
        assert_eq!(fake.delete_count(), 0);
        assert_eq!(fake.exec_count(), 0);
    }

    #[tokio::test]
    async fn test_already_deleted_is_anomaly_not_failure() {
        let fake = fake_with_phase("Running");
        fake.set_exec(CommandOutput::success(SMI_OUTPUT));
        fake.set_delete(Err(GatewayError::NotFound("pods/gpu-validation/x".to_string())));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Passed);
        assert_eq!(outcome.teardown, TeardownReport::AlreadyDeleted);
        assert_eq!(detail_str(&outcome.result, "teardown"), Some("already_deleted"));

        let warning = outcome.teardown_warning("gpu-worker-1").unwrap();
        assert_eq!(warning.status, ProbeStatus::Warning);
        assert_eq!(warning.name, "nvidia_smi_gpu-worker-1_teardown");
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_primary_status() {
        let fake = fake_with_phase("Running");
        fake.set_exec(CommandOutput::success(SMI_OUTPUT));
        fake.set_delete(Err(GatewayError::Timeout(Duration::from_secs(60))));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Passed);
        assert!(matches!(outcome.teardown, TeardownReport::Failed(_)));
        assert!(detail_str(&outcome.result, "teardown").unwrap().starts_with("failed: "));
        assert!(outcome.teardown.is_anomalous());
    }

    #[tokio::test]
    async fn test_panic_during_exec_still_tears_down() {
        let fake = fake_with_phase("Running");
        fake.set_panic_on_exec(true);

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Failed);
        assert!(outcome.result.message.contains("aborted"));
        assert_eq!(fake.delete_count(), 1);
        assert_eq!(outcome.teardown, TeardownReport::Deleted);
    }

    #[tokio::test]
    async fn test_polling_stops_once_running() {
        let fake = Arc::new(FakeGateway::new());
        fake.respond_any_named(ResourceKind::POD, Ok(json!({"status": {"phase": "Pending"}})));
        fake.respond_any_named(ResourceKind::POD, Ok(json!({"status": {"phase": "Pending"}})));
        fake.respond_any_named(ResourceKind::POD, Ok(json!({"status": {"phase": "Running"}})));
        fake.set_exec(CommandOutput::success(SMI_OUTPUT));

        let manager = WorkloadManager::new(
            fake.clone(),
            WorkloadSettings {
                poll_attempts: 10,
                ..settings()
            },
        );
        let outcome = manager.run("gpu-worker-1").await;

        assert_eq!(outcome.result.status, ProbeStatus::Passed);
        assert_eq!(outcome.poll_attempts, 3);
        assert_eq!(
            outcome.result.detail.get("reached_running").and_then(Detail::as_bool),
            Some(true)
        );
        let phase_queries = fake
            .calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::Get(q) if q.name.is_some()))
            .count();
        assert_eq!(phase_queries, 3);
    }

    #[tokio::test]
    async fn test_phase_query_error_counts_as_unknown_and_polling_continues() {
        let fake = Arc::new(FakeGateway::new());
        fake.respond_any_named(
            ResourceKind::POD,
            Err(GatewayError::Command {
                exit_status: 1,
                stderr: "Unable to connect to the server: EOF".to_string(),
            }),
        );
        fake.respond_any_named(ResourceKind::POD, Ok(json!({"status": {"phase": "Running"}})));
        fake.set_exec(CommandOutput::success(SMI_OUTPUT));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Passed);
        assert_eq!(outcome.poll_attempts, 2);
        assert_eq!(detail_str(&outcome.result, "phase_at_exec"), Some("Running"));
    }

    #[tokio::test]
    async fn test_phase_query_errors_throughout_leave_phase_unknown() {
        let fake = Arc::new(FakeGateway::new());
        fake.respond_any_named(
            ResourceKind::POD,
            Err(GatewayError::Timeout(Duration::from_secs(60))),
        );
        fake.set_exec(CommandOutput::failure(1, "container not found"));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.poll_attempts, 3);
        assert_eq!(detail_str(&outcome.result, "phase_at_exec"), Some("Unknown"));
        assert_eq!(
            outcome.result.detail.get("reached_running").and_then(Detail::as_bool),
            Some(false)
        );
        assert_eq!(fake.exec_count(), 1);
        assert_eq!(fake.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_panic_during_polling_still_tears_down() {
        let fake = fake_with_phase("Pending");
        fake.set_panic_on_named_get(true);

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Failed);
        assert!(outcome.result.message.contains("aborted"));
        assert_eq!(fake.exec_count(), 0);
        assert_eq!(fake.delete_count(), 1);
        assert_eq!(outcome.teardown, TeardownReport::Deleted);
    }

    #[tokio::test]
    async fn test_never_running_still_exercises() {
        let fake = fake_with_phase("Pending");
        fake.set_exec(CommandOutput::failure(1, "container not found"));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        let result = &outcome.result;
        assert_eq!(result.status, ProbeStatus::Failed);
        assert_eq!(outcome.poll_attempts, 3);
        assert_eq!(result.detail.get("reached_running").and_then(Detail::as_bool), Some(false));
        assert_eq!(detail_str(result, "phase_at_exec"), Some("Pending"));
        assert_eq!(fake.exec_count(), 1);
        assert_eq!(fake.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_terminal_phase_ends_polling() {
        let fake = fake_with_phase("Failed");

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.poll_attempts, 1);
        assert_eq!(detail_str(&outcome.result, "phase_at_exec"), Some("Failed"));
        assert_eq!(fake.exec_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_exec_and_tears_down() {
        let fake = fake_with_phase("Pending");
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let outcome = manager(&fake).with_shutdown(rx).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Failed);
        assert_eq!(outcome.result.message, "cancelled");
        assert_eq!(fake.exec_count(), 0);
        assert_eq!(fake.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_banner_fails() {
        let fake = fake_with_phase("Running");
        fake.set_exec(CommandOutput::success("Driver Version: 535.104.05\n"));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Failed);
        assert!(outcome.result.message.contains("NVIDIA-SMI"));
        assert!(detail_str(&outcome.result, "stdout").unwrap().contains("535.104.05"));
    }

    #[tokio::test]
    async fn test_missing_driver_version_fails() {
        let fake = fake_with_phase("Running");
        fake.set_exec(CommandOutput::success("NVIDIA-SMI has nothing to report\n"));

        let outcome = manager(&fake).run("gpu-worker-1").await;
        assert_eq!(outcome.result.status, ProbeStatus::Failed);
        assert!(outcome.result.message.contains("driver version"));
    }

    #[tokio::test]
    async fn test_submitted_workload_is_pinned_and_deleted_by_name() {
        let fake = fake_with_phase("Running");
        fake.set_exec(CommandOutput::success(SMI_OUTPUT));

        let outcome = manager(&fake).run("gpu-worker-1").await;

        let manifests = fake.created_manifests();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0]["metadata"]["name"], outcome.workload.as_str());
        assert_eq!(
            manifests[0]["spec"]["affinity"]["nodeAffinity"]
                ["requiredDuringSchedulingIgnoredDuringExecution"]["nodeSelectorTerms"][0]
                ["matchFields"][0]["values"][0],
            "gpu-worker-1"
        );

        let deleted: Vec<ResourceRef> = fake
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::Delete(target) => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec![ResourceRef::pod(&outcome.workload, "gpu-validation")]);
    }
}
