//! Subprocess gateway driving `oc` or `kubectl`

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use gpuval_core::gateway::{
    CommandGateway, CommandOutput, GatewayError, ResourceQuery, ResourceRef,
};

/// Settings for [`CliGateway`]
#[derive(Debug, Clone)]
pub struct CliGatewayConfig {
    /// `oc`, `kubectl`, or a path to either
    pub binary: String,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    /// Upper bound for every invocation
    pub command_timeout: Duration,
}

impl Default for CliGatewayConfig {
    fn default() -> Self {
        Self {
            binary: "oc".to_string(),
            kubeconfig: None,
            context: None,
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Gateway that shells out to the cluster CLI
#[derive(Debug, Clone)]
pub struct CliGateway {
    config: CliGatewayConfig,
}

impl CliGateway {
    pub fn new(config: CliGatewayConfig) -> Self {
        Self { config }
    }

    /// Whether the binary is the OpenShift client
    fn is_oc(&self) -> bool {
        std::path::Path::new(&self.config.binary)
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name == "oc" || name == "oc.exe")
    }

    /// Connection flags prepended to every invocation
    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.config.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.config.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args
    }

    fn whoami_args(&self) -> Vec<String> {
        if self.is_oc() {
            vec!["whoami".to_string()]
        } else {
            vec![
                "auth".to_string(),
                "whoami".to_string(),
                "-o".to_string(),
                "jsonpath={.status.userInfo.username}".to_string(),
            ]
        }
    }

    async fn spawn(&self, args: &[String], stdin: Option<Vec<u8>>) -> Result<CommandOutput, GatewayError> {
        let mut command = Command::new(&self.config.binary);
        command
            .args(self.global_args())
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(binary = %self.config.binary, args = ?args, "Running cluster CLI");

        let mut child = command
            .spawn()
            .map_err(|e| GatewayError::Spawn(format!("{}: {}", self.config.binary, e)))?;

        let run = async move {
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(&input).await?;
                pipe.shutdown().await?;
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(self.config.command_timeout, run).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_status: output.status.code().unwrap_or(-1),
            }),
            Ok(Err(e)) => Err(GatewayError::Spawn(e.to_string())),
            Err(_) => {
                warn!(args = ?args, timeout = ?self.config.command_timeout, "Cluster CLI timed out");
                Err(GatewayError::Timeout(self.config.command_timeout))
            }
        }
    }

    /// Run and return the output whatever the exit status
    async fn output(&self, args: &[String], stdin: Option<Vec<u8>>) -> CommandOutput {
        self.spawn(args, stdin)
            .await
            .unwrap_or_else(|e| CommandOutput::from_error(&e))
    }

    /// Run and require exit status 0
    async fn checked(&self, args: &[String], stdin: Option<Vec<u8>>) -> Result<CommandOutput, GatewayError> {
        let output = self.spawn(args, stdin).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(command_error(&output))
        }
    }
}

/// Classify a non-zero exit
pub(crate) fn command_error(output: &CommandOutput) -> GatewayError {
    if output.stderr.contains("(NotFound)") {
        GatewayError::NotFound(output.stderr.trim().to_string())
    } else {
        GatewayError::Command {
            exit_status: output.exit_status,
            stderr: output.stderr.clone(),
        }
    }
}

fn namespace_args(args: &mut Vec<String>, namespace: Option<&str>) {
    if let Some(namespace) = namespace {
        args.push("-n".to_string());
        args.push(namespace.to_string());
    }
}

pub(crate) fn get_args(query: &ResourceQuery) -> Vec<String> {
    let mut args = vec!["get".to_string(), query.kind.cli_name()];
    if let Some(name) = &query.name {
        args.push(name.clone());
    }
    if query.kind.namespaced {
        namespace_args(&mut args, query.namespace.as_deref());
    }
    if let Some(selector) = &query.label_selector {
        args.push("-l".to_string());
        args.push(selector.clone());
    }
    args.push("-o".to_string());
    args.push("json".to_string());
    args
}

pub(crate) fn delete_args(target: &ResourceRef) -> Vec<String> {
    let mut args = vec!["delete".to_string(), target.kind.cli_name(), target.name.clone()];
    namespace_args(&mut args, target.namespace.as_deref());
    args.push("--wait=false".to_string());
    args
}

pub(crate) fn exec_args(target: &ResourceRef, command: &[String]) -> Vec<String> {
    let mut args = vec!["exec".to_string(), target.name.clone()];
    namespace_args(&mut args, target.namespace.as_deref());
    args.push("--".to_string());
    args.extend(command.iter().cloned());
    args
}

pub(crate) fn logs_args(target: &ResourceRef) -> Vec<String> {
    let mut args = vec!["logs".to_string(), target.name.clone()];
    namespace_args(&mut args, target.namespace.as_deref());
    args
}

#[async_trait]
impl CommandGateway for CliGateway {
    async fn execute(&self, args: &[String]) -> CommandOutput {
        self.output(args, None).await
    }

    async fn create(&self, manifest: &serde_json::Value) -> Result<(), GatewayError> {
        let body = serde_json::to_vec(manifest).map_err(|e| GatewayError::Parse {
            reason: e.to_string(),
            raw: manifest.to_string(),
        })?;
        let args = vec!["create".to_string(), "-f".to_string(), "-".to_string()];
        self.checked(&args, Some(body)).await.map(|_| ())
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), GatewayError> {
        self.checked(&delete_args(target), None).await.map(|_| ())
    }

    async fn exec(&self, target: &ResourceRef, command: &[String]) -> CommandOutput {
        self.output(&exec_args(target, command), None).await
    }

    async fn get(&self, query: &ResourceQuery) -> Result<serde_json::Value, GatewayError> {
        let output = self.checked(&get_args(query), None).await?;
        serde_json::from_str(&output.stdout).map_err(|e| GatewayError::Parse {
            reason: e.to_string(),
            raw: output.stdout,
        })
    }

    async fn logs(&self, target: &ResourceRef) -> CommandOutput {
        self.output(&logs_args(target), None).await
    }

    async fn whoami(&self) -> CommandOutput {
        self.output(&self.whoami_args(), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuval_core::gateway::ResourceKind;

    fn gateway(binary: &str) -> CliGateway {
        CliGateway::new(CliGatewayConfig {
            binary: binary.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_get_args() {
        let query = ResourceQuery::list(ResourceKind::POD)
            .in_namespace("nvidia-gpu-operator")
            .with_selector("app=nvidia-driver-daemonset");
        assert_eq!(
            get_args(&query),
            vec![
                "get",
                "pods",
                "-n",
                "nvidia-gpu-operator",
                "-l",
                "app=nvidia-driver-daemonset",
                "-o",
                "json"
            ]
        );

        let csv = ResourceQuery::list(ResourceKind::CLUSTER_SERVICE_VERSION).in_namespace("ns");
        assert_eq!(get_args(&csv)[1], "clusterserviceversions.operators.coreos.com");

        // Cluster-scoped kinds ignore a namespace
        let nodes = ResourceQuery::list(ResourceKind::NODE).in_namespace("ignored");
        assert_eq!(get_args(&nodes), vec!["get", "nodes", "-o", "json"]);
    }

    #[test]
    fn test_workload_args() {
        let target = ResourceRef::pod("gpu-diag-worker-1-20240517093000", "gpu-validation");
        assert_eq!(
            exec_args(&target, &["nvidia-smi".to_string()]),
            vec![
                "exec",
                "gpu-diag-worker-1-20240517093000",
                "-n",
                "gpu-validation",
                "--",
                "nvidia-smi"
            ]
        );
        assert_eq!(
            delete_args(&target),
            vec![
                "delete",
                "pods",
                "gpu-diag-worker-1-20240517093000",
                "-n",
                "gpu-validation",
                "--wait=false"
            ]
        );
        assert_eq!(logs_args(&target)[0], "logs");
    }

    #[test]
    fn test_global_args() {
        let kubectl = CliGateway::new(CliGatewayConfig {
            binary: "/usr/local/bin/kubectl".to_string(),
            kubeconfig: Some(PathBuf::from("/tmp/kubeconfig")),
            context: Some("lab".to_string()),
            ..Default::default()
        });
        assert_eq!(
            kubectl.global_args(),
            vec!["--kubeconfig", "/tmp/kubeconfig", "--context", "lab"]
        );
        assert_eq!(kubectl.whoami_args()[0], "auth");
        assert_eq!(gateway("/usr/bin/oc").whoami_args(), vec!["whoami"]);
    }

    #[test]
    fn test_command_error_classification() {
        let missing = CommandOutput::failure(
            1,
            "Error from server (NotFound): pods \"gpu-diag-x\" not found\n",
        );
        assert!(command_error(&missing).is_not_found());

        let denied = CommandOutput::failure(1, "Error from server (Forbidden): nodes is forbidden");
        assert!(matches!(
            command_error(&denied),
            GatewayError::Command { exit_status: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_execute_runs_binary() {
        let output = gateway("echo").execute(&["hello".to_string()]).await;
        assert!(output.is_success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_value() {
        let gateway = gateway("/nonexistent/gpuval-test-oc");
        let output = gateway.whoami().await;
        assert!(!output.is_success());
        assert_eq!(output.exit_status, -1);

        let err = gateway
            .get(&ResourceQuery::list(ResourceKind::NODE))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_non_json_output_is_parse_error() {
        // `echo get nodes -o json` exits 0 with plain text
        let err = gateway("echo")
            .get(&ResourceQuery::list(ResourceKind::NODE))
            .await
            .unwrap_err();
        match err {
            GatewayError::Parse { raw, .. } => assert_eq!(raw.trim(), "get nodes -o json"),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
