//! Kubernetes API gateway
//!
//! Talks to the API server directly through kube-rs instead of a CLI binary.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{
    Api, ApiResource, AttachParams, DeleteParams, DynamicObject, GroupVersionKind, ListParams,
    LogParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use gpuval_core::gateway::{
    CommandGateway, CommandOutput, GatewayError, ResourceKind, ResourceQuery, ResourceRef,
};

/// Gateway backed by a kube-rs client
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    request_timeout: Duration,
}

impl KubeGateway {
    /// Connect using an explicit kubeconfig, or the inferred config otherwise
    pub async fn connect(
        kubeconfig: Option<&Path>,
        context: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };

        let mut config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("Failed to read kubeconfig {:?}", path))?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .context("Failed to load kubeconfig")?
            }
            None if context.is_some() => Config::from_kubeconfig(&options)
                .await
                .context("Failed to load kubeconfig")?,
            None => Config::infer()
                .await
                .context("Failed to infer Kubernetes config")?,
        };
        config.connect_timeout = Some(request_timeout);
        config.read_timeout = Some(request_timeout);

        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
        info!("Kubernetes API client ready");

        Ok(Self::with_client(client, request_timeout))
    }

    pub fn with_client(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    fn dynamic_api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(kind.group, kind.version, kind.kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, kind.plural);
        match namespace {
            Some(namespace) if kind.namespaced => {
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    /// Apply the uniform per-call timeout
    async fn bounded<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(api_error),
            Err(_) => Err(GatewayError::Timeout(self.request_timeout)),
        }
    }
}

fn api_error(error: kube::Error) -> GatewayError {
    match error {
        kube::Error::Api(response) if response.code == 404 => {
            GatewayError::NotFound(response.message)
        }
        other => GatewayError::Api(other.to_string()),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Parse {
        reason: e.to_string(),
        raw: String::new(),
    })
}

/// Exit code carried by an exec status; -1 when the session ended without one
fn exit_code(status: Option<&Status>) -> i32 {
    let Some(status) = status else {
        return -1;
    };
    if status.status.as_deref() == Some("Success") {
        return 0;
    }
    status
        .details
        .as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|c| c.reason.as_deref() == Some("ExitCode"))
                .and_then(|c| c.message.as_ref())
                .and_then(|m| m.parse().ok())
        })
        .unwrap_or(1)
}

async fn read_stream(stream: Option<impl AsyncRead + Unpin>) -> String {
    let mut buffer = String::new();
    if let Some(mut stream) = stream {
        if let Err(e) = stream.read_to_string(&mut buffer).await {
            debug!(error = %e, "Exec stream closed with error");
        }
    }
    buffer
}

#[async_trait]
impl CommandGateway for KubeGateway {
    async fn execute(&self, args: &[String]) -> CommandOutput {
        CommandOutput::from_error(&GatewayError::Unsupported(format!(
            "raw command `{}` needs the cli backend",
            args.join(" ")
        )))
    }

    async fn create(&self, manifest: &serde_json::Value) -> Result<(), GatewayError> {
        if manifest.get("kind").and_then(|k| k.as_str()) != Some(ResourceKind::POD.kind) {
            return Err(GatewayError::Unsupported(
                "only Pod manifests can be created".to_string(),
            ));
        }
        let pod: Pod = serde_json::from_value(manifest.clone()).map_err(|e| GatewayError::Parse {
            reason: e.to_string(),
            raw: manifest.to_string(),
        })?;
        let api = self.pods(pod.metadata.namespace.as_deref());
        self.bounded(api.create(&PostParams::default(), &pod))
            .await
            .map(|_| ())
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), GatewayError> {
        let api = self.dynamic_api(target.kind, target.namespace.as_deref());
        self.bounded(api.delete(&target.name, &DeleteParams::default()))
            .await
            .map(|_| ())
    }

    async fn exec(&self, target: &ResourceRef, command: &[String]) -> CommandOutput {
        let api = self.pods(target.namespace.as_deref());
        let params = AttachParams::default().stdout(true).stderr(true).stdin(false);

        let run = async {
            let mut attached = self
                .bounded(api.exec(&target.name, command.to_vec(), &params))
                .await?;
            let status = attached.take_status();
            let (stdout, stderr) =
                tokio::join!(read_stream(attached.stdout()), read_stream(attached.stderr()));
            let status = match status {
                Some(status) => status.await,
                None => None,
            };
            Ok::<_, GatewayError>(CommandOutput {
                stdout,
                stderr,
                exit_status: exit_code(status.as_ref()),
            })
        };

        match tokio::time::timeout(self.request_timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => CommandOutput::from_error(&e),
            Err(_) => CommandOutput::from_error(&GatewayError::Timeout(self.request_timeout)),
        }
    }

    async fn get(&self, query: &ResourceQuery) -> Result<serde_json::Value, GatewayError> {
        let api = self.dynamic_api(query.kind, query.namespace.as_deref());
        match &query.name {
            Some(name) => {
                let object = self.bounded(api.get(name)).await?;
                encode(&object)
            }
            None => {
                let mut params = ListParams::default();
                if let Some(selector) = &query.label_selector {
                    params = params.labels(selector);
                }
                let list = self.bounded(api.list(&params)).await?;
                Ok(serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "List",
                    "items": encode(&list.items)?,
                }))
            }
        }
    }

    async fn logs(&self, target: &ResourceRef) -> CommandOutput {
        let api = self.pods(target.namespace.as_deref());
        match self.bounded(api.logs(&target.name, &LogParams::default())).await {
            Ok(logs) => CommandOutput::success(logs),
            Err(e) => CommandOutput::from_error(&e),
        }
    }

    async fn whoami(&self) -> CommandOutput {
        match self.bounded(self.client.apiserver_version()).await {
            Ok(info) => CommandOutput::success(format!(
                "{} (API server {})",
                self.client.default_namespace(),
                info.git_version
            )),
            Err(e) => CommandOutput::from_error(&e),
        }
    }
}
