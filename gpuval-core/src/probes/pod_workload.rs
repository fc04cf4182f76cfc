//! Validation of an existing GPU workload pod

use async_trait::async_trait;
use tracing::debug;

use super::{fetch, names, shape_failure, Probe};
use crate::gateway::{CommandGateway, ResourceKind, ResourceQuery, ResourceRef};
use crate::objects::{parse_object, quantity_string, PodView};
use crate::result::{Detail, ProbeResult};

/// Log fragments that indicate the workload could not use its accelerator
pub const DEFAULT_ERROR_SIGNATURES: &[&str] = &[
    "CUDA_ERROR_NOT_INITIALIZED",
    "CUDA_ERROR_NO_DEVICE",
    "Failed to initialize NVML",
    "no CUDA-capable device is detected",
    "NVIDIA-SMI has failed",
];

/// Checks a running pod holds an accelerator and logs no accelerator errors
#[derive(Debug, Clone)]
pub struct WorkloadProbe {
    pub namespace: String,
    pub pod: String,
    pub accelerator_resource: String,
    pub error_signatures: Vec<String>,
}

impl WorkloadProbe {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        accelerator_resource: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            accelerator_resource: accelerator_resource.into(),
            error_signatures: DEFAULT_ERROR_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[async_trait]
impl Probe for WorkloadProbe {
    fn name(&self) -> &str {
        names::WORKLOAD
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let query = ResourceQuery::named(ResourceKind::POD, &self.pod).in_namespace(&self.namespace);
        let tree = match fetch(gateway, self.name(), &query, || {
            format!(
                "Failed to get pod {} in namespace {}",
                self.pod, self.namespace
            )
        })
        .await
        {
            Ok(tree) => tree,
            Err(result) => return result,
        };

        let pod: PodView = match parse_object(&tree) {
            Ok(pod) => pod,
            Err(e) => return shape_failure(self.name(), e, &tree),
        };

        if pod.phase() != "Running" {
            return ProbeResult::failed(
                self.name(),
                format!("Pod {} is not running, status: {}", self.pod, pod.phase()),
            )
            .with_detail(Detail::map().with("reasons", pod.waiting_reasons()));
        }

        let resources = pod.spec.containers.first().map(|c| &c.resources);
        let limit = quantity_string(resources.and_then(|r| r.limits.get(&self.accelerator_resource)));
        let request =
            quantity_string(resources.and_then(|r| r.requests.get(&self.accelerator_resource)));

        if limit == "0" && request == "0" {
            return ProbeResult::failed(
                self.name(),
                format!("Pod {} does not request any GPUs", self.pod),
            );
        }

        let logs = gateway
            .logs(&ResourceRef::pod(&self.pod, &self.namespace))
            .await;
        if !logs.is_success() {
            return ProbeResult::warning(
                self.name(),
                format!("Pod {} has GPU resources but logs could not be read", self.pod),
            )
            .with_detail(
                Detail::map()
                    .with("gpu_limit", limit)
                    .with("gpu_request", request)
                    .with("log_error", logs.diagnostic()),
            );
        }

        let errors: Vec<&String> = self
            .error_signatures
            .iter()
            .filter(|signature| logs.stdout.contains(signature.as_str()))
            .collect();
        if !errors.is_empty() {
            debug!(pod = %self.pod, count = errors.len(), "Accelerator errors in workload logs");
            return ProbeResult::failed(
                self.name(),
                format!("Found GPU-related errors in pod {} logs", self.pod),
            )
            .with_detail(Detail::map().with("errors", errors));
        }

        ProbeResult::passed(
            self.name(),
            format!("Pod {} is running with GPU resources", self.pod),
        )
        .with_detail(
            Detail::map()
                .with("gpu_limit", limit)
                .with("gpu_request", request),
        )
    }
}
