//! Driver daemon-set readiness probe

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{fetch, names, shape_failure, Probe};
use crate::gateway::{CommandGateway, ResourceKind, ResourceQuery};
use crate::objects::{parse_items, Metadata};
use crate::result::{Detail, ProbeResult};

/// Default daemon-set name fragment for the driver rollout
pub const DEFAULT_DRIVER_MATCH: &str = "nvidia-driver";

/// Checks the driver daemon set exists and is fully rolled out
#[derive(Debug, Clone)]
pub struct DriverDaemonSetProbe {
    pub namespace: String,
    pub name_match: String,
}

impl DriverDaemonSetProbe {
    pub fn new(namespace: impl Into<String>, name_match: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name_match: name_match.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DaemonSetView {
    metadata: Metadata,
    status: DaemonSetStatusView,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DaemonSetStatusView {
    desired_number_scheduled: i64,
    current_number_scheduled: i64,
    number_ready: i64,
}

#[async_trait]
impl Probe for DriverDaemonSetProbe {
    fn name(&self) -> &str {
        names::DRIVER_DAEMONSET
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let query = ResourceQuery::list(ResourceKind::DAEMON_SET).in_namespace(&self.namespace);
        let tree = match fetch(gateway, self.name(), &query, || {
            format!("Failed to get daemonsets from {} namespace", self.namespace)
        })
        .await
        {
            Ok(tree) => tree,
            Err(result) => return result,
        };

        let daemonsets: Vec<DaemonSetView> = match parse_items(&tree) {
            Ok(daemonsets) => daemonsets,
            Err(e) => return shape_failure(self.name(), e, &tree),
        };

        let Some(ds) = daemonsets.iter().find(|ds| {
            ds.metadata
                .name
                .as_deref()
                .map_or(false, |name| name.contains(&self.name_match))
        }) else {
            return ProbeResult::failed(self.name(), "NVIDIA driver daemonset not found");
        };

        let status = &ds.status;
        let detail = Detail::map()
            .with("name", ds.metadata.name_or_unknown())
            .with("desired", status.desired_number_scheduled)
            .with("current", status.current_number_scheduled)
            .with("ready", status.number_ready);

        debug!(
            daemonset = %ds.metadata.name_or_unknown(),
            desired = status.desired_number_scheduled,
            ready = status.number_ready,
            "Driver daemonset status"
        );

        if status.desired_number_scheduled == 0 {
            ProbeResult::failed(
                self.name(),
                "NVIDIA driver daemonset exists but is not scheduled on any nodes",
            )
            .with_detail(detail)
        } else if status.number_ready < status.desired_number_scheduled {
            ProbeResult::failed(
                self.name(),
                format!(
                    "NVIDIA driver daemonset not fully ready: {}/{} ready",
                    status.number_ready, status.desired_number_scheduled
                ),
            )
            .with_detail(detail)
        } else {
            ProbeResult::passed(
                self.name(),
                format!(
                    "NVIDIA driver daemonset running properly: {}/{} ready",
                    status.number_ready, status.desired_number_scheduled
                ),
            )
            .with_detail(detail)
        }
    }
}
