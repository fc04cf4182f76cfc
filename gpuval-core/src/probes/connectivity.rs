//! Control-plane connectivity probe

use async_trait::async_trait;
use tracing::debug;

use super::{names, Probe};
use crate::gateway::CommandGateway;
use crate::result::ProbeResult;

/// Verifies the control plane is reachable with an authenticated session
#[derive(Debug, Clone, Default)]
pub struct ConnectivityProbe;

#[async_trait]
impl Probe for ConnectivityProbe {
    fn name(&self) -> &str {
        names::CONNECTIVITY
    }

    async fn evaluate(&self, gateway: &dyn CommandGateway) -> ProbeResult {
        let output = gateway.whoami().await;

        if !output.is_success() {
            debug!(exit_status = output.exit_status, "Identity check failed");
            return ProbeResult::failed(
                self.name(),
                "Not connected to the cluster. Log in (oc login / kubeconfig) first.",
            )
            .with_detail(output.diagnostic());
        }

        ProbeResult::passed(
            self.name(),
            format!("Connected to cluster as {}", output.stdout.trim()),
        )
    }
}
