//! Tolerant views over control-plane JSON
//!
//! Only the fields the probes read are modeled. Missing optional fields fall
//! back to defaults; a collection without `items` is a shape error.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Collection response (`kind: List` or `*List`)
#[derive(Debug, Deserialize)]
pub(crate) struct ObjectList<T> {
    pub items: Vec<T>,
}

/// Object metadata subset
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct Metadata {
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub deletion_timestamp: Option<String>,
}

impl Metadata {
    /// Object name, or `unknown` when absent
    pub fn name_or_unknown(&self) -> String {
        self.name.clone().unwrap_or_else(|| "unknown".to_string())
    }
}

/// Decode the items of a collection response
pub(crate) fn parse_items<T: DeserializeOwned>(
    tree: &serde_json::Value,
) -> Result<Vec<T>, serde_json::Error> {
    ObjectList::<T>::deserialize(tree).map(|list| list.items)
}

/// Decode a single object
pub(crate) fn parse_object<T: DeserializeOwned>(
    tree: &serde_json::Value,
) -> Result<T, serde_json::Error> {
    T::deserialize(tree)
}

/// Pod subset shared by the pod-reading probes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PodView {
    pub metadata: Metadata,
    pub spec: PodSpecView,
    pub status: PodStatusView,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PodSpecView {
    pub containers: Vec<ContainerView>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ContainerView {
    pub resources: ResourcesView,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ResourcesView {
    pub limits: BTreeMap<String, serde_json::Value>,
    pub requests: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct PodStatusView {
    pub phase: Option<String>,
    pub container_statuses: Vec<ContainerStatusView>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ContainerStatusView {
    pub ready: bool,
    pub state: ContainerStateView,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ContainerStateView {
    pub waiting: Option<WaitingView>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WaitingView {
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl PodView {
    pub fn phase(&self) -> &str {
        self.status.phase.as_deref().unwrap_or("Unknown")
    }

    /// `reason: message` for every container that is not ready
    pub fn waiting_reasons(&self) -> Vec<String> {
        self.status
            .container_statuses
            .iter()
            .filter(|c| !c.ready)
            .map(|c| {
                let waiting = c.state.waiting.clone().unwrap_or_default();
                format!(
                    "{}: {}",
                    waiting.reason.as_deref().unwrap_or("Unknown"),
                    waiting.message.as_deref().unwrap_or("No details available")
                )
            })
            .collect()
    }

    /// Bare waiting reasons of containers that are not ready
    pub fn waiting_codes(&self) -> impl Iterator<Item = &str> {
        self.status
            .container_statuses
            .iter()
            .filter(|c| !c.ready)
            .filter_map(|c| c.state.waiting.as_ref()?.reason.as_deref())
    }
}

/// Render a quantity that may be a JSON string or number
pub(crate) fn quantity_string(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => "0".to_string(),
    }
}
