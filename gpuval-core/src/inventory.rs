//! Node inventory
//!
//! Derives [`NodeDescriptor`]s from a node collection response.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::objects::{parse_items, Metadata};

/// Default schedulable accelerator resource
pub const DEFAULT_ACCELERATOR_RESOURCE: &str = "nvidia.com/gpu";

/// Transient description of one cluster node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub name: String,
    /// Units of the accelerator resource the node advertises
    pub accelerator_capacity: u32,
    pub labels: BTreeMap<String, String>,
}

impl NodeDescriptor {
    pub fn has_accelerators(&self) -> bool {
        self.accelerator_capacity > 0
    }
}

/// Node inventory could not be interpreted
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("unexpected node list shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("node {node} reports non-integer {resource} capacity {value:?}")]
    Capacity {
        node: String,
        resource: String,
        value: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeView {
    metadata: Metadata,
    status: NodeStatusView,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeStatusView {
    capacity: BTreeMap<String, serde_json::Value>,
}

/// Parse a node collection response
///
/// A node without the accelerator resource in its capacity has capacity 0.
pub fn parse_nodes(
    tree: &serde_json::Value,
    accelerator_resource: &str,
) -> Result<Vec<NodeDescriptor>, InventoryError> {
    let views: Vec<NodeView> = parse_items(tree)?;

    views
        .into_iter()
        .map(|view| {
            let name = view.metadata.name_or_unknown();
            let accelerator_capacity = match view.status.capacity.get(accelerator_resource) {
                None => 0,
                Some(value) => parse_capacity(value).ok_or_else(|| InventoryError::Capacity {
                    node: name.clone(),
                    resource: accelerator_resource.to_string(),
                    value: value.to_string(),
                })?,
            };

            Ok(NodeDescriptor {
                name,
                accelerator_capacity,
                labels: view.metadata.labels,
            })
        })
        .collect()
}

fn parse_capacity(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::String(s) if s.trim().is_empty() => Some(0),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    }
}
