//! Cluster gateways for the GPU cluster validator
//!
//! [`CliGateway`] drives `oc`/`kubectl` as a subprocess; [`KubeGateway`]
//! talks to the API server through kube-rs.

pub mod client;
pub mod command;

pub use client::KubeGateway;
pub use command::{CliGateway, CliGatewayConfig};
