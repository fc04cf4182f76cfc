//! GPUVAL Core Library
//!
//! Probe model and orchestration for GPU cluster validation.
//! This crate provides the gateway abstraction, health probes, the ephemeral
//! diagnostic workload manager and the result ledger.

pub mod gateway;
pub mod inventory;
pub mod ledger;
pub mod metrics;
mod objects;
pub mod orchestrator;
pub mod probes;
pub mod result;
pub mod workload;

// Re-export common types
pub use gateway::{CommandGateway, CommandOutput, GatewayError, ResourceKind, ResourceQuery, ResourceRef};
pub use ledger::ResultLedger;
pub use orchestrator::{Orchestrator, ValidatorSettings};
pub use probes::Probe;
pub use result::{Detail, DetailMap, ProbeResult, ProbeStatus};
pub use workload::{WorkloadManager, WorkloadSettings};
