//! Control-plane gateway abstraction
//!
//! Every probe reaches the cluster through a [`CommandGateway`]. Concrete
//! backends live in the `gpuval-k8s` crate; [`FakeGateway`] scripts responses
//! for tests.

mod fake;
mod resource;

pub use fake::{FakeGateway, GatewayCall};
pub use resource::{ResourceKind, ResourceQuery, ResourceRef};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Captured output of a control-plane command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit status; negative when the command never produced one
    pub exit_status: i32,
}

impl CommandOutput {
    /// Output of a command that exited 0
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: 0,
        }
    }

    /// Output of a command that exited non-zero
    pub fn failure(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    /// Represent a gateway error as command output
    pub fn from_error(error: &GatewayError) -> Self {
        let exit_status = match error {
            GatewayError::Command { exit_status, .. } => *exit_status,
            _ => -1,
        };
        Self::failure(exit_status, error.diagnostic())
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }

    /// stderr when present, stdout otherwise
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Errors reported by a gateway call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The command ran and exited non-zero
    #[error("command exited with status {exit_status}: {stderr}")]
    Command { exit_status: i32, stderr: String },

    /// The addressed resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The output could not be interpreted as structured data
    #[error("failed to parse control-plane output: {reason}")]
    Parse { reason: String, raw: String },

    /// The call did not complete in time
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The command could not be started
    #[error("failed to start command: {0}")]
    Spawn(String),

    /// The backend cannot perform this operation
    #[error("operation not supported by this gateway: {0}")]
    Unsupported(String),

    /// API-level failure from the cluster client
    #[error("API request failed: {0}")]
    Api(String),
}

impl GatewayError {
    /// Raw diagnostic text suitable for a result's detail
    pub fn diagnostic(&self) -> String {
        match self {
            GatewayError::Command { stderr, .. } => stderr.clone(),
            GatewayError::Parse { raw, .. } => raw.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Control-plane operations needed by the probes
///
/// All calls may fail; failure is always returned as a value.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Run a raw control-plane command (arguments after the CLI binary)
    async fn execute(&self, args: &[String]) -> CommandOutput;

    /// Create a resource from a manifest
    async fn create(&self, manifest: &serde_json::Value) -> Result<(), GatewayError>;

    /// Delete a resource
    async fn delete(&self, target: &ResourceRef) -> Result<(), GatewayError>;

    /// Execute a command inside a running workload
    async fn exec(&self, target: &ResourceRef, command: &[String]) -> CommandOutput;

    /// Fetch a resource or collection as a JSON tree
    async fn get(&self, query: &ResourceQuery) -> Result<serde_json::Value, GatewayError>;

    /// Fetch the logs of a workload
    async fn logs(&self, target: &ResourceRef) -> CommandOutput;

    /// Identify the current session against the control plane
    async fn whoami(&self) -> CommandOutput {
        self.execute(&["whoami".to_string()]).await
    }
}
