// Container runtime seam used by the sandbox controller
use async_trait::async_trait;
use devspace_common::types::Language;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Where the user's workspace is mounted inside every environment
pub const MOUNT_PATH: &str = "/workspace";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The environment (or the image it needs) does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// The runtime itself could not be reached
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Failed(String),
}

/// Everything a runtime needs to create one environment
#[derive(Debug, Clone)]
pub struct EnvironmentSpec {
    pub name: String,
    pub language: Language,
    pub image: String,
    pub host_dir: PathBuf,
    pub memory_limit_bytes: i64,
    pub nano_cpus: i64,
    pub labels: HashMap<String, String>,
}

/// Raw result of a command run inside an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// stdout and stderr interleaved in arrival order
    pub output: String,
    pub exit_code: Option<i64>,
}

#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Create (or adopt) a running environment and return its handle.
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<String, RuntimeError>;

    /// Run `argv` inside the environment with `MOUNT_PATH` as working dir.
    async fn exec(&self, handle: &str, argv: &[String]) -> Result<ExecOutcome, RuntimeError>;

    /// Stop and delete the environment. Removing an absent one is not an error.
    async fn remove(&self, handle: &str) -> Result<(), RuntimeError>;

    fn name(&self) -> &str;
}
