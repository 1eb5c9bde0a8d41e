//! Error taxonomy for the core.
//!
//! Every subsystem gets its own `thiserror`-derived enum; [`CoreError`] aggregates them so the
//! top-level driver can match on a single type when choosing an exit code (see
//! [`crate::driver::ExitCode`]).

use std::path::PathBuf;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::environment::EnvironmentError;
use crate::fs::FsError;
use crate::graph::{GraphError, SchedulerError};
use crate::toolchain::ToolchainError;

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// A single (path, message) pair produced by schema validation. Accumulated, never fail-fast.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{path}: {message}")]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
    pub nearest_schema_location: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration errors in {file}:\n{}", .violations.iter().map(|v| format!("  {v}")).collect::<Vec<_>>().join("\n"))]
    SchemaValidation { file: PathBuf, violations: Vec<SchemaViolation> },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("external dependency error(s):\n{}", .0.iter().map(|e| format!("  {e}")).collect::<Vec<_>>().join("\n"))]
    ExternalDeps(Vec<crate::config::external::ExternalDepError>),

    #[error("build cancelled")]
    Cancelled,

    #[error("{0} is an external collaborator, not implemented in the core")]
    Unsupported(&'static str),

    #[error("invocation error: {0}")]
    Invocation(String),
}

impl CoreError {
    /// Maps an error onto the process exit codes described in the external-interfaces section.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 130,
            Self::SchemaValidation { .. } | Self::Config(_) | Self::ExternalDeps(_) => 2,
            Self::Invocation(_) => 3,
            Self::Unsupported(_) => 3,
            Self::Fs(_)
            | Self::Environment(_)
            | Self::Toolchain(_)
            | Self::Cache(_)
            | Self::Graph(_)
            | Self::Scheduler(_) => 1,
        }
    }
}
