//! Error taxonomy for the repair loop with failure classification.
//!
//! Every error raised by a collaborator is represented here. The controller
//! asks `failure_class()` to pick a terminal state instead of matching on
//! message text.
//!
//! ## Failure classes
//!
//! | Class        | Loop reaction                                       |
//! |--------------|-----------------------------------------------------|
//! | Environment  | abort immediately in `FatalError`, no retry         |
//! | Recoverable  | leave the artifact unpatched, attempt still counts  |
//! | Terminal     | reject before the loop starts                       |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::ArtifactId;

/// How the loop reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Broken environment (tool missing, build hang, unwritable tree).
    Environment,
    /// Repair-level failure; the attempt continues without this artifact.
    Recoverable,
    /// Invalid setup; the loop never starts.
    Terminal,
}

impl FailureClass {
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Recoverable)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "environment"),
            Self::Recoverable => write!(f, "recoverable"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Build Executor failures. A failing compile is NOT an error; these all
/// mean the build could not be judged at all.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build tool binary could not be found.
    #[error("build tool `{program}` not found")]
    ToolMissing { program: String },

    /// The build tool exists but could not be started.
    #[error("failed to start build tool `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The build ran past the configured timeout and was killed.
    #[error("build timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl BuildError {
    pub fn failure_class(&self) -> FailureClass {
        FailureClass::Environment
    }

    /// Classify an I/O error raised while spawning `program`.
    pub fn from_spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        let program = program.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::ToolMissing { program }
        } else {
            Self::Spawn { program, source }
        }
    }
}

/// Repair Oracle failures. All are recoverable at the loop level.
#[derive(Debug, Error)]
pub enum RepairError {
    /// Network or connection failure.
    #[error("oracle transport failure: {0}")]
    Transport(String),

    /// The oracle answered with a non-success status.
    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be turned into replacement content.
    #[error("malformed oracle response: {0}")]
    Malformed(String),

    /// The oracle did not answer within the configured timeout.
    #[error("oracle timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl RepairError {
    pub fn failure_class(&self) -> FailureClass {
        FailureClass::Recoverable
    }
}

/// Artifact store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact {0} does not exist")]
    NotFound(ArtifactId),

    #[error("I/O error on artifact {id}: {source}")]
    Io {
        id: ArtifactId,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid loop configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_attempts must be >= 1, got {0}")]
    MaxAttempts(u32),

    #[error("max_concurrent_repairs must be >= 1, got {0}")]
    Concurrency(usize),

    #[error("{field} timeout must be > 0")]
    ZeroTimeout { field: &'static str },

    #[error("artifact universe is empty; nothing to repair")]
    NoArtifacts,
}

impl ConfigError {
    pub fn failure_class(&self) -> FailureClass {
        FailureClass::Terminal
    }
}
