//! Build Executor: turns one build-tool invocation into a `BuildResult`.
//!
//! The executor knows nothing about how the build is performed. It hands the
//! fixed project root to a [`BuildTool`] and folds exit code, stdout and
//! stderr into the raw log the extractor consumes.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;

use crate::error::BuildError;
use crate::types::BuildResult;

/// Raw output of the external build tool.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, separated by a newline when both exist.
    pub fn combined_log(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => {
                let mut log = self.stdout.clone();
                if !log.ends_with('\n') {
                    log.push('\n');
                }
                log.push_str(&self.stderr);
                log
            }
        }
    }
}

/// External build invocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Run the build against `project_root`. Returns `Err` only when the tool
    /// could not be started; a failing compile is an `Ok` with non-zero exit.
    async fn execute(&self, project_root: &Path) -> Result<ToolOutput, BuildError>;
}

/// One full build of the project.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn run(&self) -> Result<BuildResult, BuildError>;
}

/// [`BuildExecutor`] backed by a [`BuildTool`] and a fixed project root.
pub struct ToolBuildExecutor<T> {
    tool: T,
    project_root: PathBuf,
}

impl<T: BuildTool> ToolBuildExecutor<T> {
    pub fn new(tool: T, project_root: impl AsRef<Path>) -> Self {
        Self {
            tool,
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

#[async_trait]
impl<T: BuildTool> BuildExecutor for ToolBuildExecutor<T> {
    async fn run(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        let output = self.tool.execute(&self.project_root).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            exit_code = ?output.exit_code,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            duration_ms,
            "build tool finished"
        );

        Ok(BuildResult::new(output.success(), output.combined_log())
            .with_exit_code(output.exit_code)
            .with_duration_ms(duration_ms))
    }
}
