//! Coverage reporting: run the built test executable, then gcov.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::CoverageSection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSummary {
    pub gcda_files: usize,
    /// `false` when gcov was missing or failed; the run still counts.
    pub gcov_succeeded: bool,
}

pub struct CoverageRunner {
    executable: PathBuf,
    build_dir: PathBuf,
    gcov: String,
    timeout: Duration,
}

impl CoverageRunner {
    pub fn new(project_root: &Path, settings: &CoverageSection, timeout: Duration) -> Self {
        Self {
            executable: project_root.join(&settings.executable),
            build_dir: project_root.join(&settings.build_dir),
            gcov: "gcov".to_string(),
            timeout,
        }
    }

    pub fn with_gcov(mut self, program: impl Into<String>) -> Self {
        self.gcov = program.into();
        self
    }

    pub async fn run(&self) -> Result<CoverageSummary> {
        self.run_tests().await?;

        let gcda = gcda_files(&self.build_dir)?;
        if gcda.is_empty() {
            warn!(dir = %self.build_dir.display(), "no .gcda files; was the suite built with --coverage?");
            return Ok(CoverageSummary {
                gcda_files: 0,
                gcov_succeeded: false,
            });
        }

        let gcov_succeeded = match self.run_gcov(&gcda).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "gcov failed; coverage report incomplete");
                false
            }
        };

        Ok(CoverageSummary {
            gcda_files: gcda.len(),
            gcov_succeeded,
        })
    }

    async fn run_tests(&self) -> Result<()> {
        info!(executable = %self.executable.display(), "running unit tests");
        let mut cmd = tokio::process::Command::new(&self.executable);
        cmd.current_dir(&self.build_dir).kill_on_drop(true);

        let status = tokio::time::timeout(self.timeout, cmd.status())
            .await
            .with_context(|| format!("Test run timed out after {}s", self.timeout.as_secs()))?
            .with_context(|| format!("Failed to run {}", self.executable.display()))?;

        if !status.success() {
            bail!("Test executable exited with {status}");
        }
        Ok(())
    }

    async fn run_gcov(&self, gcda: &[String]) -> Result<()> {
        info!(files = gcda.len(), "generating coverage reports");
        let output = tokio::process::Command::new(&self.gcov)
            .args(gcda)
            .current_dir(&self.build_dir)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to start {}", self.gcov))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.gcov,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// `.gcda` file names directly inside `dir`, sorted.
fn gcda_files(dir: &Path) -> Result<Vec<String>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    let mut files: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("gcda"))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(path: &Path, body: &str) {
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn setup(test_body: &str) -> (tempfile::TempDir, CoverageRunner) {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("tests/build");
        std::fs::create_dir_all(&build).unwrap();
        script(&build.join("tests"), test_body);
        let runner = CoverageRunner::new(
            dir.path(),
            &CoverageSection {
                executable: PathBuf::from("tests/build/tests"),
                build_dir: PathBuf::from("tests/build"),
            },
            Duration::from_secs(30),
        );
        (dir, runner)
    }

    #[tokio::test]
    async fn gcov_runs_over_gcda_files() {
        let (dir, runner) = setup("touch a.gcda b.gcda");
        let runner = runner.with_gcov("true");
        let summary = runner.run().await.unwrap();
        assert_eq!(summary.gcda_files, 2);
        assert!(summary.gcov_succeeded);
        drop(dir);
    }

    #[tokio::test]
    async fn gcov_failure_is_not_fatal() {
        let (_dir, runner) = setup("touch a.gcda");
        let runner = runner.with_gcov("definitely-not-gcov-xyz");
        let summary = runner.run().await.unwrap();
        assert!(!summary.gcov_succeeded);
    }

    #[tokio::test]
    async fn failing_tests_abort_coverage() {
        let (_dir, runner) = setup("exit 1");
        assert!(runner.run().await.is_err());
    }
}
