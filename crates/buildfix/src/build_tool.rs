//! Process-backed build tool.
//!
//! Runs the configured compiler command in the project root, in its own
//! process group, and captures stdout/stderr. The loop applies the timeout;
//! dropping the future kills the whole group, so make and compiler
//! subprocesses do not outlive the build.

use std::path::Path;

use async_trait::async_trait;
use convergence::{ArtifactId, BuildError, BuildTool, ToolOutput};
use thiserror::Error;

/// Placeholder replaced by the artifact paths.
pub const SOURCES_PLACEHOLDER: &str = "{sources}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildCommandError {
    #[error("build command is empty")]
    Empty,
    #[error("build command has unbalanced quotes: {0}")]
    Unbalanced(String),
}

#[derive(Debug, Clone)]
pub struct ProcessBuildTool {
    program: String,
    args: Vec<String>,
    sources: Vec<String>,
}

impl ProcessBuildTool {
    /// Parse a shell-words command line such as
    /// `g++ -std=c++17 {sources} -o test_executable`.
    pub fn from_command_line(command: &str) -> Result<Self, BuildCommandError> {
        let mut words = shlex::split(command)
            .ok_or_else(|| BuildCommandError::Unbalanced(command.to_string()))?
            .into_iter();
        let program = words.next().ok_or(BuildCommandError::Empty)?;
        Ok(Self {
            program,
            args: words.collect(),
            sources: Vec::new(),
        })
    }

    pub fn with_sources<'a>(mut self, sources: impl IntoIterator<Item = &'a ArtifactId>) -> Self {
        self.sources = sources.into_iter().map(|id| id.as_str().to_string()).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with `{sources}` expanded. A bare placeholder becomes one
    /// argument per source; an embedded one is replaced by the space-joined
    /// list.
    pub fn expanded_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + self.sources.len());
        for arg in &self.args {
            if arg == SOURCES_PLACEHOLDER {
                out.extend(self.sources.iter().cloned());
            } else if arg.contains(SOURCES_PLACEHOLDER) {
                out.push(arg.replace(SOURCES_PLACEHOLDER, &self.sources.join(" ")));
            } else {
                out.push(arg.clone());
            }
        }
        out
    }
}

#[async_trait]
impl BuildTool for ProcessBuildTool {
    async fn execute(&self, project_root: &Path) -> Result<ToolOutput, BuildError> {
        let args = self.expanded_args();
        tracing::debug!(program = %self.program, args = ?args, root = %project_root.display(), "spawning build");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args)
            .current_dir(project_root)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| BuildError::from_spawn(&self.program, e))?;

        #[cfg(unix)]
        let mut group = ProcessGroupGuard::new(child.id());

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BuildError::from_spawn(&self.program, e))?;

        #[cfg(unix)]
        group.disarm();

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Kills the build's process group when dropped before the build finished.
#[cfg(unix)]
struct ProcessGroupGuard {
    pgid: Option<nix::unistd::Pid>,
}

#[cfg(unix)]
impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid
                .and_then(|p| i32::try_from(p).ok())
                .map(nix::unistd::Pid::from_raw),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

#[cfg(unix)]
impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL) {
            Ok(()) => tracing::debug!(pgid = pgid.as_raw(), "killed abandoned build process group"),
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = pgid.as_raw(), error = %e, "failed to kill build process group"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_command() {
        let tool = ProcessBuildTool::from_command_line(r#"g++ -DNAME="a b" {sources} -o out"#)
            .unwrap();
        assert_eq!(tool.program(), "g++");
        assert_eq!(tool.expanded_args(), vec!["-DNAME=a b", "-o", "out"]);
    }

    #[test]
    fn rejects_empty_and_unbalanced() {
        assert_eq!(
            ProcessBuildTool::from_command_line("   ").unwrap_err(),
            BuildCommandError::Empty
        );
        assert!(matches!(
            ProcessBuildTool::from_command_line("g++ \"unterminated"),
            Err(BuildCommandError::Unbalanced(_))
        ));
    }

    #[test]
    fn sources_expand_in_place() {
        let ids = [ArtifactId::new("tests/a.cc"), ArtifactId::new("tests/b.cc")];
        let tool = ProcessBuildTool::from_command_line("g++ -std=c++17 {sources} -lgtest")
            .unwrap()
            .with_sources(&ids);
        assert_eq!(
            tool.expanded_args(),
            vec!["-std=c++17", "tests/a.cc", "tests/b.cc", "-lgtest"]
        );

        let tool = ProcessBuildTool::from_command_line("make SRCS={sources}")
            .unwrap()
            .with_sources(&ids);
        assert_eq!(tool.expanded_args(), vec!["SRCS=tests/a.cc tests/b.cc"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let tool =
            ProcessBuildTool::from_command_line("sh -c 'pwd; echo boom >&2; exit 3'").unwrap();
        let output = tool.execute(dir.path()).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stderr.trim(), "boom");
        let printed = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(printed, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[cfg(target_os = "linux")]
    fn running(pid: i32) -> bool {
        // A reaped process has no /proc entry; a zombie reports state Z.
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn abandoned_build_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ProcessBuildTool::from_command_line(
            "sh -c 'sleep 30 & echo $! > child.pid; wait'",
        )
        .unwrap();

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(1), tool.execute(dir.path())).await;
        assert!(result.is_err(), "build should still be running");

        let pid: i32 = std::fs::read_to_string(dir.path().join("child.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = running(pid);
        for _ in 0..50 {
            if !alive {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            alive = running(pid);
        }
        assert!(!alive, "background child {pid} survived the abandoned build");
    }

    #[tokio::test]
    async fn missing_program_is_tool_missing() {
        let dir = tempfile::tempdir().unwrap();
        let tool =
            ProcessBuildTool::from_command_line("definitely-not-a-real-compiler-xyz --version")
                .unwrap();
        let err = tool.execute(dir.path()).await.unwrap_err();
        assert!(matches!(err, BuildError::ToolMissing { .. }), "{err}");
    }
}
