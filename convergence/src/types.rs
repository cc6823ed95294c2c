//! Core data model shared by every stage of the repair loop.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a patchable source file: a forward-slash path relative to
/// the project root (e.g. `tests/test_src/src/models/Job.cc`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Build an id, normalizing backslashes and a leading `./`.
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path.as_ref().replace('\\', "/");
        let trimmed = normalized.trim_start_matches("./");
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path components, ignoring empty and `.` segments.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty() && *c != ".")
    }

    /// Final path component (the file name).
    pub fn file_name(&self) -> &str {
        self.components().last().unwrap_or(self.0.as_str())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A named unit of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub content: String,
}

/// Outcome of one build invocation. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    /// Whether the build tool exited successfully.
    pub succeeded: bool,
    /// stdout followed by stderr.
    pub raw_log: String,
    /// Exit code if the process exited normally.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the build.
    pub duration_ms: u64,
    /// When the build finished.
    pub finished_at: DateTime<Utc>,
}

impl BuildResult {
    pub fn new(succeeded: bool, raw_log: impl Into<String>) -> Self {
        Self {
            succeeded,
            raw_log: raw_log.into(),
            exit_code: if succeeded { Some(0) } else { None },
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Severity keyword following a file reference, when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Note,
    /// No recognized severity keyword; treated like an error.
    Unspecified,
}

impl Severity {
    pub fn parse(keyword: &str) -> Self {
        match keyword.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal error" => Self::Error,
            "warning" => Self::Warning,
            "note" => Self::Note,
            _ => Self::Unspecified,
        }
    }

    /// Whether a diagnostic of this severity can explain a failed build.
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::Error | Self::Unspecified)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Note => write!(f, "note"),
            Self::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// Position inside an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: Option<u32>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}", self.line, column),
            None => write!(f, "{}", self.line),
        }
    }
}

/// Why a build failed, attributed to one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub artifact_id: ArtifactId,
    pub message: String,
    pub location: Option<Location>,
    pub severity: Severity,
}

impl Diagnostic {
    /// Compiler-style single diagnostic rendering.
    pub fn render(&self) -> String {
        match &self.location {
            Some(loc) => format!(
                "{}:{}: {}: {}",
                self.artifact_id, loc, self.severity, self.message
            ),
            None => format!("{}: {}: {}", self.artifact_id, self.severity, self.message),
        }
    }
}

/// All diagnostics for a single artifact within one attempt, in log order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDiagnostics {
    pub artifact_id: ArtifactId,
    pub diagnostics: Vec<Diagnostic>,
}

impl ArtifactDiagnostics {
    pub fn is_actionable(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity.is_actionable())
    }

    /// Context text handed to the repair oracle.
    pub fn render_context(&self) -> String {
        self.diagnostics
            .iter()
            .map(Diagnostic::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the repair oracle is asked to fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub artifact_id: ArtifactId,
    pub original_content: String,
    pub diagnostic_context: String,
}

impl RepairRequest {
    /// Ask for a repair of `artifact` as it stands, given its diagnostics.
    pub fn for_artifact(artifact: Artifact, diagnostics: &ArtifactDiagnostics) -> Self {
        Self {
            artifact_id: artifact.id,
            original_content: artifact.content,
            diagnostic_context: diagnostics.render_context(),
        }
    }
}

/// Replacement content proposed by the repair oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairResult {
    pub artifact_id: ArtifactId,
    pub patched_content: String,
}

impl RepairResult {
    /// A repair that returns its input unchanged signals non-convergence.
    pub fn is_no_op(&self, request: &RepairRequest) -> bool {
        self.patched_content.as_bytes() == request.original_content.as_bytes()
    }
}

/// Per-artifact outcome of the patching phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepairStatus {
    /// New content was written back.
    Patched,
    /// The oracle returned the content unchanged.
    NoOp,
    /// Transport or response failure; the artifact was left untouched.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub artifact_id: ArtifactId,
    pub status: RepairStatus,
    /// blake3 of the content sent to the oracle.
    pub before_digest: String,
    /// blake3 of the content after the attempt (equal to `before_digest`
    /// unless patched).
    pub after_digest: String,
}

impl RepairOutcome {
    pub fn is_no_op(&self) -> bool {
        self.status == RepairStatus::NoOp
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RepairStatus::Failed { .. })
    }
}

/// Short hex digest used to fingerprint artifact content in reports.
pub fn content_digest(content: &str) -> String {
    let hex = blake3::hash(content.as_bytes()).to_hex();
    hex.as_str()[..16].to_string()
}

/// Everything that happened in one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub build: BuildResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repairs: Vec<RepairOutcome>,
}

/// Loop bookkeeping, owned by the controller for the duration of one run.
#[derive(Debug, Clone)]
pub struct LoopState {
    attempt: u32,
    max_attempts: u32,
    history: Vec<BuildResult>,
}

impl LoopState {
    /// Start at attempt 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts,
            history: Vec::new(),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn history(&self) -> &[BuildResult] {
        &self.history
    }

    pub fn record_build(&mut self, result: BuildResult) {
        self.history.push(result);
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Move to the next attempt. Returns `false` without changing state when
    /// the budget is already spent.
    pub fn advance(&mut self) -> bool {
        if self.is_last_attempt() {
            return false;
        }
        self.attempt += 1;
        true
    }
}
