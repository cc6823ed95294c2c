//! Terminal outcome and run report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state_machine::{LoopPhase, TransitionRecord};
use crate::types::{AttemptRecord, BuildResult, RepairStatus};

/// Why the loop gave up in `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionCause {
    /// Every allowed build was spent.
    BudgetSpent,
    /// An attempt produced only no-op repairs.
    NonConvergent,
}

/// Terminal state of a run, with failures already classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoopOutcome {
    Succeeded,
    Exhausted { cause: ExhaustionCause },
    /// The build failed but no diagnostic pointed at a known artifact.
    Unparseable,
    /// Environment fault; `error` is the rendered cause.
    FatalError { error: String },
    Cancelled,
}

impl LoopOutcome {
    pub fn phase(&self) -> LoopPhase {
        match self {
            Self::Succeeded => LoopPhase::Succeeded,
            Self::Exhausted { .. } => LoopPhase::Exhausted,
            Self::Unparseable => LoopPhase::Unparseable,
            Self::FatalError { .. } => LoopPhase::FatalError,
            Self::Cancelled => LoopPhase::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "build succeeded"),
            Self::Exhausted {
                cause: ExhaustionCause::BudgetSpent,
            } => write!(f, "attempt budget exhausted"),
            Self::Exhausted {
                cause: ExhaustionCause::NonConvergent,
            } => write!(f, "repairs stopped changing the code (non-convergent)"),
            Self::Unparseable => write!(
                f,
                "build failed with no actionable diagnostic; needs manual intervention"
            ),
            Self::FatalError { error } => write!(f, "environment fault: {error}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything a caller needs to understand a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    pub max_attempts: u32,
    pub attempts: Vec<AttemptRecord>,
    pub transitions: Vec<TransitionRecord>,
    /// Number of repair calls issued to the oracle.
    pub repair_calls: usize,
    pub total_duration_ms: u64,
}

impl LoopReport {
    /// Build results in invocation order.
    pub fn history(&self) -> Vec<&BuildResult> {
        self.attempts.iter().map(|a| &a.build).collect()
    }

    pub fn builds(&self) -> usize {
        self.attempts.len()
    }

    /// Multi-line, human-readable history.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Outcome: {} after {}/{} build(s), {} repair call(s), {}ms\n",
            self.outcome,
            self.builds(),
            self.max_attempts,
            self.repair_calls,
            self.total_duration_ms
        );

        for record in &self.attempts {
            let status = if record.build.succeeded { "passed" } else { "failed" };
            out.push_str(&format!(
                "  attempt {}: build {} (exit {}, {}ms)",
                record.attempt,
                status,
                record
                    .build
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                record.build.duration_ms
            ));
            if !record.diagnostics.is_empty() {
                out.push_str(&format!(", {} diagnostic(s)", record.diagnostics.len()));
            }
            out.push('\n');

            for repair in &record.repairs {
                let status = match &repair.status {
                    RepairStatus::Patched => format!(
                        "patched {} → {}",
                        repair.before_digest, repair.after_digest
                    ),
                    RepairStatus::NoOp => "no-op".to_string(),
                    RepairStatus::Failed { reason } => format!("repair failed: {reason}"),
                };
                out.push_str(&format!("    {}: {}\n", repair.artifact_id, status));
            }
        }

        if matches!(self.outcome, LoopOutcome::Unparseable) {
            if let Some(last) = self.attempts.last() {
                out.push_str("  last build log tail:\n");
                for line in tail_lines(&last.build.raw_log, 20) {
                    out.push_str(&format!("    | {line}\n"));
                }
            }
        }

        out
    }
}

fn tail_lines(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}
