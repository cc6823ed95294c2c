//! Loop state machine: explicit phases and legal transition guards.
//!
//! Every run starts at `Idle` and ends in exactly one terminal phase. The
//! controller calls `advance()` for each move; illegal moves are rejected and
//! legal ones are recorded so a report can replay the exact phase sequence.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Phases of the build-repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Constructed, not started.
    Idle,
    /// Build Executor running.
    Building,
    /// Extracting diagnostics from a failed build.
    Diagnosing,
    /// Repairs in flight and being written back.
    Patching,
    /// Build passed. Terminal.
    Succeeded,
    /// Attempt budget spent or no-op stall. Terminal.
    Exhausted,
    /// Failed build with nothing actionable in the log. Terminal.
    Unparseable,
    /// Broken environment. Terminal.
    FatalError,
    /// Stopped by external request. Terminal.
    Cancelled,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Exhausted | Self::Unparseable | Self::FatalError | Self::Cancelled
        )
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Building => write!(f, "Building"),
            Self::Diagnosing => write!(f, "Diagnosing"),
            Self::Patching => write!(f, "Patching"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::Unparseable => write!(f, "Unparseable"),
            Self::FatalError => write!(f, "FatalError"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// ```text
/// Idle → Building
/// Building → Succeeded | Diagnosing | FatalError
/// Diagnosing → Patching | Unparseable
/// Patching → Building | Exhausted | FatalError
/// (any non-terminal) → Cancelled
/// ```
fn is_legal_transition(from: LoopPhase, to: LoopPhase) -> bool {
    use LoopPhase::*;

    if to == Cancelled && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Building)
            | (Building, Succeeded)
            | (Building, Diagnosing)
            | (Building, FatalError)
            | (Diagnosing, Patching)
            | (Diagnosing, Unparseable)
            | (Patching, Building)
            | (Patching, Exhausted)
            // write-back failure
            | (Patching, FatalError)
    )
}

/// A single recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: LoopPhase,
    pub to: LoopPhase,
    /// Attempt number when the transition happened.
    pub attempt: u32,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: LoopPhase,
    pub to: LoopPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal loop transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

pub struct StateMachine {
    current: LoopPhase,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: LoopPhase::Idle,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> LoopPhase {
        self.current
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub fn advance(&mut self, to: LoopPhase, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            "loop transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// `Idle → … → current` on one line.
    pub fn summary(&self) -> String {
        let mut path = vec![LoopPhase::Idle.to_string()];
        path.extend(self.transitions.iter().map(|t| t.to.to_string()));
        format!(
            "{} ({}ms, {} transitions)",
            path.join(" → "),
            self.created_at.elapsed().as_millis(),
            self.transitions.len()
        )
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
