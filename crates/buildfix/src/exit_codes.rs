//! Process exit codes for the buildfix CLI.

use convergence::LoopOutcome;

/// The build is green.
pub const SUCCESS: i32 = 0;

/// Bad arguments, invalid configuration, or an empty artifact universe.
pub const USAGE_ERROR: i32 = 1;

/// The attempt budget ran out, or repairs stopped changing anything.
pub const EXHAUSTED: i32 = 2;

/// The build failed with nothing actionable in its log.
pub const UNPARSEABLE: i32 = 3;

/// The environment is broken (build tool missing, build hung, tree unwritable).
pub const FATAL: i32 = 4;

/// Interrupted (128 + SIGINT).
pub const CANCELLED: i32 = 130;

pub fn for_outcome(outcome: &LoopOutcome) -> i32 {
    match outcome {
        LoopOutcome::Succeeded => SUCCESS,
        LoopOutcome::Exhausted { .. } => EXHAUSTED,
        LoopOutcome::Unparseable => UNPARSEABLE,
        LoopOutcome::FatalError { .. } => FATAL,
        LoopOutcome::Cancelled => CANCELLED,
    }
}
