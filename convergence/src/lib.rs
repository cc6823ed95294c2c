//! Build-repair convergence loop
//!
//! This library drives a failing native build towards success:
//! - runs an external build tool through a [`BuildExecutor`]
//! - extracts per-artifact diagnostics from the raw log
//! - asks a [`RepairOracle`] for replacement content, concurrently per artifact
//! - writes repairs back through an [`ArtifactStore`] and rebuilds
//!
//! The [`LoopController`] owns the state machine and resolves every failure
//! into one terminal [`LoopOutcome`]: `Succeeded`, `Exhausted`, `Unparseable`,
//! `FatalError` or `Cancelled`.
//!
//! # Usage
//!
//! ```ignore
//! let controller = LoopController::new(executor, oracle, store, artifacts, LoopConfig::default())?
//!     .with_cancellation(token);
//! let report = controller.run().await;
//! println!("{}", report.summary());
//! ```

pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod oracle;
pub mod report;
pub mod state_machine;
pub mod store;
pub mod types;

pub use config::{LoopConfig, NoOpPolicy};
pub use controller::LoopController;
pub use diagnostics::DiagnosticExtractor;
pub use error::{BuildError, ConfigError, FailureClass, RepairError, StoreError};
pub use executor::{BuildExecutor, BuildTool, ToolBuildExecutor, ToolOutput};
pub use oracle::{sanitize_response, RepairOracle};
pub use report::{ExhaustionCause, LoopOutcome, LoopReport};
pub use state_machine::{LoopPhase, StateMachine, TransitionRecord};
pub use store::{ArtifactStore, MemoryStore};
pub use types::{
    Artifact, ArtifactId, BuildResult, Diagnostic, RepairRequest, RepairResult, RepairStatus,
};
