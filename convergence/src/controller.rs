//! Loop Controller: drives build → diagnose → repair → rebuild to a terminal
//! outcome.
//!
//! Builds are strictly sequential. Repairs within one attempt fan out with
//! at most `max_concurrent_repairs` in flight, and all of them settle before
//! any result is written back. Write-back is sequential and is never
//! interrupted by cancellation.

use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{LoopConfig, NoOpPolicy};
use crate::diagnostics::{group_actionable, DiagnosticExtractor};
use crate::error::{BuildError, ConfigError, RepairError};
use crate::executor::BuildExecutor;
use crate::oracle::RepairOracle;
use crate::report::{ExhaustionCause, LoopOutcome, LoopReport};
use crate::state_machine::{LoopPhase, StateMachine};
use crate::store::ArtifactStore;
use crate::types::{
    content_digest, Artifact, ArtifactDiagnostics, ArtifactId, AttemptRecord, BuildResult,
    LoopState, RepairOutcome, RepairRequest, RepairResult, RepairStatus,
};

/// Owns every collaborator and all loop state for a run.
pub struct LoopController<B, O, S> {
    executor: B,
    extractor: DiagnosticExtractor,
    oracle: O,
    store: S,
    config: LoopConfig,
    cancel: CancellationToken,
}

/// How one patching phase ended.
enum PatchVerdict {
    Continue,
    AllNoOp,
    WriteFailed(String),
    Cancelled,
}

impl<B, O, S> LoopController<B, O, S>
where
    B: BuildExecutor,
    O: RepairOracle,
    S: ArtifactStore,
{
    /// Validate `config` and fix the artifact universe for this run.
    pub fn new(
        executor: B,
        oracle: O,
        store: S,
        artifacts: impl IntoIterator<Item = ArtifactId>,
        config: LoopConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let extractor = DiagnosticExtractor::new(artifacts);
        if extractor.resolver().is_empty() {
            return Err(ConfigError::NoArtifacts);
        }

        Ok(Self {
            executor,
            extractor,
            oracle,
            store,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run to a terminal outcome. Never returns a raw collaborator error;
    /// every failure is classified into the report's outcome.
    pub async fn run(&self) -> LoopReport {
        let started = Instant::now();
        let mut sm = StateMachine::new();
        let mut state = LoopState::new(self.config.max_attempts);
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut repair_calls = 0usize;

        info!(
            max_attempts = self.config.max_attempts,
            artifacts = self.extractor.resolver().len(),
            no_op_policy = ?self.config.no_op_policy,
            "starting build-repair loop"
        );

        let outcome = loop {
            sm.set_attempt(state.attempt());
            if self.cancel.is_cancelled() {
                break cancel(&mut sm);
            }
            enter(&mut sm, LoopPhase::Building, None);

            let build = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break cancel(&mut sm),
                result = self.build() => result,
            };

            let build = match build {
                Ok(build) => build,
                Err(e) => {
                    error!(attempt = state.attempt(), error = %e, class = %e.failure_class(), "build could not run");
                    let reason = e.to_string();
                    enter(&mut sm, LoopPhase::FatalError, Some(&reason));
                    break LoopOutcome::FatalError { error: reason };
                }
            };
            state.record_build(build.clone());

            if build.succeeded {
                info!(attempt = state.attempt(), duration_ms = build.duration_ms, "build succeeded");
                attempts.push(AttemptRecord {
                    attempt: state.attempt(),
                    build,
                    diagnostics: vec![],
                    repairs: vec![],
                });
                enter(&mut sm, LoopPhase::Succeeded, None);
                break LoopOutcome::Succeeded;
            }

            info!(attempt = state.attempt(), exit_code = ?build.exit_code, "build failed");
            if self.cancel.is_cancelled() {
                attempts.push(AttemptRecord {
                    attempt: state.attempt(),
                    build,
                    diagnostics: vec![],
                    repairs: vec![],
                });
                break cancel(&mut sm);
            }
            enter(&mut sm, LoopPhase::Diagnosing, None);

            let diagnostics = self.extractor.extract(&build.raw_log);
            let groups = group_actionable(&diagnostics);
            let mut record = AttemptRecord {
                attempt: state.attempt(),
                build,
                diagnostics,
                repairs: vec![],
            };

            if groups.is_empty() {
                warn!(
                    attempt = state.attempt(),
                    diagnostics = record.diagnostics.len(),
                    "failed build has no actionable diagnostic"
                );
                attempts.push(record);
                enter(&mut sm, LoopPhase::Unparseable, None);
                break LoopOutcome::Unparseable;
            }

            if self.cancel.is_cancelled() {
                attempts.push(record);
                break cancel(&mut sm);
            }
            let reason = format!("{} artifact(s) implicated", groups.len());
            enter(&mut sm, LoopPhase::Patching, Some(&reason));

            let (repairs, calls, verdict) = self.patch(&groups).await;
            repair_calls += calls;
            record.repairs = repairs;
            attempts.push(record);

            match verdict {
                PatchVerdict::Cancelled => break cancel(&mut sm),
                PatchVerdict::WriteFailed(reason) => {
                    enter(&mut sm, LoopPhase::FatalError, Some(&reason));
                    break LoopOutcome::FatalError { error: reason };
                }
                PatchVerdict::AllNoOp if self.config.no_op_policy == NoOpPolicy::StopEarly => {
                    warn!(attempt = state.attempt(), "every repair was a no-op, stopping early");
                    enter(&mut sm, LoopPhase::Exhausted, Some("all repairs were no-ops"));
                    break LoopOutcome::Exhausted {
                        cause: ExhaustionCause::NonConvergent,
                    };
                }
                PatchVerdict::AllNoOp | PatchVerdict::Continue => {}
            }

            if !state.advance() {
                warn!(max_attempts = state.max_attempts(), "attempt budget exhausted");
                enter(&mut sm, LoopPhase::Exhausted, Some("attempt budget spent"));
                break LoopOutcome::Exhausted {
                    cause: ExhaustionCause::BudgetSpent,
                };
            }
        };

        debug!(path = %sm.summary(), "loop finished");
        let total_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            outcome = %outcome,
            builds = state.history().len(),
            repair_calls,
            total_duration_ms,
            "build-repair loop finished"
        );

        LoopReport {
            outcome,
            max_attempts: self.config.max_attempts,
            attempts,
            transitions: sm.into_transitions(),
            repair_calls,
            total_duration_ms,
        }
    }

    async fn build(&self) -> Result<BuildResult, BuildError> {
        let limit = self.config.build_timeout();
        match tokio::time::timeout(limit, self.executor.run()).await {
            Ok(result) => result,
            Err(_) => Err(BuildError::Timeout(limit)),
        }
    }

    /// Read, repair and write back every implicated artifact.
    ///
    /// Returns per-artifact outcomes in diagnostic order, the number of oracle
    /// calls issued, and the verdict for the attempt.
    async fn patch(
        &self,
        groups: &[ArtifactDiagnostics],
    ) -> (Vec<RepairOutcome>, usize, PatchVerdict) {
        let mut slots: Vec<Option<RepairOutcome>> = vec![None; groups.len()];
        let mut requests: Vec<(usize, RepairRequest)> = Vec::with_capacity(groups.len());

        for (i, group) in groups.iter().enumerate() {
            match self.store.read(&group.artifact_id).await {
                Ok(content) => {
                    let artifact = Artifact {
                        id: group.artifact_id.clone(),
                        content,
                    };
                    requests.push((i, RepairRequest::for_artifact(artifact, group)));
                }
                Err(e) => {
                    warn!(artifact = %group.artifact_id, error = %e, "could not read artifact");
                    slots[i] = Some(RepairOutcome {
                        artifact_id: group.artifact_id.clone(),
                        status: RepairStatus::Failed {
                            reason: e.to_string(),
                        },
                        before_digest: String::new(),
                        after_digest: String::new(),
                    });
                }
            }
        }

        let calls = requests.len();
        let oracle = &self.oracle;
        let limit = self.config.repair_timeout();
        let fan_out = stream::iter(requests)
            .map(move |(i, request)| async move {
                let result = match tokio::time::timeout(limit, oracle.repair(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(RepairError::Timeout(limit)),
                };
                (i, request, result)
            })
            .buffered(self.config.max_concurrent_repairs)
            .collect::<Vec<_>>();

        let settled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                info!("cancelled while repairs were in flight; nothing written");
                return (slots.into_iter().flatten().collect(), calls, PatchVerdict::Cancelled);
            }
            settled = fan_out => settled,
        };

        let mut any_failed = slots.iter().any(Option::is_some);
        let mut all_no_op = !any_failed;

        for (i, request, result) in settled {
            let before_digest = content_digest(&request.original_content);
            let outcome = match result.and_then(|r| check_artifact(&request, r)) {
                Ok(result) if result.is_no_op(&request) => {
                    debug!(artifact = %request.artifact_id, "repair returned content unchanged");
                    RepairOutcome {
                        artifact_id: request.artifact_id.clone(),
                        status: RepairStatus::NoOp,
                        after_digest: before_digest.clone(),
                        before_digest,
                    }
                }
                Ok(result) => {
                    all_no_op = false;
                    if let Err(e) = self
                        .store
                        .write(&request.artifact_id, &result.patched_content)
                        .await
                    {
                        error!(artifact = %request.artifact_id, error = %e, "write-back failed");
                        let outcomes = finish(slots, i, request, before_digest, e.to_string());
                        return (
                            outcomes,
                            calls,
                            PatchVerdict::WriteFailed(format!("write-back failed: {e}")),
                        );
                    }
                    info!(artifact = %request.artifact_id, "patched");
                    RepairOutcome {
                        artifact_id: request.artifact_id.clone(),
                        status: RepairStatus::Patched,
                        before_digest,
                        after_digest: content_digest(&result.patched_content),
                    }
                }
                Err(e) => {
                    any_failed = true;
                    all_no_op = false;
                    warn!(artifact = %request.artifact_id, error = %e, "repair failed; artifact left unpatched");
                    RepairOutcome {
                        artifact_id: request.artifact_id.clone(),
                        status: RepairStatus::Failed {
                            reason: e.to_string(),
                        },
                        after_digest: before_digest.clone(),
                        before_digest,
                    }
                }
            };
            slots[i] = Some(outcome);
        }

        let outcomes: Vec<RepairOutcome> = slots.into_iter().flatten().collect();
        let verdict = if all_no_op && !any_failed && !outcomes.is_empty() {
            PatchVerdict::AllNoOp
        } else {
            PatchVerdict::Continue
        };
        (outcomes, calls, verdict)
    }
}

/// An oracle answering for a different artifact cannot be applied.
fn check_artifact(request: &RepairRequest, result: RepairResult) -> Result<RepairResult, RepairError> {
    if result.artifact_id != request.artifact_id {
        return Err(RepairError::Malformed(format!(
            "result for {} does not match request for {}",
            result.artifact_id, request.artifact_id
        )));
    }
    Ok(result)
}

/// Close out the outcome list after a write-back failure at slot `i`.
fn finish(
    mut slots: Vec<Option<RepairOutcome>>,
    i: usize,
    request: RepairRequest,
    before_digest: String,
    reason: String,
) -> Vec<RepairOutcome> {
    slots[i] = Some(RepairOutcome {
        artifact_id: request.artifact_id,
        status: RepairStatus::Failed { reason },
        after_digest: before_digest.clone(),
        before_digest,
    });
    slots.into_iter().flatten().collect()
}

fn enter(sm: &mut StateMachine, to: LoopPhase, reason: Option<&str>) {
    if let Err(e) = sm.advance(to, reason) {
        error!(error = %e, "controller attempted an illegal transition");
    }
}

fn cancel(sm: &mut StateMachine) -> LoopOutcome {
    info!(phase = %sm.current(), "cancellation requested");
    enter(sm, LoopPhase::Cancelled, Some("cancelled"));
    LoopOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockBuildExecutor;
    use crate::oracle::MockRepairOracle;
    use crate::store::MemoryStore;

    fn failing(log: &str) -> BuildResult {
        BuildResult::new(false, log).with_exit_code(Some(1))
    }

    #[test]
    fn empty_universe_is_rejected() {
        let result = LoopController::new(
            MockBuildExecutor::new(),
            MockRepairOracle::new(),
            MemoryStore::new(),
            Vec::<ArtifactId>::new(),
            LoopConfig::default(),
        );
        assert!(matches!(result, Err(ConfigError::NoArtifacts)));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let result = LoopController::new(
            MockBuildExecutor::new(),
            MockRepairOracle::new(),
            MemoryStore::new(),
            vec![ArtifactId::new("foo.cc")],
            LoopConfig::default().with_max_attempts(0),
        );
        assert!(matches!(result, Err(ConfigError::MaxAttempts(0))));
    }

    #[tokio::test]
    async fn first_build_success_issues_no_repairs() {
        let mut executor = MockBuildExecutor::new();
        executor
            .expect_run()
            .times(1)
            .returning(|| Ok(BuildResult::new(true, "")));
        let mut oracle = MockRepairOracle::new();
        oracle.expect_repair().never();

        let controller = LoopController::new(
            executor,
            oracle,
            MemoryStore::new().with_file("foo.cc", "int x;\n"),
            vec![ArtifactId::new("foo.cc")],
            LoopConfig::default(),
        )
        .unwrap();

        let report = controller.run().await;
        assert_eq!(report.outcome, LoopOutcome::Succeeded);
        assert_eq!(report.builds(), 1);
        assert_eq!(report.repair_calls, 0);
    }

    #[tokio::test]
    async fn missing_tool_is_fatal_without_retry() {
        let mut executor = MockBuildExecutor::new();
        executor.expect_run().times(1).returning(|| {
            Err(BuildError::ToolMissing {
                program: "g++".into(),
            })
        });

        let controller = LoopController::new(
            executor,
            MockRepairOracle::new(),
            MemoryStore::new().with_file("foo.cc", ""),
            vec![ArtifactId::new("foo.cc")],
            LoopConfig::default(),
        )
        .unwrap();

        let report = controller.run().await;
        assert!(matches!(report.outcome, LoopOutcome::FatalError { ref error } if error.contains("g++")));
        assert!(report.attempts.is_empty());
    }

    #[tokio::test]
    async fn oracle_sees_content_and_rendered_diagnostics() {
        let mut executor = MockBuildExecutor::new();
        let mut builds = 0;
        executor.expect_run().times(2).returning(move || {
            builds += 1;
            if builds == 1 {
                Ok(failing("foo.cc:12:3: error: expected ';'"))
            } else {
                Ok(BuildResult::new(true, ""))
            }
        });

        let mut oracle = MockRepairOracle::new();
        oracle
            .expect_repair()
            .withf(|req: &RepairRequest| {
                req.artifact_id.as_str() == "foo.cc"
                    && req.original_content == "int x\n"
                    && req.diagnostic_context == "foo.cc:12:3: error: expected ';'"
            })
            .times(1)
            .returning(|req| {
                Ok(RepairResult {
                    artifact_id: req.artifact_id.clone(),
                    patched_content: "int x;\n".into(),
                })
            });

        let controller = LoopController::new(
            executor,
            oracle,
            MemoryStore::new().with_file("foo.cc", "int x\n"),
            vec![ArtifactId::new("foo.cc")],
            LoopConfig::default(),
        )
        .unwrap();

        let report = controller.run().await;
        assert_eq!(report.outcome, LoopOutcome::Succeeded);
        assert_eq!(
            controller.store().get(&ArtifactId::new("foo.cc")).as_deref(),
            Some("int x;\n")
        );
        assert_eq!(report.attempts[0].repairs[0].status, RepairStatus::Patched);
    }

    #[tokio::test]
    async fn mismatched_result_id_is_not_applied() {
        let mut executor = MockBuildExecutor::new();
        executor
            .expect_run()
            .returning(|| Ok(failing("foo.cc:1:1: error: boom")));
        let mut oracle = MockRepairOracle::new();
        oracle.expect_repair().returning(|_| {
            Ok(RepairResult {
                artifact_id: ArtifactId::new("bar.cc"),
                patched_content: "changed\n".into(),
            })
        });

        let controller = LoopController::new(
            executor,
            oracle,
            MemoryStore::new()
                .with_file("foo.cc", "orig\n")
                .with_file("bar.cc", "bar\n"),
            vec![ArtifactId::new("foo.cc"), ArtifactId::new("bar.cc")],
            LoopConfig::default().with_max_attempts(1),
        )
        .unwrap();

        let report = controller.run().await;
        assert!(report.attempts[0].repairs[0].is_failed());
        assert_eq!(
            controller.store().get(&ArtifactId::new("bar.cc")).as_deref(),
            Some("bar\n")
        );
        assert_eq!(
            report.outcome,
            LoopOutcome::Exhausted {
                cause: ExhaustionCause::BudgetSpent
            }
        );
    }
}
