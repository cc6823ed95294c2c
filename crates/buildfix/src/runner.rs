//! Wires the configured adapters into a [`LoopController`] and runs it.

use std::time::Duration;

use anyhow::{Context, Result};
use convergence::{ArtifactId, LoopController, LoopReport, ToolBuildExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::build_tool::ProcessBuildTool;
use crate::config::BuildfixConfig;
use crate::discovery::ArtifactDiscovery;
use crate::oracle::{FixInstructions, HttpRepairOracle};
use crate::store::FsArtifactStore;

/// The artifact universe for `config`.
pub fn discover(config: &BuildfixConfig) -> Vec<ArtifactId> {
    ArtifactDiscovery::new(&config.project_root, &config.extensions)
        .list_artifacts(&config.test_dir())
}

fn load_instructions(config: &BuildfixConfig) -> Result<Option<FixInstructions>> {
    let Some(path) = config.instructions_file() else {
        return Ok(None);
    };
    if !path.exists() {
        info!(path = %path.display(), "no instruction file; using the built-in prompt");
        return Ok(None);
    }
    FixInstructions::load(&path).map(Some)
}

/// Run the build-repair loop to a terminal outcome.
///
/// Errors only on setup problems (bad config, empty universe); everything
/// that happens once the loop starts is folded into the report.
pub async fn run_loop(config: &BuildfixConfig, cancel: CancellationToken) -> Result<LoopReport> {
    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("run", run_id = %run_id);
    let started_at = chrono::Utc::now();

    async move {
        info!(started_at = %started_at.to_rfc3339(), "starting build-repair loop");
        let artifacts = discover(config);
        info!(
            count = artifacts.len(),
            root = %config.test_dir().display(),
            "discovered artifacts"
        );

        let tool = ProcessBuildTool::from_command_line(&config.build.command)
            .context("Invalid build command")?
            .with_sources(&artifacts);
        let executor = ToolBuildExecutor::new(tool, &config.project_root);

        let token = config.oracle_token();
        if token.is_none() {
            warn!(
                var = %config.oracle.token_env,
                "oracle token not set; requests will be unauthenticated"
            );
        }
        let oracle = HttpRepairOracle::new(
            &config.oracle,
            token,
            load_instructions(config)?,
            Duration::from_secs(config.loop_config.repair_timeout_secs),
        )
        .context("Failed to create oracle client")?;

        let store = FsArtifactStore::new(&config.project_root);

        let controller = LoopController::new(
            executor,
            oracle,
            store,
            artifacts,
            config.loop_config.clone(),
        )
        .context("Invalid loop configuration")?
        .with_cancellation(cancel);

        Ok::<_, anyhow::Error>(controller.run().await)
    }
    .instrument(span)
    .await
}
