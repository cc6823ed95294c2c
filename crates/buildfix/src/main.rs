use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use buildfix::config::{BuildfixConfig, CliOverrides};
use buildfix::coverage::CoverageRunner;
use buildfix::exit_codes;
use buildfix::logging::{self, LogFormat};
use buildfix::project::CmakeProjectGenerator;
use clap::{Parser, Subcommand, ValueEnum};
use convergence::NoOpPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drive a failing C++ test build to green with an LLM repair loop
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ./buildfix.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project root (overrides BUILDFIX_PROJECT_ROOT)
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Test source root, relative to the project root (overrides BUILDFIX_TEST_ROOT)
    #[arg(long, global = true)]
    test_root: Option<PathBuf>,

    /// Debug-level logging unless RUST_LOG is set
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum NoOpArg {
    StopEarly,
    Continue,
}

impl From<NoOpArg> for NoOpPolicy {
    fn from(value: NoOpArg) -> Self {
        match value {
            NoOpArg::StopEarly => NoOpPolicy::StopEarly,
            NoOpArg::Continue => NoOpPolicy::Continue,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build, repair and rebuild until green or out of attempts
    Run {
        /// Maximum number of builds (overrides BUILDFIX_MAX_ATTEMPTS)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Build command; `{sources}` expands to the test sources
        #[arg(long)]
        build_command: Option<String>,

        /// What to do when every repair in an attempt is a no-op
        #[arg(long, value_enum)]
        no_op_policy: Option<NoOpArg>,

        /// Oracle base URL (overrides BUILDFIX_ORACLE_ENDPOINT)
        #[arg(long)]
        endpoint: Option<String>,

        /// Oracle model (overrides BUILDFIX_ORACLE_MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Write the full JSON report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// List the test sources the loop may patch
    Discover,
    /// Write the CMake project file for the test suite
    Generate {
        /// Build with --coverage
        #[arg(long, default_value_t = false)]
        coverage: bool,
    },
    /// Run the built tests and produce gcov reports
    Coverage,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = if e.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            return ExitCode::from(code as u8);
        }
    };

    logging::init(cli.verbose, cli.log_format);

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_codes::USAGE_ERROR as u8)
        }
    }
}

fn load_config(cli: &Cli, overrides: CliOverrides) -> Result<BuildfixConfig> {
    let mut config = BuildfixConfig::load(cli.config.as_deref())?;
    config.apply_env()?;
    config.apply_overrides(&CliOverrides {
        project_root: cli.project_root.clone(),
        test_root: cli.test_root.clone(),
        ..overrides
    });
    config.loop_config.validate()?;
    Ok(config)
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match &cli.command {
        Command::Run {
            max_attempts,
            build_command,
            no_op_policy,
            endpoint,
            model,
            report,
        } => {
            let config = load_config(
                &cli,
                CliOverrides {
                    build_command: build_command.clone(),
                    max_attempts: *max_attempts,
                    no_op_policy: no_op_policy.map(Into::into),
                    endpoint: endpoint.clone(),
                    model: model.clone(),
                    ..Default::default()
                },
            )?;
            run(&config, report.as_deref()).await
        }
        Command::Discover => {
            let config = load_config(&cli, CliOverrides::default())?;
            for id in buildfix::discover(&config) {
                println!("{id}");
            }
            Ok(exit_codes::SUCCESS)
        }
        Command::Generate { coverage } => {
            let config = load_config(&cli, CliOverrides::default())?;
            let sources = buildfix::discover(&config);
            if sources.is_empty() {
                bail!("no test sources under {}", config.test_dir().display());
            }
            let generator = CmakeProjectGenerator::new(&config.project_root, &config.generate)
                .with_coverage(*coverage || config.generate.coverage);
            let path = generator.generate(&config.source_root, &sources)?;
            println!("{}", path.display());
            Ok(exit_codes::SUCCESS)
        }
        Command::Coverage => {
            let config = load_config(&cli, CliOverrides::default())?;
            let runner = CoverageRunner::new(
                &config.project_root,
                &config.coverage,
                config.loop_config.build_timeout(),
            );
            match runner.run().await {
                Ok(summary) => {
                    info!(
                        gcda_files = summary.gcda_files,
                        gcov_succeeded = summary.gcov_succeeded,
                        "coverage analysis complete"
                    );
                    Ok(exit_codes::SUCCESS)
                }
                Err(e) => {
                    eprintln!("coverage failed: {e:#}");
                    Ok(exit_codes::FATAL)
                }
            }
        }
    }
}

async fn run(config: &BuildfixConfig, report_path: Option<&std::path::Path>) -> Result<i32> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping at the next safe point");
            on_signal.cancel();
        }
    });

    let report = buildfix::run_loop(config, cancel).await?;
    print!("{}", report.summary());

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    Ok(exit_codes::for_outcome(&report.outcome))
}
