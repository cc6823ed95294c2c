//! buildfix configuration.
//!
//! Precedence, lowest first: built-in defaults, `buildfix.toml`, `BUILDFIX_*`
//! environment variables, CLI flags. The oracle token is never read from the
//! file; only the name of the variable holding it is.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use convergence::{LoopConfig, NoOpPolicy};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "buildfix.toml";

pub const DEFAULT_BUILD_COMMAND: &str =
    "g++ -std=c++17 {sources} -lgtest -lgtest_main -pthread -o test_executable";

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a C++ compiler assistant who fixes broken test files using Google Test.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Shell-words command line. `{sources}` expands to the artifact paths.
    pub command: String,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            command: DEFAULT_BUILD_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSection {
    /// Base URL of an OpenAI-compatible API; `/chat/completions` is appended.
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    /// Name of the environment variable holding the bearer token.
    pub token_env: String,
    /// Optional YAML file with `system_prompt` and `instructions` keys.
    pub instructions_path: Option<PathBuf>,
    pub system_prompt: String,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            endpoint: "https://models.github.ai/inference".to_string(),
            model: "openai/gpt-4o".to_string(),
            temperature: 0.3,
            top_p: 1.0,
            token_env: "BUILDFIX_ORACLE_TOKEN".to_string(),
            instructions_path: Some(PathBuf::from("instructions/fix_build.yaml")),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateSection {
    /// Directory (relative to the project root) that receives `CMakeLists.txt`.
    pub output_dir: PathBuf,
    /// Name of the test executable target.
    pub target: String,
    /// Compile and link with `--coverage`.
    pub coverage: bool,
}

impl Default for GenerateSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("tests"),
            target: "tests".to_string(),
            coverage: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageSection {
    /// Test executable, relative to the project root.
    pub executable: PathBuf,
    /// Directory holding `.gcda` files, relative to the project root.
    pub build_dir: PathBuf,
}

impl Default for CoverageSection {
    fn default() -> Self {
        let executable = if cfg!(windows) {
            "tests/build/tests.exe"
        } else {
            "tests/build/tests"
        };
        Self {
            executable: PathBuf::from(executable),
            build_dir: PathBuf::from("tests/build"),
        }
    }
}

/// Full configuration of the `buildfix` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildfixConfig {
    pub project_root: PathBuf,
    /// Application sources, relative to the project root.
    pub source_root: PathBuf,
    /// Patchable test sources, relative to the project root.
    pub test_root: PathBuf,
    /// File extensions (without the dot) that count as artifacts.
    pub extensions: Vec<String>,
    pub build: BuildSection,
    pub oracle: OracleSection,
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    pub generate: GenerateSection,
    pub coverage: CoverageSection,
}

impl Default for BuildfixConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            source_root: PathBuf::from("src"),
            test_root: PathBuf::from("tests/test_src/src"),
            extensions: vec!["cc".into(), "cpp".into(), "cxx".into()],
            build: BuildSection::default(),
            oracle: OracleSection::default(),
            loop_config: LoopConfig::default(),
            generate: GenerateSection::default(),
            coverage: CoverageSection::default(),
        }
    }
}

/// Values supplied on the command line. `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub project_root: Option<PathBuf>,
    pub test_root: Option<PathBuf>,
    pub build_command: Option<String>,
    pub max_attempts: Option<u32>,
    pub no_op_policy: Option<NoOpPolicy>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

impl BuildfixConfig {
    /// Load from `path`, or from `buildfix.toml` in the working directory if
    /// it exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML config")
    }

    /// Apply `BUILDFIX_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` as the environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("BUILDFIX_PROJECT_ROOT") {
            self.project_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("BUILDFIX_TEST_ROOT") {
            self.test_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("BUILDFIX_BUILD_COMMAND") {
            self.build.command = v;
        }
        if let Some(v) = lookup("BUILDFIX_ORACLE_ENDPOINT") {
            self.oracle.endpoint = v;
        }
        if let Some(v) = lookup("BUILDFIX_ORACLE_MODEL") {
            self.oracle.model = v;
        }
        if let Some(v) = lookup("BUILDFIX_MAX_ATTEMPTS") {
            self.loop_config.max_attempts = v
                .trim()
                .parse()
                .with_context(|| format!("BUILDFIX_MAX_ATTEMPTS is not a number: {v:?}"))?;
        }
        if let Some(v) = lookup("BUILDFIX_BUILD_TIMEOUT_SECS") {
            self.loop_config.build_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("BUILDFIX_BUILD_TIMEOUT_SECS is not a number: {v:?}"))?;
        }
        if let Some(v) = lookup("BUILDFIX_REPAIR_TIMEOUT_SECS") {
            self.loop_config.repair_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("BUILDFIX_REPAIR_TIMEOUT_SECS is not a number: {v:?}"))?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, cli: &CliOverrides) {
        if let Some(v) = &cli.project_root {
            self.project_root = v.clone();
        }
        if let Some(v) = &cli.test_root {
            self.test_root = v.clone();
        }
        if let Some(v) = &cli.build_command {
            self.build.command = v.clone();
        }
        if let Some(v) = cli.max_attempts {
            self.loop_config.max_attempts = v;
        }
        if let Some(v) = cli.no_op_policy {
            self.loop_config.no_op_policy = v;
        }
        if let Some(v) = &cli.endpoint {
            self.oracle.endpoint = v.clone();
        }
        if let Some(v) = &cli.model {
            self.oracle.model = v.clone();
        }
    }

    /// Absolute-or-relative directory scanned for artifacts.
    pub fn test_dir(&self) -> PathBuf {
        self.project_root.join(&self.test_root)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.project_root.join(&self.source_root)
    }

    /// The instructions file resolved against the project root, if configured.
    pub fn instructions_file(&self) -> Option<PathBuf> {
        self.oracle
            .instructions_path
            .as_ref()
            .map(|p| self.project_root.join(p))
    }

    /// Bearer token for the oracle, read from the variable named by
    /// `oracle.token_env`.
    pub fn oracle_token(&self) -> Option<String> {
        std::env::var(&self.oracle.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}
