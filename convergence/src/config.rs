//! Loop configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What to do when every repair in an attempt returns its input unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpPolicy {
    /// Stop as non-convergent: the tree is unchanged, so the next build
    /// would fail the same way.
    #[default]
    StopEarly,
    /// Keep spending the attempt budget.
    Continue,
}

/// Configuration for the convergence loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum number of builds before giving up.
    pub max_attempts: u32,
    /// Per-build timeout; expiry is an environment fault.
    pub build_timeout_secs: u64,
    /// Per-repair timeout; expiry leaves the artifact unpatched.
    pub repair_timeout_secs: u64,
    /// Upper bound on repair calls in flight within one attempt.
    pub max_concurrent_repairs: usize,
    /// Reaction to an attempt made entirely of no-op repairs.
    pub no_op_policy: NoOpPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            build_timeout_secs: 600,
            repair_timeout_secs: 120,
            max_concurrent_repairs: 4,
            no_op_policy: NoOpPolicy::StopEarly,
        }
    }
}

impl LoopConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_no_op_policy(mut self, policy: NoOpPolicy) -> Self {
        self.no_op_policy = policy;
        self
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_secs(self.repair_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::MaxAttempts(self.max_attempts));
        }
        if self.max_concurrent_repairs < 1 {
            return Err(ConfigError::Concurrency(self.max_concurrent_repairs));
        }
        if self.build_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout { field: "build" });
        }
        if self.repair_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout { field: "repair" });
        }
        Ok(())
    }
}
