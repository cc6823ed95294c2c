//! buildfix: drives a failing C++ GoogleTest build to green.
//!
//! Adapters that plug the [`convergence`] loop into a real project:
//! - `build_tool`: compiler invocation as a child process
//! - `oracle`: OpenAI-compatible chat completions client
//! - `store`: atomic file write-back
//! - `discovery`: `.gitignore`-aware test source walk
//! - `project`: CMake project file generation
//! - `coverage`: test run plus gcov

pub mod build_tool;
pub mod config;
pub mod coverage;
pub mod discovery;
pub mod exit_codes;
pub mod logging;
pub mod oracle;
pub mod project;
pub mod runner;
pub mod store;

pub use config::{BuildfixConfig, CliOverrides};
pub use runner::{discover, run_loop};
