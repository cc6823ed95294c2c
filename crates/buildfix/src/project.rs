//! CMake project generation for the GoogleTest suite.

use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use convergence::ArtifactId;

use crate::config::GenerateSection;

pub const PROJECT_FILE: &str = "CMakeLists.txt";

pub struct CmakeProjectGenerator {
    project_root: PathBuf,
    output_dir: PathBuf,
    target: String,
    coverage: bool,
}

impl CmakeProjectGenerator {
    pub fn new(project_root: impl AsRef<Path>, settings: &GenerateSection) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            output_dir: settings.output_dir.clone(),
            target: settings.target.clone(),
            coverage: settings.coverage,
        }
    }

    pub fn with_coverage(mut self, coverage: bool) -> Self {
        self.coverage = coverage;
        self
    }

    /// `CMAKE_CURRENT_SOURCE_DIR`-relative path back to the project root.
    fn root_from_output(&self) -> String {
        let depth = self
            .output_dir
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .count();
        if depth == 0 {
            "${CMAKE_CURRENT_SOURCE_DIR}".to_string()
        } else {
            format!("${{CMAKE_CURRENT_SOURCE_DIR}}/{}", vec![".."; depth].join("/"))
        }
    }

    /// Render the project file. `source_root` is relative to the project root.
    pub fn render(&self, source_root: &Path, test_sources: &[ArtifactId]) -> String {
        let target = &self.target;
        let source_root = source_root.to_string_lossy().replace('\\', "/");
        let mut out = String::new();

        let _ = writeln!(out, "# Generated by buildfix. Regenerate with `buildfix generate`.");
        let _ = writeln!(out, "cmake_minimum_required(VERSION 3.14)");
        let _ = writeln!(out, "project({target}_suite CXX)\n");
        let _ = writeln!(out, "set(CMAKE_CXX_STANDARD 17)");
        let _ = writeln!(out, "set(CMAKE_CXX_STANDARD_REQUIRED ON)\n");
        let _ = writeln!(out, "set(BUILDFIX_ROOT {})\n", self.root_from_output());
        let _ = writeln!(out, "find_package(GTest REQUIRED)");
        let _ = writeln!(out, "find_package(Threads REQUIRED)\n");

        let _ = writeln!(out, "add_executable({target}");
        for id in test_sources {
            let _ = writeln!(out, "    ${{BUILDFIX_ROOT}}/{id}");
        }
        let _ = writeln!(out, ")\n");

        let _ = writeln!(
            out,
            "target_include_directories({target} PRIVATE ${{BUILDFIX_ROOT}}/{source_root})"
        );
        let _ = writeln!(
            out,
            "target_link_libraries({target} PRIVATE GTest::gtest GTest::gtest_main Threads::Threads)"
        );
        if self.coverage {
            let _ = writeln!(out, "target_compile_options({target} PRIVATE --coverage -O0 -g)");
            let _ = writeln!(out, "target_link_options({target} PRIVATE --coverage)");
        }

        let _ = writeln!(out, "\nenable_testing()");
        let _ = writeln!(out, "include(GoogleTest)");
        let _ = writeln!(out, "gtest_discover_tests({target})");
        out
    }

    /// Write the project file and return its path.
    pub fn generate(&self, source_root: &Path, test_sources: &[ArtifactId]) -> Result<PathBuf> {
        let dir = self.project_root.join(&self.output_dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(PROJECT_FILE);
        std::fs::write(&path, self.render(source_root, test_sources))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), sources = test_sources.len(), coverage = self.coverage, "project file generated");
        Ok(path)
    }
}
