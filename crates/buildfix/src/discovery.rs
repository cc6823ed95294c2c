//! Artifact discovery: `.gitignore`-respecting walk over the test root.

use std::path::{Path, PathBuf};

use convergence::ArtifactId;
use ignore::WalkBuilder;

/// Lists patchable test sources, as ids relative to the project root.
pub struct ArtifactDiscovery {
    project_root: PathBuf,
    extensions: Vec<String>,
}

impl ArtifactDiscovery {
    pub fn new(project_root: impl AsRef<Path>, extensions: &[String]) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Every matching file under `root`, sorted. Calling it again re-walks
    /// the tree.
    pub fn list_artifacts(&self, root: &Path) -> Vec<ArtifactId> {
        let walker = WalkBuilder::new(root).hidden(true).git_ignore(true).build();

        let mut ids = Vec::new();
        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() || !self.has_extension(path) {
                continue;
            }
            let relative = path.strip_prefix(&self.project_root).unwrap_or(path);
            let id = ArtifactId::new(relative.to_string_lossy());
            // Build logs cannot reference these unambiguously.
            if id.as_str().chars().any(char::is_whitespace) {
                tracing::warn!(path = %id, "skipping source with whitespace in its path");
                continue;
            }
            ids.push(id);
        }

        ids.sort();
        ids
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}
