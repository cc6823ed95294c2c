//! Diagnostic Extractor: raw build log → ordered, per-artifact diagnostics.
//!
//! Recognizes "file references" at the start of a line and attaches all
//! following free text to them until the next file reference:
//!
//! ```text
//! tests/src/foo.cc:12:3: error: expected ';' before '}' token   (gcc / clang)
//! tests\src\foo.cc(12,3): error C2143: syntax error             (msvc)
//! foo.cc:(.text+0x1e): undefined reference to `bar()'           (ld)
//! ```
//!
//! Only references that resolve to a known artifact produce diagnostics;
//! the others (system headers, object files) just end the previous message.
//! So do gcc's scope headers (`foo.cc: In function 'int main()':`).

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ArtifactDiagnostics, ArtifactId, Diagnostic, Location, Severity};

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

static GCC_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<path>(?:[A-Za-z]:)?[^\s:()]+):(?P<line>\d+)(?::(?P<col>\d+))?:(?:\s*(?P<sev>fatal error|error|warning|note):)?\s?(?P<msg>.*)$",
    )
    .unwrap()
});

static MSVC_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<path>(?:[A-Za-z]:)?[^\s:()]+)\((?P<line>\d+)(?:,(?P<col>\d+))?\)\s*:\s*(?:(?P<sev>fatal error|error|warning|note)(?:\s+[A-Z]+\d+)?\s*:)?\s*(?P<msg>.*)$",
    )
    .unwrap()
});

static LINKER_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>(?:[A-Za-z]:)?[^\s:()]+):\([^)]*\):\s*(?P<msg>.*)$").unwrap()
});

static SCOPE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z]:)?[^\s:()]+:\s+(?:In |At global scope)").unwrap()
});

/// A file reference recognized on a single log line.
#[derive(Debug)]
struct FileReference<'a> {
    path: &'a str,
    location: Option<Location>,
    severity: Severity,
    text: &'a str,
}

fn parse_reference(line: &str) -> Option<FileReference<'_>> {
    for pattern in [&*GCC_REFERENCE, &*MSVC_REFERENCE] {
        if let Some(caps) = pattern.captures(line) {
            let line_no = caps.name("line")?.as_str().parse().ok()?;
            let column = caps.name("col").and_then(|c| c.as_str().parse().ok());
            let severity = caps
                .name("sev")
                .map(|s| Severity::parse(s.as_str()))
                .unwrap_or(Severity::Unspecified);
            return Some(FileReference {
                path: caps.name("path")?.as_str(),
                location: Some(Location {
                    line: line_no,
                    column,
                }),
                severity,
                text: caps.name("msg").map(|m| m.as_str()).unwrap_or(""),
            });
        }
    }

    let caps = LINKER_REFERENCE.captures(line)?;
    Some(FileReference {
        path: caps.name("path")?.as_str(),
        location: None,
        severity: Severity::Error,
        text: caps.name("msg").map(|m| m.as_str()).unwrap_or(""),
    })
}

/// Maps paths as printed by a build tool back to known artifact ids.
#[derive(Debug, Clone, Default)]
pub struct ArtifactResolver {
    known: HashSet<ArtifactId>,
    by_file_name: HashMap<String, Vec<ArtifactId>>,
}

impl ArtifactResolver {
    pub fn new(artifacts: impl IntoIterator<Item = ArtifactId>) -> Self {
        let mut known = HashSet::new();
        let mut by_file_name: HashMap<String, Vec<ArtifactId>> = HashMap::new();
        for id in artifacts {
            if known.insert(id.clone()) {
                by_file_name
                    .entry(id.file_name().to_string())
                    .or_default()
                    .push(id);
            }
        }
        for ids in by_file_name.values_mut() {
            ids.sort();
        }
        Self {
            known,
            by_file_name,
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.known.contains(id)
    }

    /// Resolve a printed path: exact match first, then the unique artifact
    /// whose path components align with the printed path's tail (or whose
    /// tail is the printed path). Ambiguous matches resolve to nothing.
    pub fn resolve(&self, printed: &str) -> Option<ArtifactId> {
        let candidate = ArtifactId::new(printed);
        if self.known.contains(&candidate) {
            return Some(candidate);
        }

        let printed_parts: Vec<&str> = candidate.components().collect();
        let same_name = self.by_file_name.get(candidate.file_name())?;

        let mut best: Option<(&ArtifactId, usize)> = None;
        let mut ambiguous = false;
        for id in same_name {
            let parts: Vec<&str> = id.components().collect();
            let shared = shared_suffix_len(&printed_parts, &parts);
            let aligned = shared == parts.len() || shared == printed_parts.len();
            if !aligned {
                continue;
            }
            match best {
                Some((_, len)) if len > shared => {}
                Some((_, len)) if len == shared => ambiguous = true,
                _ => {
                    best = Some((id, shared));
                    ambiguous = false;
                }
            }
        }

        if ambiguous {
            tracing::debug!(path = printed, "ambiguous file reference ignored");
            return None;
        }
        best.map(|(id, _)| id.clone())
    }
}

fn shared_suffix_len(a: &[&str], b: &[&str]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Parses build logs into diagnostics for a fixed artifact universe.
#[derive(Debug, Clone)]
pub struct DiagnosticExtractor {
    resolver: ArtifactResolver,
}

struct Pending {
    artifact_id: ArtifactId,
    location: Option<Location>,
    severity: Severity,
    lines: Vec<String>,
}

impl Pending {
    fn finish(self) -> Diagnostic {
        let message = self.lines.join("\n").trim().to_string();
        Diagnostic {
            artifact_id: self.artifact_id,
            message,
            location: self.location,
            severity: self.severity,
        }
    }
}

impl DiagnosticExtractor {
    pub fn new(artifacts: impl IntoIterator<Item = ArtifactId>) -> Self {
        Self {
            resolver: ArtifactResolver::new(artifacts),
        }
    }

    pub fn resolver(&self) -> &ArtifactResolver {
        &self.resolver
    }

    /// Extract diagnostics in the order their file references appear.
    ///
    /// Pure: the same log always yields the same sequence.
    pub fn extract(&self, raw_log: &str) -> Vec<Diagnostic> {
        let clean = ANSI_ESCAPE.replace_all(raw_log, "");
        let mut diagnostics = Vec::new();
        let mut pending: Option<Pending> = None;

        for line in clean.lines() {
            let line = line.trim_end_matches('\r');
            match parse_reference(line) {
                Some(reference) => {
                    if let Some(done) = pending.take() {
                        diagnostics.push(done.finish());
                    }
                    pending = self.resolver.resolve(reference.path).map(|artifact_id| Pending {
                        artifact_id,
                        location: reference.location,
                        severity: reference.severity,
                        lines: vec![reference.text.to_string()],
                    });
                }
                None if SCOPE_HEADER.is_match(line) => {
                    if let Some(done) = pending.take() {
                        diagnostics.push(done.finish());
                    }
                }
                None => {
                    if let Some(current) = pending.as_mut() {
                        current.lines.push(line.to_string());
                    }
                }
            }
        }

        if let Some(done) = pending {
            diagnostics.push(done.finish());
        }
        diagnostics
    }

    /// Extract and keep only the artifacts worth sending to repair.
    pub fn actionable(&self, raw_log: &str) -> Vec<ArtifactDiagnostics> {
        group_actionable(&self.extract(raw_log))
    }
}

/// De-duplicate diagnostics per artifact, preserving first-appearance order.
pub fn group_by_artifact(diagnostics: &[Diagnostic]) -> Vec<ArtifactDiagnostics> {
    let mut index: HashMap<&ArtifactId, usize> = HashMap::new();
    let mut groups: Vec<ArtifactDiagnostics> = Vec::new();

    for diag in diagnostics {
        match index.get(&diag.artifact_id) {
            Some(&i) => groups[i].diagnostics.push(diag.clone()),
            None => {
                index.insert(&diag.artifact_id, groups.len());
                groups.push(ArtifactDiagnostics {
                    artifact_id: diag.artifact_id.clone(),
                    diagnostics: vec![diag.clone()],
                });
            }
        }
    }
    groups
}

/// Groups that contain at least one error-level diagnostic.
pub fn group_actionable(diagnostics: &[Diagnostic]) -> Vec<ArtifactDiagnostics> {
    group_by_artifact(diagnostics)
        .into_iter()
        .filter(ArtifactDiagnostics::is_actionable)
        .collect()
}
