//! Repair Oracle contract and response sanitization.
//!
//! The oracle itself is external and possibly non-deterministic. This module
//! only fixes the request/response shape and cleans raw model output into
//! plain replacement content, so the loop never sees code fences or chatter.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::RepairError;
use crate::types::{RepairRequest, RepairResult};

/// External capability that proposes replacement content for one artifact.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepairOracle: Send + Sync {
    async fn repair(&self, request: &RepairRequest) -> Result<RepairResult, RepairError>;
}

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[^\S\n]*\n(.*?)```").unwrap());

static FENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[^\S\n]*```[A-Za-z0-9_+\-]*[^\S\n]*$\n?").unwrap());

static COMMENTARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(here is|here's|###|changes made|the corrected|the fixed)").unwrap()
});

/// Turn raw oracle output into replacement file content.
///
/// A fenced code block wins when present (the first one). Otherwise stray
/// fence lines are dropped along with leading commentary lines. Returns
/// `RepairError::Malformed` when nothing is left.
pub fn sanitize_response(raw: &str) -> Result<String, RepairError> {
    let body = match FENCED_BLOCK.captures(raw).and_then(|c| c.get(1)) {
        Some(block) => block.as_str().to_string(),
        None => {
            let unfenced = FENCE_LINE.replace_all(raw, "");
            unfenced
                .lines()
                .skip_while(|line| line.trim().is_empty() || COMMENTARY_LINE.is_match(line))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(RepairError::Malformed(
            "response contained no file content".to_string(),
        ));
    }

    let mut content = trimmed.to_string();
    content.push('\n');
    Ok(content)
}

/// Build the result for `request` from a raw oracle reply.
///
/// A reply that differs from the original only in line endings or
/// surrounding whitespace yields the original bytes, so an echo is a no-op.
pub fn result_from_raw(request: &RepairRequest, raw: &str) -> Result<RepairResult, RepairError> {
    let sanitized = sanitize_response(raw)?;
    let patched_content = if same_text(&sanitized, &request.original_content) {
        request.original_content.clone()
    } else {
        sanitized
    };
    Ok(RepairResult {
        artifact_id: request.artifact_id.clone(),
        patched_content,
    })
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().lines().map(str::trim_end).eq(b.trim().lines().map(str::trim_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_is_extracted() {
        let raw = "Here is the fixed file:\n```cpp\n#include <gtest/gtest.h>\nTEST(A, B) {}\n```\nChanges Made: added include";
        assert_eq!(
            sanitize_response(raw).unwrap(),
            "#include <gtest/gtest.h>\nTEST(A, B) {}\n"
        );
    }

    #[test]
    fn first_fenced_block_wins() {
        let raw = "```c++\nint a;\n```\nand also\n```\nint b;\n```";
        assert_eq!(sanitize_response(raw).unwrap(), "int a;\n");
    }

    #[test]
    fn plain_code_is_kept_verbatim() {
        let raw = "#include <vector>\n\n// keep this comment\nint main() { return 0; }\n";
        assert_eq!(sanitize_response(raw).unwrap(), raw);
    }

    #[test]
    fn leading_commentary_is_dropped() {
        let raw = "### Fixed version\nHere's the corrected code\nint x = 1;";
        assert_eq!(sanitize_response(raw).unwrap(), "int x = 1;\n");
    }

    #[test]
    fn unterminated_fence_is_stripped() {
        let raw = "```cpp\nint x = 1;";
        assert_eq!(sanitize_response(raw).unwrap(), "int x = 1;\n");
    }

    #[test]
    fn empty_response_is_malformed() {
        assert!(matches!(
            sanitize_response("   \n```\n```"),
            Err(RepairError::Malformed(_))
        ));
        assert!(matches!(sanitize_response(""), Err(RepairError::Malformed(_))));
    }

    fn request(original: &str) -> RepairRequest {
        RepairRequest {
            artifact_id: "tests/foo.cc".into(),
            original_content: original.into(),
            diagnostic_context: String::new(),
        }
    }

    #[test]
    fn echo_without_trailing_newline_is_no_op() {
        let req = request("int x;");
        let result = result_from_raw(&req, "int x;").unwrap();
        assert_eq!(result.patched_content, "int x;");
        assert!(result.is_no_op(&req));
    }

    #[test]
    fn echo_with_crlf_is_no_op() {
        let req = request("int x;\r\nint y;\r\n");
        let result = result_from_raw(&req, "int x;\r\nint y;\r\n").unwrap();
        assert!(result.is_no_op(&req));

        let fenced = result_from_raw(&req, "```cpp\nint x;\nint y;\n```").unwrap();
        assert_eq!(fenced.patched_content, "int x;\r\nint y;\r\n");
    }

    #[test]
    fn real_change_is_normalized() {
        let req = request("int x\r\n");
        let result = result_from_raw(&req, "int x;\r\n").unwrap();
        assert_eq!(result.patched_content, "int x;\n");
        assert!(!result.is_no_op(&req));
    }

    #[test]
    fn result_keeps_artifact_id() {
        let request = RepairRequest {
            artifact_id: "tests/foo.cc".into(),
            original_content: "int x\n".into(),
            diagnostic_context: "tests/foo.cc:1:6: error: expected ';'".into(),
        };
        let result = result_from_raw(&request, "int x;").unwrap();
        assert_eq!(result.artifact_id.as_str(), "tests/foo.cc");
        assert!(!result.is_no_op(&request));
    }
}
