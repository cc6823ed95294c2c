//! HTTP repair oracle speaking the OpenAI-compatible chat completions API.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use convergence::oracle::result_from_raw;
use convergence::{RepairError, RepairOracle, RepairRequest, RepairResult};
use serde::{Deserialize, Serialize};

use crate::config::OracleSection;

/// Optional instruction file handed to the model alongside each request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixInstructions {
    /// Replaces the configured system prompt when present.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Free-form guidance; strings are used verbatim, anything else is
    /// re-rendered as YAML.
    #[serde(default)]
    pub instructions: Option<serde_yaml::Value>,
}

impl FixInstructions {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read instructions {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("Invalid YAML in instructions {}", path.display()))
    }

    pub fn instructions_text(&self) -> Option<String> {
        match self.instructions.as_ref()? {
            serde_yaml::Value::Null => None,
            serde_yaml::Value::String(s) => Some(s.trim().to_string()),
            other => serde_yaml::to_string(other)
                .ok()
                .map(|s| s.trim().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct HttpRepairOracle {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f64,
    top_p: f64,
    token: Option<String>,
    system_prompt: String,
    instructions: Option<String>,
}

impl HttpRepairOracle {
    /// `timeout` bounds a single HTTP exchange; the loop applies its own
    /// repair timeout on top.
    pub fn new(
        settings: &OracleSection,
        token: Option<String>,
        instructions: Option<FixInstructions>,
        timeout: Duration,
    ) -> Result<Self, RepairError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RepairError::Transport(e.to_string()))?;

        let (system_prompt, instructions) = match instructions {
            Some(ins) => (
                ins.system_prompt
                    .clone()
                    .unwrap_or_else(|| settings.system_prompt.clone()),
                ins.instructions_text(),
            ),
            None => (settings.system_prompt.clone(), None),
        };

        Ok(Self {
            client,
            url: format!("{}/chat/completions", settings.endpoint.trim_end_matches('/')),
            model: settings.model.clone(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            token,
            system_prompt,
            instructions,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// User prompt for one artifact.
    pub fn build_prompt(&self, request: &RepairRequest) -> String {
        let mut prompt = String::new();
        if let Some(instructions) = &self.instructions {
            prompt.push_str("# YAML INSTRUCTIONS\n");
            prompt.push_str(instructions);
            prompt.push_str("\n\n");
        }
        prompt.push_str("# BUILD LOGS\n");
        prompt.push_str(&request.diagnostic_context);
        prompt.push_str("\n\n# BROKEN TEST FILE\n");
        prompt.push_str(&request.original_content);
        prompt
    }

    fn request_body(&self, request: &RepairRequest) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: self.build_prompt(request),
                },
            ],
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

/// First choice's message content, or `Malformed`.
fn completion_text(body: &str) -> Result<String, RepairError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| RepairError::Malformed(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RepairError::Malformed("response has no message content".to_string()))
}

#[async_trait]
impl RepairOracle for HttpRepairOracle {
    async fn repair(&self, request: &RepairRequest) -> Result<RepairResult, RepairError> {
        let start = std::time::Instant::now();

        let mut builder = self.client.post(&self.url).json(&self.request_body(request));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RepairError::Transport(format!("request timed out: {e}"))
            } else {
                RepairError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RepairError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(RepairError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw = completion_text(&body)?;
        tracing::debug!(
            artifact = %request.artifact_id,
            model = %self.model,
            response_bytes = raw.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "oracle responded"
        );
        result_from_raw(request, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RepairRequest {
        RepairRequest {
            artifact_id: "tests/test_src/src/models/Job.cc".into(),
            original_content: "TEST(Job, Ctor) { Job j }\n".into(),
            diagnostic_context: "tests/test_src/src/models/Job.cc:1:25: error: expected ';'"
                .into(),
        }
    }

    fn oracle(instructions: Option<FixInstructions>) -> HttpRepairOracle {
        HttpRepairOracle::new(
            &OracleSection::default(),
            None,
            instructions,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn url_appends_chat_completions() {
        let settings = OracleSection {
            endpoint: "http://localhost:8080/v1/".into(),
            ..Default::default()
        };
        let oracle =
            HttpRepairOracle::new(&settings, None, None, Duration::from_secs(1)).unwrap();
        assert_eq!(oracle.url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn prompt_has_logs_then_file() {
        let prompt = oracle(None).build_prompt(&request());
        assert!(!prompt.contains("# YAML INSTRUCTIONS"));
        let logs = prompt.find("# BUILD LOGS\n").unwrap();
        let file = prompt.find("# BROKEN TEST FILE\n").unwrap();
        assert!(logs < file);
        assert!(prompt.ends_with("TEST(Job, Ctor) { Job j }\n"));
    }

    #[test]
    fn yaml_instructions_shape_prompt_and_system() {
        let ins = FixInstructions::from_yaml(
            "system_prompt: Fix GoogleTest files.\ninstructions:\n  - keep test names\n  - return code only\n",
        )
        .unwrap();
        let oracle = oracle(Some(ins));
        let body = serde_json::to_value(oracle.request_body(&request())).unwrap();
        assert_eq!(body["messages"][0]["content"], "Fix GoogleTest files.");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.starts_with("# YAML INSTRUCTIONS\n- keep test names"));
        assert_eq!(body["model"], "openai/gpt-4o");
        assert_eq!(body["top_p"], 1.0);
    }

    #[test]
    fn string_instructions_are_verbatim() {
        let ins = FixInstructions::from_yaml("instructions: |\n  Only fix compile errors.\n").unwrap();
        assert_eq!(
            ins.instructions_text().as_deref(),
            Some("Only fix compile errors.")
        );
        assert!(ins.system_prompt.is_none());
    }

    #[test]
    fn completion_text_requires_content() {
        let ok = r#"{"choices":[{"message":{"role":"assistant","content":"int x;"}}]}"#;
        assert_eq!(completion_text(ok).unwrap(), "int x;");

        for bad in [r#"{"choices":[]}"#, r#"{"choices":[{"message":{"content":null}}]}"#, "not json"] {
            assert!(matches!(completion_text(bad), Err(RepairError::Malformed(_))), "{bad}");
        }
    }
}
