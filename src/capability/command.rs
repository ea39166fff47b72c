//! Capability adapter that shells out to an LLM CLI.
//!
//! The prompt is written to the child's stdin and the first JSON object in
//! its stdout is taken as the answer. Deadlines are enforced by the engine;
//! the child is killed when its future is dropped.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::{DraftRequest, DraftService, Review, ReviewAxis, ReviewService, prompts};
use crate::blackboard::Draft;

/// Default agent command.
pub const DEFAULT_AGENT_CMD: &str = "claude";

#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Executable to spawn (default: "claude").
    pub command: String,
    /// Arguments passed before the prompt is streamed on stdin.
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_AGENT_CMD.to_string(),
            args: vec!["--print".to_string()],
            working_dir: None,
        }
    }
}

impl CommandConfig {
    pub fn with_command(mut self, cmd: &str) -> Self {
        self.command = cmd.to_string();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

/// Drafts and reviews through one external command.
#[derive(Debug, Clone, Default)]
pub struct CommandCapability {
    config: CommandConfig,
}

impl CommandCapability {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);

        if let Some(ref working_dir) = self.config.working_dir {
            cmd.current_dir(working_dir);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!(command = %self.config.command, "spawning agent");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn agent command '{}'", self.config.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to stdin")?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let stdout = child.stdout.take().context("Failed to get stdout")?;
        let mut lines = BufReader::new(stdout).lines();
        let mut output = String::new();
        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read agent output")?
        {
            output.push_str(&line);
            output.push('\n');
        }

        let status = child.wait().await.context("Failed to wait for agent")?;
        if !status.success() {
            anyhow::bail!(
                "Agent command exited with code {}",
                status.code().unwrap_or(-1)
            );
        }

        Ok(output)
    }
}

#[async_trait]
impl DraftService for CommandCapability {
    async fn draft(&self, request: DraftRequest) -> Result<Draft> {
        let prompt = prompts::draft_prompt(&request)?;
        let output = self.invoke(&prompt).await?;
        parse_draft(&output)
    }
}

#[async_trait]
impl ReviewService for CommandCapability {
    async fn review(&self, axis: ReviewAxis, draft: &Draft) -> Result<Review> {
        let prompt = prompts::review_prompt(axis, draft)?;
        let output = self.invoke(&prompt).await?;
        parse_review(&output)
    }
}

/// Review JSON as agents tend to write it.
#[derive(Debug, Deserialize)]
struct ReviewPayload {
    #[serde(alias = "safety_score", alias = "empathy_score")]
    score: u8,
    #[serde(default, alias = "feedback")]
    issues: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

pub fn parse_draft(output: &str) -> Result<Draft> {
    let json = extract_json(output).context("No JSON object in agent output")?;
    serde_json::from_str(&json).context("Agent output is not a valid draft")
}

pub fn parse_review(output: &str) -> Result<Review> {
    let json = extract_json(output).context("No JSON object in agent output")?;
    let payload: ReviewPayload =
        serde_json::from_str(&json).context("Agent output is not a valid review")?;
    let mut issues = payload.issues;
    issues.extend(payload.recommendations);
    Ok(Review::new(payload.score, issues))
}

/// Pull the first JSON object out of free-form output.
///
/// Tries a ```json fence, then any fence holding a `{`, then the first
/// balanced brace span.
pub fn extract_json(output: &str) -> Option<String> {
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```")
            && let Some(json_start) = after_marker[..end].find('{')
        {
            return Some(after_marker[json_start..end].trim().to_string());
        }
    }

    let start = output.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in output[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(output[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_code_block() {
        let output = "Here is the exercise:\n```json\n{\"title\": \"x\"}\n```\n";
        assert_eq!(extract_json(output).unwrap(), "{\"title\": \"x\"}");
    }

    #[test]
    fn test_extract_json_generic_fence() {
        let output = "```\n{\"score\": 9}\n```";
        assert_eq!(extract_json(output).unwrap(), "{\"score\": 9}");
    }

    #[test]
    fn test_extract_json_raw_nested() {
        let output = r#"Sure: {"a": {"b": 1}, "c": "}"} trailing"#;
        assert_eq!(extract_json(output).unwrap(), r#"{"a": {"b": 1}, "c": "}"}"#);
    }

    #[test]
    fn test_extract_json_none() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{ unterminated").is_none());
    }

    #[test]
    fn test_parse_draft() {
        let output = r#"```json
{"title": "Breathing", "description": "Box breathing", "steps": ["In 4", "Hold 4"], "rationale": "Calms arousal"}
```"#;
        let draft = parse_draft(output).unwrap();
        assert_eq!(draft.steps.len(), 2);
        assert!(draft.safety_notes.is_none());
    }

    #[test]
    fn test_parse_safety_review_merges_recommendations() {
        let output = r#"{"is_safe": false, "safety_score": 5, "issues": ["no stop rule"], "recommendations": ["add a stop rule"]}"#;
        let review = parse_review(output).unwrap();
        assert_eq!(review.score, 5);
        assert_eq!(review.issues, vec!["no stop rule", "add a stop rule"]);
    }

    #[test]
    fn test_parse_empathy_review_uses_feedback_alias() {
        let output = r#"{"is_empathetic": true, "empathy_score": 9, "clinical_quality_score": 8, "feedback": ["warm"]}"#;
        let review = parse_review(output).unwrap();
        assert_eq!(review.score, 9);
        assert_eq!(review.issues, vec!["warm"]);
    }

    #[test]
    fn test_parse_review_rejects_missing_score() {
        assert!(parse_review(r#"{"issues": []}"#).is_err());
    }

    #[tokio::test]
    async fn test_missing_command_is_an_error() {
        let cap = CommandCapability::new(
            CommandConfig::default().with_command("tend-no-such-agent-binary"),
        );
        let req = DraftRequest {
            intent: "x".into(),
            current_draft: None,
            critique_feedback: vec![],
            safety_feedback: vec![],
        };
        let err = cap.draft(req).await.unwrap_err();
        assert!(err.to_string().contains("tend-no-such-agent-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_review_through_shell_command() {
        let cap = CommandCapability::new(CommandConfig::default().with_command("sh").with_args(vec![
            "-c".into(),
            r#"cat > /dev/null; echo '{"safety_score": 9, "issues": []}'"#.into(),
        ]));
        let draft = parse_draft(
            r#"{"title": "t", "description": "d", "steps": ["s"], "rationale": "r"}"#,
        )
        .unwrap();
        let review = cap.review(ReviewAxis::Safety, &draft).await.unwrap();
        assert_eq!(review.score, 9);
    }
}
