use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured CBT exercise produced by the drafting capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    pub description: String,
    /// Step-by-step instructions; order is significant.
    pub steps: Vec<String>,
    /// Clinical rationale for why the exercise helps.
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_notes: Option<String>,
}

impl Draft {
    /// Check that the draft is structurally usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("draft has an empty title".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("draft has an empty description".to_string());
        }
        if self.rationale.trim().is_empty() {
            return Err("draft has an empty rationale".to_string());
        }
        if self.steps.is_empty() {
            return Err("draft has no steps".to_string());
        }
        if let Some(i) = self.steps.iter().position(|s| s.trim().is_empty()) {
            return Err(format!("draft step {} is empty", i + 1));
        }
        Ok(())
    }

    /// Render the exercise for a reader.
    pub fn to_markdown(&self) -> String {
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "# {title}\n\n{description}\n\n## Rationale\n{rationale}\n\n## Steps\n{steps}\n\n## Safety Notes\n{notes}\n",
            title = self.title,
            description = self.description,
            rationale = self.rationale,
            steps = steps,
            notes = self.safety_notes.as_deref().unwrap_or("None"),
        )
    }
}

/// Append-only audit entry written by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentNote {
    pub agent_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentNote {
    pub fn new(agent_name: &str, content: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
