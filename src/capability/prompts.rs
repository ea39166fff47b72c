//! Prompt builders for the command-backed capability.

use anyhow::{Context, Result};

use super::{DraftRequest, ReviewAxis};
use crate::blackboard::Draft;

/// Feedback entries carried into a revision prompt.
const FEEDBACK_WINDOW: usize = 3;

const DRAFT_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
```json
{
  "title": "string",
  "description": "string",
  "steps": ["string", "..."],
  "rationale": "string",
  "safety_notes": "string or null"
}
```"#;

const SAFETY_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
```json
{
  "is_safe": true,
  "safety_score": 0,
  "issues": ["string"],
  "recommendations": ["string"]
}
```
safety_score is 0 (dangerous) to 10 (very safe). If the score is below 8, list at least one issue."#;

const EMPATHY_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
```json
{
  "is_empathetic": true,
  "empathy_score": 0,
  "clinical_quality_score": 0,
  "feedback": ["string"]
}
```
empathy_score is 0 (cold) to 10 (very warm and supportive). If the score is below 8, give at least one piece of feedback."#;

pub fn draft_prompt(request: &DraftRequest) -> Result<String> {
    match &request.current_draft {
        None => Ok(initial_prompt(&request.intent)),
        Some(current) => revision_prompt(request, current),
    }
}

fn initial_prompt(intent: &str) -> String {
    format!(
        "You are an expert CBT therapist acting as a drafter.\n\
         Create a structured CBT exercise for the user's intent below.\n\
         Make it empathetic, clear and clinically grounded.\n\n\
         User intent: {intent}\n\n\
         {DRAFT_FORMAT}\n"
    )
}

fn revision_prompt(request: &DraftRequest, current: &Draft) -> Result<String> {
    let draft_json =
        serde_json::to_string_pretty(current).context("Failed to serialize current draft")?;
    Ok(format!(
        "You are an expert CBT therapist acting as a drafter.\n\
         Revise the current CBT exercise using the feedback from the clinical critic and the safety guardian.\n\n\
         User intent: {intent}\n\n\
         Current draft:\n{draft_json}\n\n\
         Clinical feedback:\n{critique}\n\n\
         Safety feedback:\n{safety}\n\n\
         {DRAFT_FORMAT}\n",
        intent = request.intent,
        critique = recent(&request.critique_feedback),
        safety = recent(&request.safety_feedback),
    ))
}

pub fn review_prompt(axis: ReviewAxis, draft: &Draft) -> Result<String> {
    let exercise = serde_json::to_string_pretty(draft).context("Failed to serialize draft")?;
    let (brief, format) = match axis {
        ReviewAxis::Safety => (SAFETY_BRIEF, SAFETY_FORMAT),
        ReviewAxis::Empathy => (EMPATHY_BRIEF, EMPATHY_FORMAT),
    };
    Ok(format!("{brief}\n\nExercise to review:\n{exercise}\n\n{format}\n"))
}

const SAFETY_BRIEF: &str = "You are the safety guardian for a CBT app.\n\
Rigorously review the exercise for risk. Look for:\n\
1. Instructions that could lead to self-harm.\n\
2. Exposure that is too extreme or physically dangerous without supervision.\n\
3. Medical advice the app is not qualified to give.\n\
4. Missing trigger warnings or missing guidance to stop when overwhelmed.\n\n\
Standard exposure exercises are clinically valid. Anxiety during a step is expected and is not by itself unsafe.\n\
A standard protocol such as an exposure hierarchy is generally safe if it tells the user to stop when overwhelmed.";

const EMPATHY_BRIEF: &str = "You are a clinical critic and senior CBT therapist.\n\
Judge whether the exercise is warm, validating and encouraging rather than robotic or dismissive,\n\
and whether it applies CBT technique correctly.";

fn recent(feedback: &[String]) -> String {
    if feedback.is_empty() {
        return "(none)".to_string();
    }
    let start = feedback.len().saturating_sub(FEEDBACK_WINDOW);
    feedback[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> Draft {
        Draft {
            title: "Thought Record".into(),
            description: "Catch and test automatic thoughts.".into(),
            steps: vec!["Write the situation".into()],
            rationale: "Cognitive restructuring.".into(),
            safety_notes: None,
        }
    }

    #[test]
    fn test_initial_prompt_carries_intent() {
        let req = DraftRequest {
            intent: "social anxiety at work".into(),
            current_draft: None,
            critique_feedback: vec![],
            safety_feedback: vec![],
        };
        let prompt = draft_prompt(&req).unwrap();
        assert!(prompt.contains("User intent: social anxiety at work"));
        assert!(!prompt.contains("Current draft"));
    }

    #[test]
    fn test_revision_prompt_keeps_last_three_feedback_entries() {
        let req = DraftRequest {
            intent: "i".into(),
            current_draft: Some(draft()),
            critique_feedback: vec!["c1".into(), "c2".into(), "c3".into(), "c4".into()],
            safety_feedback: vec![],
        };
        let prompt = draft_prompt(&req).unwrap();
        assert!(prompt.contains("Thought Record"));
        assert!(!prompt.contains("c1"));
        assert!(prompt.contains("c2\nc3\nc4"));
        assert!(prompt.contains("Safety feedback:\n(none)"));
    }

    #[test]
    fn test_review_prompt_per_axis() {
        let safety = review_prompt(ReviewAxis::Safety, &draft()).unwrap();
        assert!(safety.contains("safety_score"));
        let empathy = review_prompt(ReviewAxis::Empathy, &draft()).unwrap();
        assert!(empathy.contains("empathy_score"));
        assert!(empathy.contains("Thought Record"));
    }
}
