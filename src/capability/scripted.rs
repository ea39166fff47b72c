//! Deterministic capabilities for tests and dry runs.
//!
//! Each script is a queue of outcomes. A reviewer script repeats its last
//! outcome once it runs dry, so "safety 4 forever" is `with_scores(Safety, &[4])`.
//! A drafter script falls back to [`sample_draft`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{DraftRequest, DraftService, Review, ReviewAxis, ReviewService};
use crate::blackboard::Draft;

#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Return(T),
    Fail(String),
    /// Never resolves; exercises node deadlines.
    Hang,
}

#[derive(Debug)]
struct Script<T> {
    queue: VecDeque<Scripted<T>>,
    last: Option<Scripted<T>>,
}

impl<T: Clone> Script<T> {
    fn new(outcomes: Vec<Scripted<T>>) -> Self {
        Self {
            queue: outcomes.into(),
            last: None,
        }
    }

    fn next(&mut self) -> Option<Scripted<T>> {
        if let Some(outcome) = self.queue.pop_front() {
            self.last = Some(outcome.clone());
            return Some(outcome);
        }
        self.last.clone()
    }
}

async fn play<T>(outcome: Scripted<T>) -> Result<T> {
    match outcome {
        Scripted::Return(value) => Ok(value),
        Scripted::Fail(message) => Err(anyhow::anyhow!(message)),
        Scripted::Hang => std::future::pending().await,
    }
}

/// A well-formed exercise numbered by call.
pub fn sample_draft(n: u32) -> Draft {
    Draft {
        title: format!("Exposure Ladder v{}", n),
        description: "Build a graded list of feared situations and climb it slowly.".into(),
        steps: vec![
            "List ten situations and rate the fear each one causes from 0 to 100.".into(),
            "Start with the lowest item and stay with it until the fear halves.".into(),
            "Move up one rung only when the current rung feels manageable.".into(),
        ],
        rationale: "Repeated, voluntary exposure weakens avoidance and lets fear subside."
            .into(),
        safety_notes: Some("Stop and use grounding if you feel overwhelmed.".into()),
    }
}

/// Review with `score`; below 8 it carries one generated issue.
pub fn review(axis: ReviewAxis, score: u8) -> Review {
    let issues = if score < 8 {
        vec![format!("{} score {} needs work", axis, score)]
    } else {
        Vec::new()
    };
    Review::new(score, issues)
}

pub struct ScriptedDrafter {
    script: Mutex<Script<Draft>>,
    requests: Mutex<Vec<DraftRequest>>,
    calls: AtomicU32,
}

impl ScriptedDrafter {
    /// Always succeeds with [`sample_draft`].
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    /// Plays `outcomes` in order, then falls back to [`sample_draft`].
    pub fn with_script(outcomes: Vec<Scripted<Draft>>) -> Self {
        Self {
            script: Mutex::new(Script::new(outcomes)),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self::with_script(vec![Scripted::Fail(message.to_string())])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, oldest first.
    pub async fn requests(&self) -> Vec<DraftRequest> {
        self.requests.lock().await.clone()
    }
}

impl Default for ScriptedDrafter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DraftService for ScriptedDrafter {
    async fn draft(&self, request: DraftRequest) -> Result<Draft> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().await.push(request);
        let outcome = {
            let mut script = self.script.lock().await;
            if script.queue.is_empty() {
                None
            } else {
                script.next()
            }
        };
        match outcome {
            Some(outcome) => play(outcome).await,
            None => Ok(sample_draft(n)),
        }
    }
}

pub struct ScriptedReviewer {
    scripts: HashMap<ReviewAxis, Mutex<Script<Review>>>,
    delays: HashMap<ReviewAxis, Duration>,
    calls: AtomicU32,
}

impl ScriptedReviewer {
    /// Every review scores 9 until scripted otherwise.
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            delays: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    /// Scores for successive reviews on `axis`; the last one repeats.
    pub fn with_scores(self, axis: ReviewAxis, scores: &[u8]) -> Self {
        let outcomes = scores
            .iter()
            .map(|s| Scripted::Return(review(axis, *s)))
            .collect();
        self.with_script(axis, outcomes)
    }

    pub fn with_script(mut self, axis: ReviewAxis, outcomes: Vec<Scripted<Review>>) -> Self {
        self.scripts.insert(axis, Mutex::new(Script::new(outcomes)));
        self
    }

    /// Delay every review on `axis`, to shuffle sibling completion order.
    pub fn with_delay(mut self, axis: ReviewAxis, delay: Duration) -> Self {
        self.delays.insert(axis, delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedReviewer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewService for ScriptedReviewer {
    async fn review(&self, axis: ReviewAxis, _draft: &Draft) -> Result<Review> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&axis) {
            tokio::time::sleep(*delay).await;
        }
        let outcome = match self.scripts.get(&axis) {
            Some(script) => script.lock().await.next(),
            None => None,
        };
        play(outcome.unwrap_or_else(|| Scripted::Return(review(axis, 9)))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DraftRequest {
        DraftRequest {
            intent: "x".into(),
            current_draft: None,
            critique_feedback: vec![],
            safety_feedback: vec![],
        }
    }

    #[tokio::test]
    async fn test_drafter_numbers_drafts() {
        let drafter = ScriptedDrafter::new();
        let first = drafter.draft(request()).await.unwrap();
        let second = drafter.draft(request()).await.unwrap();
        assert_eq!(first.title, "Exposure Ladder v1");
        assert_eq!(second.title, "Exposure Ladder v2");
        assert_eq!(drafter.calls(), 2);
        assert!(first.validate().is_ok());
    }

    #[tokio::test]
    async fn test_drafter_script_then_fallback() {
        let drafter = ScriptedDrafter::failing("model offline");
        assert!(drafter.draft(request()).await.is_err());
        assert!(drafter.draft(request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_reviewer_repeats_last_score() {
        let reviewer = ScriptedReviewer::new().with_scores(ReviewAxis::Safety, &[5, 4]);
        let draft = sample_draft(1);
        let scores: Vec<u8> = [
            reviewer.review(ReviewAxis::Safety, &draft).await.unwrap().score,
            reviewer.review(ReviewAxis::Safety, &draft).await.unwrap().score,
            reviewer.review(ReviewAxis::Safety, &draft).await.unwrap().score,
        ]
        .into();
        assert_eq!(scores, vec![5, 4, 4]);
        assert_eq!(
            reviewer.review(ReviewAxis::Empathy, &draft).await.unwrap().score,
            9
        );
    }

    #[test]
    fn test_low_review_carries_issue() {
        assert!(review(ReviewAxis::Safety, 4).check_contract(8).is_ok());
        assert!(review(ReviewAxis::Safety, 9).issues.is_empty());
    }
}
