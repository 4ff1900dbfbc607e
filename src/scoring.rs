//! Scoring answers against an answer key
//!
//! Pure functions only; safe to call repeatedly for live previews.

use crate::attempt::Answers;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    #[default]
    ExactMatch,
    FreeText,
}

/// Expected answer for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub question_id: String,
    pub expected: String,
    #[serde(default)]
    pub kind: QuestionKind,
    #[serde(default = "default_points")]
    pub points: u32,
    /// Numeric tolerance for free-text answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

fn default_points() -> u32 {
    1
}

impl KeyEntry {
    pub fn new(question_id: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            expected: expected.into(),
            kind: QuestionKind::default(),
            points: default_points(),
            tolerance: None,
        }
    }

    #[must_use]
    pub fn kind(mut self, kind: QuestionKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }

    #[must_use]
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    fn accepts(&self, answer: &str) -> bool {
        if self.kind == QuestionKind::FreeText {
            if let Some(tolerance) = self.tolerance {
                if let (Ok(given), Ok(expected)) = (
                    answer.trim().parse::<f64>(),
                    self.expected.trim().parse::<f64>(),
                ) {
                    return (given - expected).abs() <= tolerance;
                }
            }
        }
        normalize(answer) == normalize(&self.expected)
    }
}

/// Ordered set of expected answers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerKey {
    entries: Vec<KeyEntry>,
}

impl AnswerKey {
    pub fn new(entries: Vec<KeyEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }

    pub fn contains(&self, question_id: &str) -> bool {
        self.entries.iter().any(|e| e.question_id == question_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_id: String,
    pub correct: bool,
    pub points_earned: u32,
    pub points_possible: u32,
}

/// Per-question results plus totals. Derived, never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub per_question: Vec<QuestionScore>,
    pub total: u32,
    pub max: u32,
}

impl ScoreBreakdown {
    /// 0 when there is nothing to score
    pub fn percentage(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            f64::from(self.total) * 100.0 / f64::from(self.max)
        }
    }

    pub fn correct_count(&self) -> usize {
        self.per_question.iter().filter(|q| q.correct).count()
    }
}

/// Trimmed and case-folded form used for comparisons
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Score `answers` against `key`. Unanswered questions earn nothing;
/// answers to questions outside the key are ignored.
pub fn score(answers: &Answers, key: &AnswerKey) -> ScoreBreakdown {
    let per_question: Vec<QuestionScore> = key
        .entries
        .iter()
        .map(|entry| {
            let correct = answers
                .get(&entry.question_id)
                .is_some_and(|answer| entry.accepts(answer));
            QuestionScore {
                question_id: entry.question_id.clone(),
                correct,
                points_earned: if correct { entry.points } else { 0 },
                points_possible: entry.points,
            }
        })
        .collect();

    // points come from server-supplied keys; large values clamp instead of wrapping
    let total = per_question
        .iter()
        .fold(0u32, |acc, q| acc.saturating_add(q.points_earned));
    let max = per_question
        .iter()
        .fold(0u32, |acc, q| acc.saturating_add(q.points_possible));
    ScoreBreakdown {
        per_question,
        total,
        max,
    }
}
