//! Structured failure-analysis records produced by the reflexion engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of failure triggered a reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReflectionTrigger {
    TestFailure,
    BuildError,
    ValidationError,
    RuntimeError,
    Timeout,
    Unknown,
}

impl ReflectionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestFailure => "TEST_FAILURE",
            Self::BuildError => "BUILD_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// The diagnosed root cause of a failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCause {
    pub description: String,
    pub reasoning: String,
}

/// An assumption the failed attempt made that turned out to be wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncorrectAssumption {
    pub assumption: String,
    pub why_wrong: String,
    pub corrected_approach: String,
}

/// The improved strategy for the next attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovedStrategy {
    pub approach: String,
    pub implementation_steps: Vec<String>,
    pub validation_plan: String,
}

/// A generalizable lesson extracted from the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub lesson: String,
    pub applicability: String,
    /// Non-empty pattern names feed the shared pattern library.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_name: Option<String>,
}

/// Immutable record of one retry analysis. Produced once per failed attempt,
/// never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reflection {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub attempt_number: u32,
    pub trigger: ReflectionTrigger,
    pub root_cause: RootCause,
    pub incorrect_assumptions: Vec<IncorrectAssumption>,
    pub improved_strategy: ImprovedStrategy,
    pub lessons_learned: Vec<Lesson>,
    /// True when the generator was unavailable or unparseable and this
    /// reflection was derived deterministically from the trigger and error
    /// text.
    #[serde(default)]
    pub fallback: bool,
    pub created_at: DateTime<Utc>,
}

/// Description of the task a reflection is about. Deliberately minimal so the
/// reflexion engine stays decoupled from the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionTask {
    pub task_id: String,
    pub description: String,
}

/// The failed attempt being analyzed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAttempt {
    /// What the attempt tried to do.
    pub approach: String,
    /// What it actually produced.
    pub output: String,
    pub errors: Vec<String>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

/// Guidance assembled from prior reflections, intended to be injected into
/// the next attempt's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryContext {
    pub task_id: String,
    pub attempt_number: u32,
    /// Plain-text "attempt N: root cause → strategy" summary block.
    pub guidance: String,
    /// Names of library patterns whose keywords match the task description.
    pub matched_patterns: Vec<String>,
}

/// A deduplicated entry in the shared pattern library.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPattern {
    pub name: String,
    pub lesson: String,
    pub applicability: String,
}
