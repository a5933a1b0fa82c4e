//! Reflexion Engine: structured failure analysis and retry guidance.
//!
//! After a task attempt fails, the engine asks the generator for a
//! structured reflection (root cause, wrong assumptions, improved strategy,
//! lessons). Generation never hard-fails: any generator error or unparseable
//! response degrades to a deterministic template reflection marked
//! `fallback`, so the retry loop always has something to work with.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::generator::{Generator, GeneratorPrompt};
use crate::models::reflection::{
    FailedAttempt, ImprovedStrategy, IncorrectAssumption, Lesson, LessonPattern, Reflection,
    ReflectionTask, ReflectionTrigger, RetryContext, RootCause,
};

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const REFLECTION_SYSTEM_PROMPT: &str = "You are a failure analyst for an automated development pipeline. \
Given a failed task attempt, produce a reflection as a single JSON object with exactly these keys: \
\"rootCause\" ({\"description\", \"reasoning\"}), \
\"incorrectAssumptions\" (array of {\"assumption\", \"whyWrong\", \"correctedApproach\"}), \
\"improvedStrategy\" ({\"approach\", \"implementationSteps\" (array of strings), \"validationPlan\"}), \
\"lessonsLearned\" (array of {\"lesson\", \"applicability\", \"patternName\" (optional)}). \
Ground every field in the attempt's actual output and errors. Respond with the JSON object only.";

/// Intermediate shape the generator is asked to produce. Identity and
/// bookkeeping fields are filled in by the engine, never trusted from the
/// generator.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReflectionDraft {
    root_cause: RootCause,
    #[serde(default)]
    incorrect_assumptions: Vec<IncorrectAssumption>,
    improved_strategy: ImprovedStrategy,
    #[serde(default)]
    lessons_learned: Vec<Lesson>,
}

struct ReflexionInner {
    /// Reflections per task id, in attempt order.
    history: HashMap<String, Vec<Reflection>>,
    /// Named lesson patterns accumulated across all tasks.
    patterns: HashMap<String, LessonPattern>,
}

pub struct ReflexionEngine {
    generator: Option<Arc<dyn Generator>>,
    max_attempts: u32,
    inner: Arc<RwLock<ReflexionInner>>,
}

impl ReflexionEngine {
    pub fn new(generator: Option<Arc<dyn Generator>>) -> Self {
        Self {
            generator,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            inner: Arc::new(RwLock::new(ReflexionInner {
                history: HashMap::new(),
                patterns: HashMap::new(),
            })),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Analyze a failed attempt. Infallible: degrades to a template
    /// reflection when the generator is absent, errors, or returns something
    /// unparseable.
    pub async fn generate_reflection(
        &self,
        task: &ReflectionTask,
        attempt: &FailedAttempt,
        agent_id: &str,
        attempt_number: u32,
        trigger: ReflectionTrigger,
        prior: &[Reflection],
    ) -> Reflection {
        let draft = match &self.generator {
            Some(generator) => {
                let prompt = build_prompt(task, attempt, attempt_number, trigger, prior);
                let response = generator.generate(prompt).await;
                if response.succeeded {
                    match parse_reflection(&response.text) {
                        Some(draft) => Some(draft),
                        None => {
                            tracing::warn!(
                                "[Reflexion] Unparseable reflection for task {}, using fallback",
                                task.task_id
                            );
                            None
                        }
                    }
                } else {
                    tracing::warn!(
                        "[Reflexion] Generator failed for task {}: {}",
                        task.task_id,
                        response.error.as_deref().unwrap_or("unknown error")
                    );
                    None
                }
            }
            None => None,
        };

        let fallback = draft.is_none();
        let draft = draft.unwrap_or_else(|| fallback_draft(attempt, trigger));
        let reflection = Reflection {
            id: Uuid::new_v4().to_string(),
            task_id: task.task_id.clone(),
            agent_id: agent_id.to_string(),
            attempt_number,
            trigger,
            root_cause: draft.root_cause,
            incorrect_assumptions: draft.incorrect_assumptions,
            improved_strategy: draft.improved_strategy,
            lessons_learned: draft.lessons_learned,
            fallback,
            created_at: Utc::now(),
        };

        if !fallback {
            self.absorb_patterns(&reflection).await;
        }
        reflection
    }

    /// Append a reflection to its task's history.
    pub async fn store_reflection(&self, reflection: Reflection) {
        let mut inner = self.inner.write().await;
        inner
            .history
            .entry(reflection.task_id.clone())
            .or_default()
            .push(reflection);
    }

    /// All stored reflections for a task, in storage order.
    pub async fn reflections_for(&self, task_id: &str) -> Vec<Reflection> {
        self.inner
            .read()
            .await
            .history
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Build guidance for the next attempt from past reflections plus any
    /// accumulated patterns whose names match the task description.
    pub async fn get_retry_context(
        &self,
        task: &ReflectionTask,
        reflections: &[Reflection],
    ) -> RetryContext {
        let mut lines = Vec::with_capacity(reflections.len());
        for r in reflections {
            lines.push(format!(
                "attempt {}: {} -> next: {}",
                r.attempt_number, r.root_cause.description, r.improved_strategy.approach
            ));
        }

        let description = task.description.to_lowercase();
        let inner = self.inner.read().await;
        let mut matched: Vec<String> = inner
            .patterns
            .keys()
            .filter(|name| {
                name.to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|token| token.len() > 3 && description.contains(token))
            })
            .cloned()
            .collect();
        matched.sort();

        RetryContext {
            task_id: task.task_id.clone(),
            attempt_number: reflections.len() as u32 + 1,
            guidance: lines.join("\n"),
            matched_patterns: matched,
        }
    }

    /// Retry budget check: the attempt about to be made must still be within
    /// `max_attempts`.
    pub fn should_continue_retrying(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// All lesson patterns learned so far, keyed by pattern name.
    pub async fn known_patterns(&self) -> Vec<LessonPattern> {
        let inner = self.inner.read().await;
        let mut patterns: Vec<LessonPattern> = inner.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| a.name.cmp(&b.name));
        patterns
    }

    /// First lesson wins for a given pattern name; later duplicates are
    /// dropped rather than overwriting established guidance.
    async fn absorb_patterns(&self, reflection: &Reflection) {
        let mut inner = self.inner.write().await;
        for lesson in &reflection.lessons_learned {
            let Some(name) = &lesson.pattern_name else {
                continue;
            };
            inner
                .patterns
                .entry(name.clone())
                .or_insert_with(|| LessonPattern {
                    name: name.clone(),
                    lesson: lesson.lesson.clone(),
                    applicability: lesson.applicability.clone(),
                });
        }
    }
}

fn build_prompt(
    task: &ReflectionTask,
    attempt: &FailedAttempt,
    attempt_number: u32,
    trigger: ReflectionTrigger,
    prior: &[Reflection],
) -> GeneratorPrompt {
    let mut user = format!(
        "Task: {}\nAttempt number: {}\nFailure trigger: {}\n\nApproach taken:\n{}\n\nOutput:\n{}\n",
        task.description,
        attempt_number,
        trigger.as_str(),
        attempt.approach,
        attempt.output,
    );
    if !attempt.errors.is_empty() {
        user.push_str("\nErrors:\n");
        for error in &attempt.errors {
            user.push_str("- ");
            user.push_str(error);
            user.push('\n');
        }
    }
    if !attempt.metrics.is_empty() {
        let mut keys: Vec<&String> = attempt.metrics.keys().collect();
        keys.sort();
        user.push_str("\nMetrics:\n");
        for key in keys {
            user.push_str(&format!("- {}: {}\n", key, attempt.metrics[key]));
        }
    }
    if !prior.is_empty() {
        user.push_str("\nPrior reflections on this task:\n");
        for r in prior {
            user.push_str(&format!(
                "- attempt {}: {}\n",
                r.attempt_number, r.root_cause.description
            ));
        }
    }
    GeneratorPrompt {
        system: REFLECTION_SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Extract and deserialize the JSON object from a generator response. The
/// response may wrap the object in a fenced code block or surround it with
/// prose.
fn parse_reflection(text: &str) -> Option<ReflectionDraft> {
    let fenced = Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```")
        .ok()?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let candidate = fenced.or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        (start < end).then(|| text[start..=end].to_string())
    })?;

    serde_json::from_str(&candidate).ok()
}

/// Deterministic reflection used when structured analysis is unavailable.
/// Carries no pattern names, so fallback output never pollutes the pattern
/// library.
fn fallback_draft(attempt: &FailedAttempt, trigger: ReflectionTrigger) -> ReflectionDraft {
    let first_error = attempt
        .errors
        .first()
        .cloned()
        .unwrap_or_else(|| "no error output captured".to_string());
    let (description, approach) = match trigger {
        ReflectionTrigger::TestFailure => (
            format!("Tests failed: {}", first_error),
            "Re-read the failing test expectations and adjust the implementation to match them"
                .to_string(),
        ),
        ReflectionTrigger::BuildError => (
            format!("Build failed: {}", first_error),
            "Fix the reported compile errors before changing behavior".to_string(),
        ),
        ReflectionTrigger::ValidationError => (
            format!("Validation failed: {}", first_error),
            "Check the produced output against the stated acceptance criteria".to_string(),
        ),
        ReflectionTrigger::RuntimeError => (
            format!("Runtime error: {}", first_error),
            "Reproduce the crash locally and guard the failing code path".to_string(),
        ),
        ReflectionTrigger::Timeout => (
            format!("Attempt timed out: {}", first_error),
            "Break the work into smaller steps and retry the smallest failing piece".to_string(),
        ),
        ReflectionTrigger::Unknown => (
            format!("Attempt failed: {}", first_error),
            "Retry with closer attention to the reported errors".to_string(),
        ),
    };
    ReflectionDraft {
        root_cause: RootCause {
            description,
            reasoning: "Structured analysis unavailable; derived from the raw error output"
                .to_string(),
        },
        incorrect_assumptions: Vec::new(),
        improved_strategy: ImprovedStrategy {
            approach,
            implementation_steps: vec![
                "Review the error output".to_string(),
                "Apply the corrected approach".to_string(),
                "Re-run the failing step".to_string(),
            ],
            validation_plan: "Confirm the original failure no longer reproduces".to_string(),
        },
        lessons_learned: Vec::new(),
    }
}
