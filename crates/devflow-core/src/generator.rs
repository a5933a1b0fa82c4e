//! Generator capability boundary.
//!
//! The content-generation step that actually produces code, designs, and
//! reflections lives outside this crate (LLM API, subprocess, whatever the
//! host supplies). This module defines the in-process contract: a prompt
//! pair in, text plus a success signal out. Calls must be safe to repeat
//! with identical input.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed future used across this crate's callback seams.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Prompt handed to the generator: a system/instruction part and the user
/// part built from the task at hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorPrompt {
    pub system: String,
    pub user: String,
}

/// Response from a generator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorResponse {
    /// The generated text.
    pub text: String,
    /// Whether the call succeeded.
    pub succeeded: bool,
    /// Error message if it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeneratorResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            succeeded: true,
            error: None,
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            succeeded: false,
            error: Some(msg.into()),
        }
    }
}

/// The external generation capability.
///
/// Implementations must be cheap to clone behind an `Arc` and callable from
/// multiple tasks concurrently.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: GeneratorPrompt) -> BoxFuture<GeneratorResponse>;
}
