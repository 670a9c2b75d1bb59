//! Completion backend abstraction.
//!
//! The [`LlmClient`] trait decouples the roles from the actual model provider.
//! Tests use scripted clients that return predetermined responses.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Per-call options forwarded to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionOptions {
    /// Reflector refinement round, for backends that vary sampling per round.
    pub refinement_round: Option<u32>,
}

/// Text returned by the backend plus optional token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Abstraction over LLM completion backends.
pub trait LlmClient {
    /// Complete `prompt`. Errors are transport or provider failures.
    fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion>;
}

impl<T: LlmClient + ?Sized> LlmClient for Box<T> {
    fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        (**self).complete(prompt, options)
    }
}
