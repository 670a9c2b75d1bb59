//! LLM-backed roles: [`Generator`], [`Reflector`], [`Curator`].
//!
//! Every role renders its prompt, calls the [`LlmClient`], and parses the
//! response against a [`Schema`]. An unparsable response is retried with a
//! corrective instruction appended, up to `max_retries` attempts in total.

mod curator;
mod generator;
mod reflector;

use std::borrow::Cow;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::parse::{ParseError, Schema, parse_response};
use crate::io::llm::{CompletionOptions, LlmClient};

pub use curator::{CURATOR_SCHEMA, Curator};
pub use generator::{GENERATOR_SCHEMA, Generator};
pub use reflector::{REFLECTOR_SCHEMA, Reflector};

/// Default attempts per role call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Appended to the prompt after an unparsable response.
pub const CORRECTIVE_SUFFIX: &str = "\n\nIMPORTANT: You must output a single Text object only. \
Obey the Markdown format strictly. \
Do not include any explanations or text outside the required format.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Generator,
    Reflector,
    Curator,
}

impl RoleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::Reflector => "reflector",
            Self::Curator => "curator",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RoleError {
    #[error("{role} produced no parsable response after {attempts} attempts")]
    RetriesExhausted {
        role: RoleKind,
        attempts: u32,
        #[source]
        source: ParseError,
    },
    #[error("{role} completion backend failed")]
    Backend {
        role: RoleKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("{role} prompt could not be rendered")]
    Prompt {
        role: RoleKind,
        #[source]
        source: anyhow::Error,
    },
}

impl RoleError {
    pub fn role(&self) -> RoleKind {
        match self {
            Self::RetriesExhausted { role, .. }
            | Self::Backend { role, .. }
            | Self::Prompt { role, .. } => *role,
        }
    }
}

/// Task currently being processed, attached to role log events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskContext {
    pub task_id: Option<String>,
    pub step: Option<u32>,
}

impl TaskContext {
    fn task_id(&self) -> &str {
        self.task_id.as_deref().unwrap_or("unknown")
    }
}

/// Behavior shared by all roles.
pub trait Role {
    fn kind(&self) -> RoleKind;

    /// Tag subsequent log events with the task (and interaction step) in progress.
    fn set_task_context(&mut self, task_id: &str, step: Option<u32>);
}

/// Complete and parse, retrying unparsable responses with [`CORRECTIVE_SUFFIX`].
///
/// Backend errors are returned immediately.
fn complete_parsed<L: LlmClient + ?Sized>(
    llm: &L,
    role: RoleKind,
    base_prompt: &str,
    schema: &Schema,
    max_retries: u32,
    options: &CompletionOptions,
) -> Result<Map<String, Value>, RoleError> {
    let attempts = max_retries.max(1);
    let mut prompt = Cow::Borrowed(base_prompt);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let completion = llm
            .complete(&prompt, options)
            .map_err(|source| RoleError::Backend { role, source })?;
        debug!(
            role = role.as_str(),
            attempt,
            prompt_tokens = completion.prompt_tokens,
            completion_tokens = completion.completion_tokens,
            total_tokens = completion.total_tokens,
            response = %completion.text,
            "llm response"
        );
        match parse_response(&completion.text, schema) {
            Ok(fields) => return Ok(fields),
            Err(source) if attempt >= attempts => {
                return Err(RoleError::RetriesExhausted {
                    role,
                    attempts,
                    source,
                });
            }
            Err(err) => {
                warn!(role = role.as_str(), attempt, error = %err, "unparsable response; retrying");
                prompt = Cow::Owned(format!("{base_prompt}{CORRECTIVE_SUFFIX}"));
            }
        }
    }
}

fn field_text(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
