use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use super::{
    DEFAULT_MAX_RETRIES, Role, RoleError, RoleKind, TaskContext, complete_parsed, field_text,
};
use crate::core::parse::{FieldKind, Schema};
use crate::core::types::{BulletTag, ReflectorOutput};
use crate::io::llm::{CompletionOptions, LlmClient};
use crate::io::prompt::{ReflectorPrompt, render_reflector};

pub const REFLECTOR_SCHEMA: Schema = Schema(&[
    ("reasoning", FieldKind::Text),
    ("error_identification", FieldKind::Text),
    ("root_cause_analysis", FieldKind::Text),
    ("correct_approach", FieldKind::Text),
    ("key_insight", FieldKind::Text),
    ("bullet_tags", FieldKind::List),
]);

/// Diagnoses a finished attempt and tags the playbook tips it used.
pub struct Reflector {
    llm: Box<dyn LlmClient>,
    max_retries: u32,
    context: TaskContext,
}

impl Reflector {
    pub fn new(llm: impl LlmClient + 'static) -> Self {
        Self {
            llm: Box::new(llm),
            max_retries: DEFAULT_MAX_RETRIES,
            context: TaskContext::default(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Run up to `max_refinement_rounds` rounds, stopping at the first
    /// actionable reflection (bullet tags or a key insight).
    ///
    /// Fails only when no round produced a parsable response.
    #[instrument(skip_all, fields(task_id = self.context.task_id(), rounds = max_refinement_rounds))]
    pub fn reflect(
        &self,
        input: &ReflectorPrompt<'_>,
        max_refinement_rounds: u32,
    ) -> Result<ReflectorOutput, RoleError> {
        let keys: Vec<&str> = REFLECTOR_SCHEMA.keys().collect();
        let prompt = render_reflector(input, &keys).map_err(|source| RoleError::Prompt {
            role: self.kind(),
            source,
        })?;

        let rounds = max_refinement_rounds.max(1);
        let mut latest: Option<ReflectorOutput> = None;
        for round in 0..rounds {
            let options = CompletionOptions {
                refinement_round: Some(round),
            };
            match complete_parsed(
                self.llm.as_ref(),
                self.kind(),
                &prompt,
                &REFLECTOR_SCHEMA,
                self.max_retries,
                &options,
            ) {
                Ok(fields) => {
                    let candidate = reflection_from_fields(fields);
                    if candidate.is_actionable() {
                        info!(round, tags = candidate.bullet_tags.len(), "reflection ready");
                        return Ok(candidate);
                    }
                    latest = Some(candidate);
                }
                Err(err @ RoleError::RetriesExhausted { .. })
                    if round + 1 < rounds || latest.is_some() =>
                {
                    warn!(round, error = %err, "refinement round failed");
                }
                Err(err) => return Err(err),
            }
        }
        // The final round either stored a reflection or returned its error.
        Ok(latest.unwrap_or_default())
    }
}

fn reflection_from_fields(fields: Map<String, Value>) -> ReflectorOutput {
    let bullet_tags = match fields.get("bullet_tags") {
        Some(Value::Array(items)) => items.iter().filter_map(bullet_tag).collect(),
        _ => Vec::new(),
    };
    ReflectorOutput {
        reasoning: field_text(&fields, "reasoning"),
        error_identification: field_text(&fields, "error_identification"),
        root_cause_analysis: field_text(&fields, "root_cause_analysis"),
        correct_approach: field_text(&fields, "correct_approach"),
        key_insight: field_text(&fields, "key_insight"),
        bullet_tags,
        raw: fields,
    }
}

fn bullet_tag(item: &Value) -> Option<BulletTag> {
    let object = item.as_object()?;
    let text = |key: &str| match object.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    };
    Some(BulletTag {
        id: text("id")?,
        tag: text("tag")?.to_lowercase(),
    })
}

impl Role for Reflector {
    fn kind(&self) -> RoleKind {
        RoleKind::Reflector
    }

    fn set_task_context(&mut self, task_id: &str, step: Option<u32>) {
        self.context = TaskContext {
            task_id: Some(task_id.to_string()),
            step,
        };
    }
}
