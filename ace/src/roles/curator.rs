use serde_json::Value;
use tracing::{instrument, warn};

use super::{DEFAULT_MAX_RETRIES, Role, RoleError, RoleKind, TaskContext, complete_parsed};
use crate::core::delta::DeltaBatch;
use crate::core::parse::{FieldKind, Schema};
use crate::core::types::CuratorOutput;
use crate::io::llm::{CompletionOptions, LlmClient};
use crate::io::prompt::{CuratorPrompt, render_curator};

pub const CURATOR_SCHEMA: Schema = Schema(&[
    ("reasoning", FieldKind::Text),
    ("operations", FieldKind::List),
]);

/// Turns recent reflections into playbook delta operations.
pub struct Curator {
    llm: Box<dyn LlmClient>,
    max_retries: u32,
    context: TaskContext,
}

impl Curator {
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

    #[instrument(skip_all, fields(task_id = self.context.task_id()))]
    pub fn curate(&self, input: &CuratorPrompt<'_>) -> Result<CuratorOutput, RoleError> {
        let keys: Vec<&str> = CURATOR_SCHEMA.keys().collect();
        let prompt = render_curator(input, &keys).map_err(|source| RoleError::Prompt {
            role: self.kind(),
            source,
        })?;
        let fields = complete_parsed(
            self.llm.as_ref(),
            self.kind(),
            &prompt,
            &CURATOR_SCHEMA,
            self.max_retries,
            &CompletionOptions::default(),
        )?;

        if !matches!(fields.get("operations"), Some(Value::Array(_))) {
            warn!("curator operations are not a list; treating as empty");
        }
        let delta = DeltaBatch::from_value(&Value::Object(fields.clone()));
        Ok(CuratorOutput { delta, raw: fields })
    }
}

impl Role for Curator {
    fn kind(&self) -> RoleKind {
        RoleKind::Curator
    }

    fn set_task_context(&mut self, task_id: &str, step: Option<u32>) {
        self.context = TaskContext {
            task_id: Some(task_id.to_string()),
            step,
        };
    }
}
