use serde_json::Value;
use tracing::instrument;

use super::{
    DEFAULT_MAX_RETRIES, Role, RoleError, RoleKind, TaskContext, complete_parsed, field_text,
};
use crate::core::parse::{FieldKind, Schema};
use crate::core::types::GeneratorOutput;
use crate::io::llm::{CompletionOptions, LlmClient};
use crate::io::prompt::{GeneratorPrompt, render_generator};

pub const GENERATOR_SCHEMA: Schema = Schema(&[
    ("reasoning", FieldKind::Text),
    ("bullet_ids", FieldKind::List),
    ("final_answer", FieldKind::Text),
]);

/// Proposes the next code snippet for a task.
pub struct Generator {
    llm: Box<dyn LlmClient>,
    max_retries: u32,
    context: TaskContext,
}

impl Generator {
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

    #[instrument(skip_all, fields(task_id = self.context.task_id(), step = self.context.step))]
    pub fn generate(&self, input: &GeneratorPrompt<'_>) -> Result<GeneratorOutput, RoleError> {
        let keys: Vec<&str> = GENERATOR_SCHEMA.keys().collect();
        let prompt = render_generator(input, &keys).map_err(|source| RoleError::Prompt {
            role: self.kind(),
            source,
        })?;
        let fields = complete_parsed(
            self.llm.as_ref(),
            self.kind(),
            &prompt,
            &GENERATOR_SCHEMA,
            self.max_retries,
            &CompletionOptions::default(),
        )?;

        let bullet_ids = match fields.get("bullet_ids") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(GeneratorOutput {
            reasoning: field_text(&fields, "reasoning"),
            bullet_ids,
            final_answer: field_text(&fields, "final_answer"),
            raw: fields,
        })
    }
}

impl Role for Generator {
    fn kind(&self) -> RoleKind {
        RoleKind::Generator
    }

    fn set_task_context(&mut self, task_id: &str, step: Option<u32>) {
        self.context = TaskContext {
            task_id: Some(task_id.to_string()),
            step,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SampleMetadata;
    use crate::test_support::{ScriptedLlm, generator_response};

    fn prompt_input(metadata: &SampleMetadata) -> GeneratorPrompt<'_> {
        GeneratorPrompt {
            task: "Like all songs in my queue",
            playbook: "",
            metadata,
            history: "",
        }
    }

    #[test]
    fn parses_markdown_response() {
        let llm = ScriptedLlm::new([generator_response(
            "Look up the docs",
            &["api-00001"],
            "print(apis.api_docs.show_app_descriptions())",
        )]);
        let generator = Generator::new(llm.clone());
        let metadata = SampleMetadata::default();

        let output = generator.generate(&prompt_input(&metadata)).expect("generate");

        assert_eq!(output.reasoning, "Look up the docs");
        assert_eq!(output.bullet_ids, vec!["api-00001"]);
        assert_eq!(
            output.final_answer,
            "print(apis.api_docs.show_app_descriptions())"
        );
        assert!(llm.prompts()[0].contains("Like all songs in my queue"));
    }

    #[test]
    fn parses_json_response_with_numeric_ids() {
        let llm = ScriptedLlm::new([
            r#"{"reasoning": "r", "bullet_ids": ["a-00001", 7, null], "final_answer": "x = 1"}"#,
        ]);
        let generator = Generator::new(llm);
        let metadata = SampleMetadata::default();

        let output = generator.generate(&prompt_input(&metadata)).expect("generate");
        assert_eq!(output.bullet_ids, vec!["a-00001", "7"]);
        assert_eq!(output.final_answer, "x = 1");
    }

    #[test]
    fn exhausts_retries_on_garbage() {
        let llm = ScriptedLlm::new(["garbage", "still garbage"]);
        let generator = Generator::new(llm.clone()).with_max_retries(2);
        let metadata = SampleMetadata::default();

        let err = generator.generate(&prompt_input(&metadata)).unwrap_err();
        assert!(matches!(
            err,
            RoleError::RetriesExhausted { role: RoleKind::Generator, attempts: 2, .. }
        ));
        assert_eq!(llm.calls(), 2);
    }
}
