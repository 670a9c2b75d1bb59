//! Scripted collaborators and builders for tests.
//!
//! The doubles share their state through `Rc<RefCell<..>>`, so a test can hand
//! a clone to a role or adapter and still inspect the calls afterwards.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::types::{Sample, SampleMetadata};
use crate::io::embedding::Embedder;
use crate::io::environment::{Environment, EvaluateOptions, EvaluationOutput, ExecutionOutput};
use crate::io::llm::{Completion, CompletionOptions, LlmClient};

#[derive(Debug, Default)]
struct LlmState {
    responses: VecDeque<String>,
    prompts: Vec<String>,
    options: Vec<CompletionOptions>,
}

/// LLM double replaying canned responses in order.
///
/// Once the script runs out every call fails like a backend error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLlm {
    state: Rc<RefCell<LlmState>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let llm = Self::default();
        llm.state
            .borrow_mut()
            .responses
            .extend(responses.into_iter().map(Into::into));
        llm
    }

    pub fn push(&self, response: impl Into<String>) {
        self.state.borrow_mut().responses.push_back(response.into());
    }

    pub fn calls(&self) -> usize {
        self.state.borrow().prompts.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.borrow().prompts.clone()
    }

    pub fn options(&self) -> Vec<CompletionOptions> {
        self.state.borrow().options.clone()
    }

    pub fn remaining(&self) -> usize {
        self.state.borrow().responses.len()
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        let mut state = self.state.borrow_mut();
        state.prompts.push(prompt.to_string());
        state.options.push(*options);
        state
            .responses
            .pop_front()
            .map(Completion::text)
            .ok_or_else(|| anyhow!("scripted llm has no responses left"))
    }
}

/// Environment call recorded by [`ScriptedEnvironment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvCall {
    Initialize { task_id: String, experiment: String },
    Execute { task_id: String, code: String },
    CheckCompleted { task_id: String },
    Evaluate { task_id: String },
    Close { task_id: String },
}

#[derive(Debug, Default)]
struct EnvState {
    complete_after: Option<u32>,
    checks: HashMap<String, u32>,
    reports: HashMap<String, String>,
    evaluation_failures: u32,
    fail_initialize: bool,
    fail_execute: bool,
    fail_close: bool,
    calls: Vec<EnvCall>,
}

/// Environment double with configurable completion and evaluation behavior.
///
/// By default tasks never complete and every report is `1/1` passed.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEnvironment {
    state: Rc<RefCell<EnvState>>,
}

impl ScriptedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report completion on the `checks`-th completion check of each task.
    pub fn completing_after(self, checks: u32) -> Self {
        self.state.borrow_mut().complete_after = Some(checks);
        self
    }

    pub fn with_report(self, task_id: &str, report: impl Into<String>) -> Self {
        self.state
            .borrow_mut()
            .reports
            .insert(task_id.to_string(), report.into());
        self
    }

    /// Fail the next `count` evaluation calls.
    pub fn failing_evaluations(self, count: u32) -> Self {
        self.state.borrow_mut().evaluation_failures = count;
        self
    }

    pub fn failing_initialize(self) -> Self {
        self.state.borrow_mut().fail_initialize = true;
        self
    }

    pub fn failing_execution(self) -> Self {
        self.state.borrow_mut().fail_execute = true;
        self
    }

    pub fn failing_close(self) -> Self {
        self.state.borrow_mut().fail_close = true;
        self
    }

    pub fn calls(&self) -> Vec<EnvCall> {
        self.state.borrow().calls.clone()
    }

    pub fn executed_code(&self, task_id: &str) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                EnvCall::Execute { task_id: id, code } if id == task_id => Some(code.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn evaluations(&self, task_id: &str) -> usize {
        self.count(|call| matches!(call, EnvCall::Evaluate { task_id: id } if id == task_id))
    }

    pub fn closed(&self, task_id: &str) -> bool {
        self.count(|call| matches!(call, EnvCall::Close { task_id: id } if id == task_id)) > 0
    }

    fn count(&self, predicate: impl Fn(&EnvCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| predicate(c)).count()
    }
}

impl Environment for ScriptedEnvironment {
    fn initialize_task(&self, task_id: &str, experiment_name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(EnvCall::Initialize {
            task_id: task_id.to_string(),
            experiment: experiment_name.to_string(),
        });
        state.checks.remove(task_id);
        if state.fail_initialize {
            return Err(anyhow!("initialize failed for {task_id}"));
        }
        Ok(())
    }

    fn execute_code(&self, task_id: &str, code: &str) -> Result<ExecutionOutput> {
        let mut state = self.state.borrow_mut();
        state.calls.push(EnvCall::Execute {
            task_id: task_id.to_string(),
            code: code.to_string(),
        });
        if state.fail_execute {
            return Err(anyhow!("sandbox connection reset"));
        }
        let executed = state
            .calls
            .iter()
            .filter(|call| matches!(call, EnvCall::Execute { task_id: id, .. } if id == task_id))
            .count();
        Ok(ExecutionOutput::new(format!("ran {executed}")))
    }

    fn is_task_completed(&self, task_id: &str) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.calls.push(EnvCall::CheckCompleted {
            task_id: task_id.to_string(),
        });
        let checks = state.checks.entry(task_id.to_string()).or_insert(0);
        *checks += 1;
        let checks = *checks;
        Ok(state.complete_after.is_some_and(|after| checks >= after))
    }

    fn evaluate_task(&self, task_id: &str, _options: &EvaluateOptions) -> Result<EvaluationOutput> {
        let mut state = self.state.borrow_mut();
        state.calls.push(EnvCall::Evaluate {
            task_id: task_id.to_string(),
        });
        if state.evaluation_failures > 0 {
            state.evaluation_failures -= 1;
            return Err(anyhow!("evaluation service unavailable"));
        }
        let output = state
            .reports
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| unit_test_report(1, 1));
        Ok(EvaluationOutput { output })
    }

    fn close_task(&self, task_id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(EnvCall::Close {
            task_id: task_id.to_string(),
        });
        if state.fail_close {
            return Err(anyhow!("close failed for {task_id}"));
        }
        Ok(())
    }
}

/// Embedder double returning fixed vectors per text.
#[derive(Debug, Clone, Default)]
pub struct FixedEmbedder {
    vectors: BTreeMap<String, Vec<f32>>,
    fail: bool,
}

impl FixedEmbedder {
    pub fn new<I, S>(vectors: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        Self {
            vectors: vectors.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            fail: false,
        }
    }

    /// Embedder whose every call errors.
    pub fn failing() -> Self {
        Self {
            vectors: BTreeMap::new(),
            fail: true,
        }
    }
}

impl Embedder for FixedEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            return Err(anyhow!("embedding backend unavailable"));
        }
        texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .ok_or_else(|| anyhow!("no fixed vector for {text:?}"))
            })
            .collect()
    }
}

/// Sample with deterministic supervisor metadata.
pub fn sample(task_id: &str, question: &str) -> Sample {
    Sample::new(task_id, question)
        .with_ground_truth(format!("# reference solution for {task_id}"))
        .with_metadata(SampleMetadata {
            first_name: "Joyce".to_string(),
            last_name: "Weaver".to_string(),
            email: "joyce@example.com".to_string(),
            phone_number: "3155673041".to_string(),
        })
}

/// Evaluation report in the environment's unit-test format.
pub fn unit_test_report(passed: u32, total: u32) -> String {
    format!(
        "──── Overall Stats ────\nNum Passed Tests : {passed}\nNum Failed Tests : {}\nNum Total  Tests : {total}",
        total.saturating_sub(passed)
    )
}

/// Markdown generator response.
pub fn generator_response(reasoning: &str, bullet_ids: &[&str], code: &str) -> String {
    let ids = serde_json::to_string(bullet_ids).unwrap_or_else(|_| "[]".to_string());
    format!(
        "### Reasoning\n{reasoning}\n\n### Bullet IDs\n{ids}\n\n### Final Answer\n```python\n{code}\n```"
    )
}

/// Markdown reflector response; `bullet_tags` is the raw section body.
pub fn reflector_response(key_insight: &str, bullet_tags: &str) -> String {
    format!(
        "### Reasoning\nLooked at the trajectory.\n\n\
         ### Error Identification\nStep 1 used the wrong API.\n\n\
         ### Root Cause Analysis\nDocs were not read.\n\n\
         ### Correct Approach\nRead the docs first.\n\n\
         ### Key Insight\n{key_insight}\n\n\
         ### Bullet Tags\n{bullet_tags}"
    )
}

/// Markdown curator response; `operations` is the raw section body.
pub fn curator_response(operations: &str) -> String {
    format!("### Reasoning\nDistilled the reflection.\n\n### Operations\n{operations}")
}

/// JSON list holding one `ADD` operation.
pub fn add_operations(section: &str, content: &str) -> String {
    serde_json::json!([{
        "type": "ADD",
        "section": section,
        "content": content,
        "tip_id": null,
    }])
    .to_string()
}
