//! Step-by-step record of one task attempt.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal status of an interaction loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The environment reported the task as completed.
    Completed,
    /// The loop used every interaction step without completion.
    MaxStepsReached,
    /// Generation, execution, or the completion check failed.
    Crashed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxStepsReached => "max_steps_reached",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generate/execute round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub reasoning: String,
    pub bullet_ids: Vec<String>,
    pub code: String,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trajectory {
    pub task: String,
    pub steps: Vec<Step>,
    /// `None` until the loop finishes.
    pub execution_status: Option<ExecutionStatus>,
}

impl Trajectory {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            steps: Vec::new(),
            execution_status: None,
        }
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        self.execution_status = Some(status);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// History shown to the generator on the next step. Empty before step one.
    pub fn format_for_generator(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                format!(
                    "### Step {}\nReasoning: {}\nCode:\n```python\n{}\n```\n{}",
                    idx + 1,
                    step.reasoning.trim(),
                    step.code.trim(),
                    step.observation.trim_end(),
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Full record handed to the reflector.
    pub fn format_for_reflector(&self) -> String {
        let status = self
            .execution_status
            .map(ExecutionStatus::as_str)
            .unwrap_or("in_progress");
        let mut out = format!(
            "Task: {}\nExecution status: {}\nSteps taken: {}\n",
            self.task.trim(),
            status,
            self.steps.len()
        );
        for (idx, step) in self.steps.iter().enumerate() {
            let bullets = if step.bullet_ids.is_empty() {
                "(none)".to_string()
            } else {
                step.bullet_ids.join(", ")
            };
            out.push_str(&format!(
                "\n### Step {}\nReasoning: {}\nPlaybook tips used: {}\nCode:\n```python\n{}\n```\n{}\n",
                idx + 1,
                step.reasoning.trim(),
                bullets,
                step.code.trim(),
                step.observation.trim_end(),
            ));
        }
        out
    }
}
