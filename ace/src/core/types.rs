//! Shared data types passed between the adapter, the roles, and callers.
//!
//! These are plain data: no I/O, serializable so callers can persist step
//! results however they like.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::delta::DeltaBatch;
use crate::core::trajectory::{ExecutionStatus, Trajectory};

/// Supervisor identity handed to the generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleMetadata {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
}

/// One task to attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub task_id: String,
    /// Natural-language task instruction.
    pub question: String,
    /// Reference solution, when the dataset provides one.
    #[serde(default)]
    pub ground_truth: Option<String>,
    #[serde(default)]
    pub metadata: SampleMetadata,
}

impl Sample {
    pub fn new(task_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            question: question.into(),
            ground_truth: None,
            metadata: SampleMetadata::default(),
        }
    }

    pub fn with_ground_truth(mut self, ground_truth: impl Into<String>) -> Self {
        self.ground_truth = Some(ground_truth.into());
        self
    }

    pub fn with_metadata(mut self, metadata: SampleMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Context block handed to the curator.
    pub fn question_context(&self) -> String {
        let metadata = serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string());
        format!(
            "question: {}\nmetadata: {}\nground_truth: {}",
            self.question,
            metadata,
            self.ground_truth.as_deref().unwrap_or("(none)")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOutput {
    pub reasoning: String,
    pub bullet_ids: Vec<String>,
    /// Answer text as written by the model, possibly a fenced code block.
    pub final_answer: String,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

/// Reflector verdict on one playbook tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletTag {
    pub id: String,
    /// Lowercased `helpful`, `harmful`, or `neutral`.
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectorOutput {
    pub reasoning: String,
    pub error_identification: String,
    pub root_cause_analysis: String,
    pub correct_approach: String,
    pub key_insight: String,
    pub bullet_tags: Vec<BulletTag>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl ReflectorOutput {
    /// Placeholder used when no reflection runs.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_actionable(&self) -> bool {
        !self.bullet_tags.is_empty() || !self.key_insight.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CuratorOutput {
    pub delta: DeltaBatch,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl CuratorOutput {
    /// Placeholder used when no curation runs.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub execution_status: ExecutionStatus,
    pub num_steps: usize,
    pub tgc: f64,
    pub unit_tests_passed: u32,
    pub unit_tests_total: u32,
}

/// What the environment said about a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentResult {
    pub feedback: String,
    pub ground_truth: Option<String>,
    /// Raw evaluation report.
    pub unit_test_report: String,
    pub metrics: TaskMetrics,
}

/// Which pass produced a step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Test,
    Online,
    Baseline,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
            Self::Online => "online",
            Self::Baseline => "baseline",
        }
    }

    /// Whether this pass updates the playbook.
    pub fn learns(self) -> bool {
        matches!(self, Self::Train | Self::Online)
    }
}

/// Everything produced while processing one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterStepResult {
    pub sample: Sample,
    pub phase: Phase,
    pub epoch: u32,
    /// Last generator output; `None` if the first generation failed.
    pub generator_output: Option<GeneratorOutput>,
    pub environment_result: EnvironmentResult,
    pub reflection: ReflectorOutput,
    pub curator_output: CuratorOutput,
    pub trajectory: Trajectory,
    /// `Playbook::as_prompt` after this sample.
    pub playbook_snapshot: String,
}

impl AdapterStepResult {
    pub fn execution_status(&self) -> ExecutionStatus {
        self.environment_result.metrics.execution_status
    }

    pub fn tgc(&self) -> f64 {
        self.environment_result.metrics.tgc
    }
}
