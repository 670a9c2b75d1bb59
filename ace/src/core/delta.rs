//! Playbook mutation commands proposed by the curator.
//!
//! Operations arrive from untrusted LLM output, so parsing is tolerant: entries
//! that are not objects or carry an unknown `type` are dropped with a warning
//! instead of failing the whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Kind of mutation carried by a [`DeltaOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Add,
    Update,
    Tag,
    Remove,
}

impl OperationKind {
    /// Parse a case-insensitive operation name (`"add"`, `"UPDATE"`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ADD" => Some(Self::Add),
            "UPDATE" => Some(Self::Update),
            "TAG" => Some(Self::Tag),
            "REMOVE" => Some(Self::Remove),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Tag => "TAG",
            Self::Remove => "REMOVE",
        }
    }
}

/// Single mutation to apply to the playbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaOperation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    #[serde(default)]
    pub section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenario_tags: Vec<String>,
}

impl DeltaOperation {
    pub fn add(section: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Add,
            section: section.into(),
            content: Some(content.into()),
            tip_id: None,
            scenario_tags: Vec::new(),
        }
    }

    pub fn update(tip_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Update,
            section: String::new(),
            content: Some(content.into()),
            tip_id: Some(tip_id.into()),
            scenario_tags: Vec::new(),
        }
    }

    pub fn tag(tip_id: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            kind: OperationKind::Tag,
            section: String::new(),
            content: None,
            tip_id: Some(tip_id.into()),
            scenario_tags: tags,
        }
    }

    pub fn remove(tip_id: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Remove,
            section: String::new(),
            content: None,
            tip_id: Some(tip_id.into()),
            scenario_tags: Vec::new(),
        }
    }

    pub fn with_tip_id(mut self, tip_id: impl Into<String>) -> Self {
        self.tip_id = Some(tip_id.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.scenario_tags = tags;
        self
    }

    /// Build an operation from loosely-typed curator output.
    ///
    /// Returns `None` when the payload is not an object or names an unknown type.
    /// `bullet_id` is accepted as an alias of `tip_id`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .and_then(OperationKind::parse)?;
        Some(Self {
            kind,
            section: object
                .get("section")
                .map(value_to_text)
                .unwrap_or_default(),
            content: object
                .get("content")
                .map(value_to_text)
                .filter(|s| !s.is_empty()),
            tip_id: object
                .get("tip_id")
                .or_else(|| object.get("bullet_id"))
                .map(value_to_text)
                .filter(|s| !s.trim().is_empty()),
            scenario_tags: object
                .get("scenario_tags")
                .map(value_to_tags)
                .unwrap_or_default(),
        })
    }
}

/// Curator reasoning plus the ordered operations it proposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaBatch {
    pub reasoning: String,
    #[serde(default)]
    pub operations: Vec<DeltaOperation>,
}

impl DeltaBatch {
    pub fn new(reasoning: impl Into<String>, operations: Vec<DeltaOperation>) -> Self {
        Self {
            reasoning: reasoning.into(),
            operations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Build a batch from a parsed `{reasoning, operations}` response.
    pub fn from_value(value: &Value) -> Self {
        let reasoning = value
            .get("reasoning")
            .map(value_to_text)
            .unwrap_or_default();
        let mut operations = Vec::new();
        if let Some(items) = value.get("operations").and_then(Value::as_array) {
            for (index, item) in items.iter().enumerate() {
                match DeltaOperation::from_value(item) {
                    Some(op) => operations.push(op),
                    None => warn!(index, payload = %item, "dropping malformed delta operation"),
                }
            }
        }
        Self {
            reasoning,
            operations,
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_tags(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|tag| !tag.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}
