//! The playbook: a sectioned store of heuristic tips the agent consults.
//!
//! Ids are unique across the whole playbook. Every id listed under a section
//! exists in the tip map, and a section whose last tip is removed disappears.
//! All mutation goes through the CRUD methods or [`Playbook::apply_delta`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::delta::{DeltaBatch, DeltaOperation, OperationKind};

/// Single playbook entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    pub id: String,
    pub section: String,
    pub content: String,
    #[serde(default)]
    pub scenario_tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Reflector feedback counters. Omitted from JSON while zero.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub helpful: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub harmful: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub neutral: u32,
}

impl Tip {
    fn new(id: String, section: String, content: String) -> Self {
        let now = timestamp();
        Self {
            id,
            section,
            content,
            scenario_tags: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
            helpful: 0,
            harmful: 0,
            neutral: 0,
        }
    }

    /// Append tags not already present, keeping insertion order.
    pub fn apply_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            let tag = tag.as_ref();
            if self.scenario_tags.iter().any(|existing| existing == tag) {
                warn!(tip_id = %self.id, tag, "tag already present on tip");
                continue;
            }
            self.scenario_tags.push(tag.to_string());
        }
    }
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Reflector verdict on how a tip influenced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackTag {
    Helpful,
    Harmful,
    Neutral,
}

impl FeedbackTag {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "helpful" => Some(Self::Helpful),
            "harmful" => Some(Self::Harmful),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Counts returned by [`Playbook::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybookStats {
    pub sections: usize,
    pub tips: usize,
    pub scenario_tags: usize,
}

/// A delta operation that changed the playbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub kind: OperationKind,
    pub tip_id: String,
}

/// Why a delta operation was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingTipId,
    MissingContent,
    MissingSection,
    UnknownTip,
}

/// A delta operation that left the playbook untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub index: usize,
    pub kind: OperationKind,
    pub tip_id: Option<String>,
    pub reason: SkipReason,
}

/// Per-operation record of a [`Playbook::apply_delta`] call, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaReport {
    pub outcomes: Vec<Result<Applied, Skipped>>,
}

impl DeltaReport {
    pub fn applied(&self) -> impl Iterator<Item = &Applied> {
        self.outcomes.iter().filter_map(|outcome| outcome.as_ref().ok())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Skipped> {
        self.outcomes.iter().filter_map(|outcome| outcome.as_ref().err())
    }

    /// Ids of tips created by `ADD` operations in this batch.
    pub fn added_ids(&self) -> Vec<String> {
        self.applied()
            .filter(|applied| applied.kind == OperationKind::Add)
            .map(|applied| applied.tip_id.clone())
            .collect()
    }
}

/// Decides which candidate tips duplicate established ones.
///
/// Implementations must only return ids drawn from `new_tips`.
pub trait DuplicateFinder {
    fn find_duplicates(
        &self,
        new_tips: &BTreeMap<String, String>,
        existing_tips: &BTreeMap<String, String>,
    ) -> Vec<String>;
}

/// Structured context store consulted and refined by the adaptation loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default)]
    tips: BTreeMap<String, Tip>,
    #[serde(default)]
    sections: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    next_id: u64,
}

impl Playbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tip and return its id.
    ///
    /// A missing or already-taken `tip_id` is replaced by a generated one.
    pub fn add_tip(
        &mut self,
        section: &str,
        content: &str,
        tip_id: Option<&str>,
        scenario_tags: &[String],
    ) -> String {
        let id = match tip_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) if !self.tips.contains_key(id) => id.to_string(),
            _ => self.generate_id(section),
        };
        let mut tip = Tip::new(id.clone(), section.to_string(), content.to_string());
        tip.apply_tags(scenario_tags);
        self.tips.insert(id.clone(), tip);
        self.sections
            .entry(section.to_string())
            .or_default()
            .push(id.clone());
        debug!(tip_id = %id, section, "added tip");
        id
    }

    /// Replace content and/or union tags. Returns `false` for an unknown id.
    pub fn update_tip(
        &mut self,
        tip_id: &str,
        content: Option<&str>,
        scenario_tags: &[String],
    ) -> bool {
        let Some(tip) = self.tips.get_mut(tip_id) else {
            return false;
        };
        if let Some(content) = content {
            tip.content = content.to_string();
        }
        tip.apply_tags(scenario_tags);
        tip.updated_at = timestamp();
        true
    }

    /// Union tags into an existing tip. Returns `false` for an unknown id.
    pub fn tag_tip(&mut self, tip_id: &str, tags: &[String]) -> bool {
        let Some(tip) = self.tips.get_mut(tip_id) else {
            return false;
        };
        tip.apply_tags(tags);
        true
    }

    /// Delete a tip, pruning its section when it was the last entry.
    pub fn remove_tip(&mut self, tip_id: &str) -> Option<Tip> {
        let tip = self.tips.remove(tip_id)?;
        if let Some(ids) = self.sections.get_mut(&tip.section) {
            ids.retain(|id| id != tip_id);
            if ids.is_empty() {
                self.sections.remove(&tip.section);
            }
        }
        debug!(tip_id, section = %tip.section, "removed tip");
        Some(tip)
    }

    /// Bump the helpful/harmful/neutral counter named by `tag`.
    pub fn record_feedback(&mut self, tip_id: &str, tag: &str) -> bool {
        let Some(tag) = FeedbackTag::parse(tag) else {
            return false;
        };
        let Some(tip) = self.tips.get_mut(tip_id) else {
            return false;
        };
        match tag {
            FeedbackTag::Helpful => tip.helpful += 1,
            FeedbackTag::Harmful => tip.harmful += 1,
            FeedbackTag::Neutral => tip.neutral += 1,
        }
        true
    }

    pub fn get_tip(&self, tip_id: &str) -> Option<&Tip> {
        self.tips.get(tip_id)
    }

    pub fn tips(&self) -> impl Iterator<Item = &Tip> {
        self.tips.values()
    }

    /// Tip ids of `section` in insertion order.
    pub fn section(&self, section: &str) -> Option<&[String]> {
        self.sections.get(section).map(Vec::as_slice)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.tips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tips.is_empty()
    }

    /// Apply every operation in order. Bad operations are recorded as skipped.
    pub fn apply_delta(&mut self, batch: &DeltaBatch) -> DeltaReport {
        let mut report = DeltaReport::default();
        for (index, op) in batch.operations.iter().enumerate() {
            let outcome = self.apply_operation(index, op);
            if let Err(skipped) = &outcome {
                warn!(
                    index,
                    kind = skipped.kind.as_str(),
                    tip_id = ?skipped.tip_id,
                    reason = ?skipped.reason,
                    "skipped delta operation"
                );
            }
            report.outcomes.push(outcome);
        }
        report
    }

    fn apply_operation(
        &mut self,
        index: usize,
        op: &DeltaOperation,
    ) -> Result<Applied, Skipped> {
        let skip = |reason| Skipped {
            index,
            kind: op.kind,
            tip_id: op.tip_id.clone(),
            reason,
        };
        match op.kind {
            OperationKind::Add => {
                let content = op
                    .content
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| skip(SkipReason::MissingContent))?;
                if op.section.trim().is_empty() {
                    return Err(skip(SkipReason::MissingSection));
                }
                let tip_id = self.add_tip(
                    &op.section,
                    content,
                    op.tip_id.as_deref(),
                    &op.scenario_tags,
                );
                Ok(Applied {
                    kind: op.kind,
                    tip_id,
                })
            }
            OperationKind::Update | OperationKind::Tag | OperationKind::Remove => {
                let tip_id = op
                    .tip_id
                    .as_deref()
                    .ok_or_else(|| skip(SkipReason::MissingTipId))?;
                let changed = match op.kind {
                    OperationKind::Update => {
                        self.update_tip(tip_id, op.content.as_deref(), &op.scenario_tags)
                    }
                    OperationKind::Tag => self.tag_tip(tip_id, &op.scenario_tags),
                    _ => self.remove_tip(tip_id).is_some(),
                };
                if !changed {
                    return Err(skip(SkipReason::UnknownTip));
                }
                Ok(Applied {
                    kind: op.kind,
                    tip_id: tip_id.to_string(),
                })
            }
        }
    }

    /// Remove the subset of `tip_ids` that duplicates the rest of the playbook.
    ///
    /// Only ids in `tip_ids` are ever removed; established tips are kept.
    pub fn deduplicate<D: DuplicateFinder + ?Sized>(
        &mut self,
        finder: &D,
        tip_ids: &[String],
    ) -> Vec<String> {
        let new_tips: BTreeMap<String, String> = tip_ids
            .iter()
            .filter_map(|id| {
                self.tips
                    .get(id)
                    .map(|tip| (id.clone(), tip.content.clone()))
            })
            .collect();
        let existing_tips: BTreeMap<String, String> = self
            .tips
            .iter()
            .filter(|(id, _)| !new_tips.contains_key(*id))
            .map(|(id, tip)| (id.clone(), tip.content.clone()))
            .collect();

        let mut removed = Vec::new();
        for id in finder.find_duplicates(&new_tips, &existing_tips) {
            if !new_tips.contains_key(&id) {
                warn!(tip_id = %id, "duplicate finder returned an established tip; ignoring");
                continue;
            }
            if self.remove_tip(&id).is_some() {
                removed.push(id);
            }
        }
        removed
    }

    /// Render all tips for inclusion in a prompt.
    pub fn as_prompt(&self) -> String {
        let mut lines = Vec::with_capacity(self.tips.len());
        for ids in self.sections.values() {
            for id in ids {
                let Some(tip) = self.tips.get(id) else {
                    continue;
                };
                lines.push(format!(
                    "- [{}] {} [{}]",
                    tip.id,
                    tip.content,
                    tip.scenario_tags.join(", ")
                ));
            }
        }
        lines.join("\n")
    }

    pub fn stats(&self) -> PlaybookStats {
        let tags: HashSet<&str> = self
            .tips
            .values()
            .flat_map(|tip| tip.scenario_tags.iter().map(String::as_str))
            .collect();
        PlaybookStats {
            sections: self.sections.len(),
            tips: self.tips.len(),
            scenario_tags: tags.len(),
        }
    }

    /// Serialize the full state, including the id counter.
    pub fn dumps(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize playbook")
    }

    /// Restore a playbook produced by [`Playbook::dumps`].
    pub fn loads(data: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(data).context("parse playbook json")?;
        if !value.is_object() {
            return Err(anyhow!("playbook serialization must be a JSON object"));
        }
        serde_json::from_value(value).context("deserialize playbook")
    }

    /// Check invariants JSON cannot express. Empty means valid.
    pub fn validate_invariants(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut listed = BTreeSet::new();

        for (section, ids) in &self.sections {
            if ids.is_empty() {
                errors.push(format!("section '{section}' has no tips"));
            }
            for id in ids {
                if !listed.insert(id.as_str()) {
                    errors.push(format!("tip '{id}' listed more than once"));
                }
                match self.tips.get(id) {
                    None => errors.push(format!("section '{section}' lists unknown tip '{id}'")),
                    Some(tip) if tip.section != *section => errors.push(format!(
                        "tip '{id}' belongs to '{}' but is listed under '{section}'",
                        tip.section
                    )),
                    Some(_) => {}
                }
            }
        }

        for (id, tip) in &self.tips {
            if tip.id != *id {
                errors.push(format!("tip keyed '{id}' carries id '{}'", tip.id));
            }
            if !listed.contains(id.as_str()) {
                errors.push(format!("tip '{id}' is not listed in any section"));
            }
        }
        errors
    }

    /// Next unused `{prefix}-{counter:05}`; counter values taken by explicit ids are skipped.
    fn generate_id(&mut self, section: &str) -> String {
        let prefix = section
            .split_whitespace()
            .next()
            .map(str::to_lowercase)
            .unwrap_or_else(|| "tip".to_string());
        loop {
            self.next_id += 1;
            let id = format!("{prefix}-{:05}", self.next_id);
            if !self.tips.contains_key(&id) {
                return id;
            }
        }
    }
}
