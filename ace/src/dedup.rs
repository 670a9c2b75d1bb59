//! Semantic deduplication of freshly curated tips.
//!
//! New tips are compared against established ones only. With an [`Embedder`]
//! a new tip is a duplicate when its cosine similarity to any established tip
//! exceeds the threshold; without one (or when embedding fails) a
//! case-insensitive equality / substring check is used instead.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::playbook::DuplicateFinder;
use crate::io::config::DedupConfig;
use crate::io::embedding::Embedder;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

pub struct Deduplicator {
    embedder: Option<Box<dyn Embedder>>,
    threshold: f32,
}

impl Deduplicator {
    /// Embedding-backed deduplicator.
    pub fn new(embedder: impl Embedder + 'static, threshold: f32) -> Self {
        Self {
            embedder: Some(Box::new(embedder)),
            threshold,
        }
    }

    /// Embedding-backed deduplicator using the configured similarity threshold.
    pub fn from_config(embedder: impl Embedder + 'static, config: &DedupConfig) -> Self {
        Self::new(embedder, config.similarity_threshold)
    }

    /// Deduplicator that only does substring matching.
    pub fn substring_only() -> Self {
        Self {
            embedder: None,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn by_embedding(
        &self,
        embedder: &dyn Embedder,
        new_ids: &[&String],
        new_contents: &[String],
        existing_contents: &[String],
    ) -> Result<Vec<String>> {
        let new_vectors = embedder.embed_batch(new_contents)?;
        let existing_vectors = embedder.embed_batch(existing_contents)?;
        let mismatched = new_vectors.len() != new_contents.len()
            || existing_vectors.len() != existing_contents.len();
        if mismatched {
            return Err(anyhow!(
                "embedder returned {}+{} vectors for {}+{} texts",
                new_vectors.len(),
                existing_vectors.len(),
                new_contents.len(),
                existing_contents.len()
            ));
        }
        Ok(new_ids
            .iter()
            .zip(&new_vectors)
            .filter(|(_, candidate)| {
                existing_vectors
                    .iter()
                    .any(|existing| cosine_similarity(candidate, existing) > self.threshold)
            })
            .map(|(id, _)| (*id).clone())
            .collect())
    }
}

impl DuplicateFinder for Deduplicator {
    fn find_duplicates(
        &self,
        new_tips: &BTreeMap<String, String>,
        existing_tips: &BTreeMap<String, String>,
    ) -> Vec<String> {
        if new_tips.is_empty() || existing_tips.is_empty() {
            return Vec::new();
        }
        let new_ids: Vec<&String> = new_tips.keys().collect();
        let new_contents: Vec<String> = new_tips.values().cloned().collect();
        let existing_contents: Vec<String> = existing_tips.values().cloned().collect();

        if let Some(embedder) = self.embedder.as_deref() {
            match self.by_embedding(embedder, &new_ids, &new_contents, &existing_contents) {
                Ok(duplicates) => {
                    info!(
                        duplicates = duplicates.len(),
                        candidates = new_tips.len(),
                        "embedding deduplication finished"
                    );
                    return duplicates;
                }
                Err(err) => warn!(error = %err, "embedding failed; falling back to substring matching"),
            }
        }

        debug!("using substring matching for deduplication");
        let duplicates = substring_duplicates(new_tips, &existing_contents);
        info!(
            duplicates = duplicates.len(),
            candidates = new_tips.len(),
            "substring deduplication finished"
        );
        duplicates
    }
}

fn substring_duplicates(
    new_tips: &BTreeMap<String, String>,
    existing_contents: &[String],
) -> Vec<String> {
    let existing_lower: Vec<String> = existing_contents.iter().map(|c| c.to_lowercase()).collect();
    new_tips
        .iter()
        .filter(|(_, content)| {
            let candidate = content.to_lowercase();
            existing_lower
                .iter()
                .any(|other| candidate.contains(other.as_str()) || other.contains(&candidate))
        })
        .map(|(id, _)| id.clone())
        .collect()
}

/// Cosine similarity in `[-1, 1]`; 0.0 for empty, mismatched, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
