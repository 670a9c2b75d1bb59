//! Text embedding backend abstraction used by deduplication.

use anyhow::Result;

pub trait Embedder {
    /// Embed every text, preserving order. One vector per input.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }
}
