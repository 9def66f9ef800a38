#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use leepa_memory::ai::Embedder;
use leepa_memory::error::MemoryError;

/// Lookup-table embedder; unknown text is a permanent failure.
pub struct FixedEmbedder {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
    pub calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(dim: usize, pairs: &[(&str, &[f32])]) -> Self {
        Self {
            dim,
            vectors: pairs.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| MemoryError::embedding(format!("no vector for {text:?}")))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

pub const A: &str = "the integral of x^2 is x^3/3";
pub const B: &str = "so the integral of x^3 must be x^4/4";
pub const C: &str = "anyone up for pizza tonight";
pub const QUERY: &str = "what is the integral of x^2";

/// Vectors for the integrals conversation: B is close to A, C is unrelated,
/// and the query lands next to A.
pub fn conversation_embedder() -> FixedEmbedder {
    FixedEmbedder::new(
        3,
        &[
            (A, &[1.0, 0.0, 0.0]),
            (B, &[0.8, 0.6, 0.0]),
            (C, &[0.1, 0.0, 0.99499]),
            (QUERY, &[0.95, 0.05, 0.0]),
        ],
    )
}
