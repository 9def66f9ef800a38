//! Context assembly: rank recent memories against a query, then widen the
//! best hit through spreading activation.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::ai::Embedder;
use crate::db::{MemoryDB, Node};
use crate::error::MemoryError;
use crate::graph::{spread, MemoryGraph};
use crate::similarity::cosine;
use crate::thresholds::{CONTEXT_WINDOW, DEFAULT_SPREAD_DEPTH, DEFAULT_TOP_K, SEED_MIN_SCORE};
use crate::{db_call, EmbedCache, SharedDB};

#[derive(Debug, Clone, Serialize)]
pub struct Seed {
    pub id: i64,
    pub score: f64,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextResult {
    /// Top-K by `cosine * retrieval_strength`, best first.
    pub seeds: Vec<Seed>,
    /// Reached from the best seed, ascending by id.
    pub activated: Vec<i64>,
    /// Newline-joined memory text to prepend to the prompt.
    pub block: String,
}

pub struct ContextAssembler {
    db: SharedDB,
    embedder: Arc<dyn Embedder>,
    cache: EmbedCache,
}

impl ContextAssembler {
    pub fn new(db: SharedDB, embedder: Arc<dyn Embedder>, cache: EmbedCache) -> Self {
        Self { db, embedder, cache }
    }

    pub async fn assemble(&self, query: &str, top_k: Option<usize>) -> Result<ContextResult, MemoryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MemoryError::EmptyQuery);
        }
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, CONTEXT_WINDOW);

        let qvec = match self.cache.get(query) {
            Some(v) => v,
            None => {
                let v = self.embedder.embed(query).await?;
                self.cache.insert(query.to_string(), v.clone());
                v
            }
        };

        let result = db_call(&self.db, move |db| assemble_from(db, &qvec, top_k)).await??;
        debug!(
            seeds = result.seeds.len(),
            activated = result.activated.len(),
            "context assembled"
        );
        Ok(result)
    }
}

fn assemble_from(db: &MemoryDB, qvec: &[f32], top_k: usize) -> Result<ContextResult, MemoryError> {
    let recent = db.get_recent_nodes(CONTEXT_WINDOW)?;
    let ranked = rank(recent, qvec, top_k);
    let Some((top, _)) = ranked.first() else {
        return Ok(ContextResult::default());
    };

    let graph = MemoryGraph::build(db)?;
    let mut activated: Vec<i64> = spread(&graph, top.id, DEFAULT_SPREAD_DEPTH).into_iter().collect();
    activated.sort_unstable();
    let activated_nodes = db.get_nodes(&activated)?;

    let extra_seeds = ranked
        .iter()
        .skip(1)
        .filter(|(_, score)| *score >= SEED_MIN_SCORE)
        .map(|(n, _)| n);
    let mut seen = HashSet::new();
    let block = std::iter::once(top)
        .chain(activated_nodes.iter())
        .chain(extra_seeds)
        .filter(|n| seen.insert(n.id))
        .map(|n| n.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let seeds = ranked
        .iter()
        .map(|(n, score)| Seed { id: n.id, score: *score, content: n.content.clone() })
        .collect();
    Ok(ContextResult { seeds, activated, block })
}

/// Score and keep the best `top_k`. `recent` arrives newest first and the
/// sort is stable, so ties go to the newer node.
fn rank(recent: Vec<Node>, qvec: &[f32], top_k: usize) -> Vec<(Node, f64)> {
    let mut scored: Vec<(Node, f64)> = recent
        .into_iter()
        .map(|n| {
            let s = cosine(qvec, &n.embedding) * n.retrieval_strength;
            (n, s)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_k);
    scored
}
