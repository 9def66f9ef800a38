//! Ingestion: embed, deduplicate against the recent window, insert, and
//! link to the ongoing conversation.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::ai::Embedder;
use crate::db::{now_ms, MemoryDB, Node, NodeInput, WindowDecision};
use crate::error::MemoryError;
use crate::similarity::{cosine, time_decayed_score};
use crate::thresholds::{LINK_HALF_LIFE_HOURS, LINK_SIM, MERGE_SIM, MERGE_WINDOW};
use crate::{db_call, SharedDB};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Stored { id: i64, linked_to: Option<i64> },
    Duplicate { existing_id: i64, similarity: f64 },
}

pub struct Ingestor {
    db: SharedDB,
    embedder: Arc<dyn Embedder>,
}

impl Ingestor {
    pub fn new(db: SharedDB, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    pub async fn ingest(
        &self,
        author: &str,
        content: &str,
        tags: Vec<String>,
    ) -> Result<IngestOutcome, MemoryError> {
        self.ingest_at(author, content, tags, now_ms()).await
    }

    /// Same as `ingest`, with the clock pinned to `now_ms`.
    pub async fn ingest_at(
        &self,
        author: &str,
        content: &str,
        tags: Vec<String>,
        now_ms: i64,
    ) -> Result<IngestOutcome, MemoryError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::EmptyContent);
        }
        // Nothing touches the store until the embedding is in hand.
        let embedding = self.embedder.embed(content).await?;

        let input = NodeInput::new(content, now_ms, embedding)
            .author(author)
            .tags(tags);
        let outcome = db_call(&self.db, move |db| store(db, input, now_ms)).await??;

        match &outcome {
            IngestOutcome::Stored { id, linked_to } => {
                info!(id, ?linked_to, author, "memory stored");
            }
            IngestOutcome::Duplicate { existing_id, similarity } => {
                debug!(existing_id, similarity, "duplicate skipped");
            }
        }
        Ok(outcome)
    }
}

/// Dedup, link and insert under one write transaction, so two identical
/// messages racing each other still produce a single node.
fn store(db: &MemoryDB, input: NodeInput, now_ms: i64) -> Result<IngestOutcome, MemoryError> {
    let mut link = None;
    let placed = db.insert_with_window(input, MERGE_WINDOW, |recent, input| {
        if let Some(dup) = find_duplicate(recent, &input.embedding) {
            return WindowDecision::Skip(dup);
        }
        link = find_link(recent, &input.embedding, now_ms);
        WindowDecision::Insert { link }
    })?;

    Ok(match placed {
        Ok(id) => IngestOutcome::Stored { id, linked_to: link.map(|(from, _)| from) },
        Err((existing_id, similarity)) => IngestOutcome::Duplicate { existing_id, similarity },
    })
}

/// True when `sim` is close enough to count as the same utterance.
pub fn is_duplicate(sim: f64) -> bool {
    sim > MERGE_SIM
}

/// Most similar candidate above the merge threshold.
fn find_duplicate(recent: &[Node], embedding: &[f32]) -> Option<(i64, f64)> {
    recent
        .iter()
        .map(|n| (n.id, cosine(embedding, &n.embedding)))
        .filter(|(_, sim)| is_duplicate(*sim))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// First candidate, most recent first, whose recency-discounted similarity
/// clears the link threshold. Returns (target id, score).
fn find_link(recent: &[Node], embedding: &[f32], now_ms: i64) -> Option<(i64, f64)> {
    recent.iter().find_map(|n| {
        let age_secs = (now_ms - n.timestamp) as f64 / 1000.0;
        let score = time_decayed_score(cosine(embedding, &n.embedding), age_secs, LINK_HALF_LIFE_HOURS);
        (score > LINK_SIM).then_some((n.id, score))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::MapEmbedder;
    use crate::db::Edge;

    const T0: i64 = 1_700_000_000_000;

    fn ingestor(dim: usize, pairs: &[(&str, Vec<f32>)]) -> Ingestor {
        let db = Arc::new(MemoryDB::open(":memory:", dim).unwrap());
        Ingestor::new(db, Arc::new(MapEmbedder::new(dim, pairs)))
    }

    #[tokio::test]
    async fn same_content_twice_stores_one_node() {
        let ing = ingestor(3, &[("hi there", vec![1.0, 0.0, 0.0])]);
        let first = ing.ingest_at("u", "hi there", vec![], T0).await.unwrap();
        let IngestOutcome::Stored { id, linked_to: None } = first else {
            panic!("unexpected {first:?}");
        };
        let second = ing.ingest_at("u", "hi there", vec![], T0 + 5_000).await.unwrap();
        match second {
            IngestOutcome::Duplicate { existing_id, similarity } => {
                assert_eq!(existing_id, id);
                assert!((similarity - 1.0).abs() < 1e-9);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(ing.db.stats().unwrap().nodes, 1);
    }

    #[tokio::test]
    async fn merge_threshold_is_strict() {
        // (17, 7, 6, 5, 1) has norm exactly 20, so cosine with e1 is exactly 0.85.
        let ing = ingestor(
            5,
            &[
                ("base", vec![1.0, 0.0, 0.0, 0.0, 0.0]),
                ("at threshold", vec![17.0, 7.0, 6.0, 5.0, 1.0]),
                ("just above", vec![17.002, 7.0, 6.0, 5.0, 1.0]),
            ],
        );
        ing.ingest_at("u", "base", vec![], T0).await.unwrap();

        // Far enough in the future that neither candidate links.
        let later = T0 + 10 * 3_600_000;
        let at = ing.ingest_at("u", "at threshold", vec![], later).await.unwrap();
        assert!(matches!(at, IngestOutcome::Stored { .. }), "0.85 must not merge");

        let above = ing.ingest_at("u", "just above", vec![], later + 1).await.unwrap();
        assert!(matches!(above, IngestOutcome::Duplicate { .. }), "got {above:?}");
        assert_eq!(ing.db.stats().unwrap().nodes, 2);
    }

    #[test]
    fn duplicate_predicate_boundary() {
        assert!(!is_duplicate(0.85));
        assert!(is_duplicate(0.8501));
    }

    #[tokio::test]
    async fn links_recent_similar_message() {
        let ing = ingestor(3, &[("a", vec![1.0, 0.0, 0.0]), ("b", vec![0.8, 0.6, 0.0])]);
        let IngestOutcome::Stored { id: a, .. } = ing.ingest_at("u", "a", vec![], T0).await.unwrap() else {
            panic!("a not stored");
        };
        let out = ing.ingest_at("u", "b", vec![], T0 + 1_000).await.unwrap();
        let IngestOutcome::Stored { id: b, linked_to } = out else {
            panic!("b not stored: {out:?}");
        };
        assert_eq!(linked_to, Some(a));

        let edges = ing.db.all_edges().unwrap();
        assert_eq!(edges.len(), 1);
        let Edge { from_id, to_id, weight } = edges[0];
        assert_eq!((from_id, to_id), (a, b));
        let expected = 0.8 * (-1.0f64 / 3600.0).exp();
        assert!((weight - expected).abs() < 1e-6, "weight {weight}");
    }

    #[tokio::test]
    async fn stale_message_is_not_linked() {
        let ing = ingestor(3, &[("a", vec![1.0, 0.0, 0.0]), ("b", vec![0.8, 0.6, 0.0])]);
        ing.ingest_at("u", "a", vec![], T0).await.unwrap();
        // Two hours later the score is 0.8 * e^-2.
        let out = ing.ingest_at("u", "b", vec![], T0 + 2 * 3_600_000).await.unwrap();
        assert!(matches!(out, IngestOutcome::Stored { linked_to: None, .. }));
        assert!(ing.db.all_edges().unwrap().is_empty());
    }

    #[tokio::test]
    async fn links_to_most_recent_qualifying_candidate() {
        let ing = ingestor(
            3,
            &[
                ("older", vec![1.0, 0.0, 0.0]),
                ("newer", vec![0.6, 0.8, 0.0]),
                ("probe", vec![0.95, 0.4, 0.5]),
            ],
        );
        ing.ingest_at("u", "older", vec![], T0).await.unwrap();
        let IngestOutcome::Stored { id: newer, .. } =
            ing.ingest_at("u", "newer", vec![], T0 + 1_000).await.unwrap()
        else {
            panic!("newer not stored");
        };
        // cos(probe, older) ~ 0.829 beats cos(probe, newer) ~ 0.777, but the
        // newer message is checked first and already qualifies.
        let out = ing.ingest_at("u", "probe", vec![], T0 + 2_000).await.unwrap();
        assert!(matches!(out, IngestOutcome::Stored { linked_to: Some(t), .. } if t == newer), "{out:?}");
    }

    #[tokio::test]
    async fn embed_failure_leaves_store_untouched() {
        let ing = ingestor(3, &[]);
        let err = ing.ingest_at("u", "unknown", vec![], T0).await.unwrap_err();
        assert!(matches!(err, MemoryError::Embedding { .. }));
        assert_eq!(ing.db.stats().unwrap().nodes, 0);
    }

    #[tokio::test]
    async fn blank_content_rejected_before_embedding() {
        let ing = ingestor(3, &[]);
        let err = ing.ingest_at("u", "   \n", vec![], T0).await.unwrap_err();
        assert!(matches!(err, MemoryError::EmptyContent));
    }

    #[tokio::test]
    async fn tags_and_author_are_persisted() {
        let ing = ingestor(3, &[("math", vec![0.0, 0.0, 1.0])]);
        let out = ing
            .ingest_at("leepa-fan", "math", vec!["physics".into(), "physics".into()], T0)
            .await
            .unwrap();
        let IngestOutcome::Stored { id, .. } = out else { panic!() };
        let node = ing.db.get_node(id).unwrap().unwrap();
        assert_eq!(node.author, "leepa-fan");
        assert_eq!(node.tags, vec!["physics"]);
        assert_eq!(node.timestamp, T0);
    }
}
