mod common;

use std::sync::Arc;

use common::{conversation_embedder, A, B, C, QUERY};
use leepa_memory::ai::{Embedder, HashEmbedder};
use leepa_memory::context::ContextAssembler;
use leepa_memory::db::MemoryDB;
use leepa_memory::ingest::{IngestOutcome, Ingestor};
use leepa_memory::{EmbedCache, SharedDB};

const T0: i64 = 1_700_000_000_000;

fn stored_id(outcome: IngestOutcome) -> i64 {
    match outcome {
        IngestOutcome::Stored { id, .. } => id,
        other => panic!("expected stored, got {other:?}"),
    }
}

#[tokio::test]
async fn conversation_recall_follows_links() {
    let db: SharedDB = Arc::new(MemoryDB::open(":memory:", 3).unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(conversation_embedder());
    let ingestor = Ingestor::new(db.clone(), embedder.clone());

    let a = stored_id(ingestor.ingest_at("ana", A, vec![], T0).await.unwrap());
    let b_out = ingestor.ingest_at("ben", B, vec![], T0 + 1_000).await.unwrap();
    assert!(matches!(b_out, IngestOutcome::Stored { linked_to: Some(x), .. } if x == a));
    let b = stored_id(b_out);
    let c_out = ingestor.ingest_at("cat", C, vec![], T0 + 2_000).await.unwrap();
    assert!(matches!(c_out, IngestOutcome::Stored { linked_to: None, .. }));

    let edges = db.all_edges().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!((edges[0].from_id, edges[0].to_id), (a, b));

    let asm = ContextAssembler::new(db.clone(), embedder, EmbedCache::new(8));
    let ctx = asm.assemble(QUERY, None).await.unwrap();
    assert_eq!(ctx.seeds[0].id, a);
    assert_eq!(ctx.activated, vec![b]);
    assert_eq!(ctx.block, format!("{A}\n{B}"));
    assert!(!ctx.block.contains(C));
}

#[tokio::test]
async fn repeated_message_is_stored_once() {
    let db: SharedDB = Arc::new(MemoryDB::open(":memory:", 3).unwrap());
    let ingestor = Ingestor::new(db.clone(), Arc::new(conversation_embedder()));
    let first = stored_id(ingestor.ingest_at("ana", A, vec![], T0).await.unwrap());
    let again = ingestor.ingest_at("ana", A, vec![], T0 + 60_000).await.unwrap();
    assert!(matches!(again, IngestOutcome::Duplicate { existing_id, .. } if existing_id == first));
    assert_eq!(db.stats().unwrap().nodes, 1);
}

#[tokio::test]
async fn store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let path = path.to_str().unwrap();

    let (a, b) = {
        let db: SharedDB = Arc::new(MemoryDB::open(path, 3).unwrap());
        let ingestor = Ingestor::new(db.clone(), Arc::new(conversation_embedder()));
        let a = stored_id(ingestor.ingest_at("ana", A, vec!["math".into()], T0).await.unwrap());
        let b = stored_id(ingestor.ingest_at("ben", B, vec![], T0 + 1_000).await.unwrap());
        db.update_strength(a, 0.4).unwrap();
        (a, b)
    };

    let db = MemoryDB::open(path, 3).unwrap();
    let node = db.get_node(a).unwrap().unwrap();
    assert_eq!(node.content, A);
    assert_eq!(node.tags, vec!["math"]);
    assert_eq!(node.embedding, vec![1.0, 0.0, 0.0]);
    assert_eq!(node.retrieval_strength, 0.4);
    assert_eq!(db.all_edges().unwrap().len(), 1);

    let c = db
        .insert_node(leepa_memory::db::NodeInput::new(C, T0 + 2_000, vec![0.0, 0.0, 1.0]))
        .unwrap();
    assert!(c > b, "ids keep increasing after reopen");
}

#[tokio::test]
async fn reopening_with_other_dim_rejects_old_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let path = path.to_str().unwrap();
    let id = MemoryDB::open(path, 3)
        .unwrap()
        .insert_node(leepa_memory::db::NodeInput::new("x", T0, vec![1.0, 0.0, 0.0]))
        .unwrap();

    let db = MemoryDB::open(path, 4).unwrap();
    assert!(db.get_node(id).is_err());
    assert!(db.get_recent_nodes(10).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_keeps_every_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let db: SharedDB = Arc::new(MemoryDB::open(path.to_str().unwrap(), 384).unwrap());
    let ingestor = Arc::new(Ingestor::new(db.clone(), Arc::new(HashEmbedder::new(384))));

    let mut handles = Vec::new();
    for i in 0..24 {
        let ing = ingestor.clone();
        handles.push(tokio::spawn(async move {
            ing.ingest("load", &format!("alpha{i} bravo{i} charlie{i}"), vec![]).await
        }));
    }
    for h in handles {
        assert!(matches!(h.await.unwrap().unwrap(), IngestOutcome::Stored { .. }));
    }

    let s = db.stats().unwrap();
    assert_eq!(s.nodes, 24);
    let mut ids: Vec<i64> = db.all_nodes().unwrap().into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_identical_messages_store_one_node() {
    for round in 0..5 {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let db: SharedDB = Arc::new(MemoryDB::open(path.to_str().unwrap(), 384).unwrap());
        let ingestor = Arc::new(Ingestor::new(db.clone(), Arc::new(HashEmbedder::new(384))));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ing = ingestor.clone();
            handles.push(tokio::spawn(async move {
                ing.ingest("echo", "did anyone see the launch tonight", vec![]).await
            }));
        }
        let mut stored = 0;
        for h in handles {
            if let IngestOutcome::Stored { .. } = h.await.unwrap().unwrap() {
                stored += 1;
            }
        }

        assert_eq!(stored, 1, "round {round}");
        assert_eq!(db.stats().unwrap().nodes, 1, "round {round}");
    }
}

#[tokio::test]
async fn punctuation_only_message_is_deduplicated() {
    let db: SharedDB = Arc::new(MemoryDB::open(":memory:", 384).unwrap());
    let ingestor = Ingestor::new(db.clone(), Arc::new(HashEmbedder::new(384)));

    let first = stored_id(ingestor.ingest("ana", "???", vec![]).await.unwrap());
    let again = ingestor.ingest("ana", "???", vec![]).await.unwrap();
    assert!(matches!(again, IngestOutcome::Duplicate { existing_id, .. } if existing_id == first));
    assert_eq!(db.stats().unwrap().nodes, 1);
}
