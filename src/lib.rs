//! leepa-memory: long-term associative memory for LeepaBot.
//! Utterances are embedded, deduplicated, linked into a directed graph, and
//! recalled by spreading activation. Background jobs decay, review, and
//! consolidate the store.

pub mod ai;
pub mod api;
pub mod codec;
pub mod context;
pub mod db;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod scheduler;
pub mod similarity;
pub mod thresholds;

use std::sync::Arc;

pub type SharedDB = Arc<db::MemoryDB>;

/// Hand a synchronous store call to the blocking pool and await it.
/// Async handlers and jobs reach `MemoryDB` only through here.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, error::MemoryError>
where
    F: FnOnce(&db::MemoryDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    match tokio::task::spawn_blocking(move || f(&db)).await {
        Ok(v) => Ok(v),
        Err(e) if e.is_panic() => {
            tracing::error!("store call panicked");
            Err(error::MemoryError::Internal("store call panicked".into()))
        }
        Err(e) => Err(error::MemoryError::Internal(format!("store call cancelled: {e}"))),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDB,
    pub embedder: Arc<dyn ai::Embedder>,
    pub embed_cache: EmbedCache,
    pub api_key: Option<String>,
    pub consolidation: scheduler::ConsolidationMode,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn ingestor(&self) -> ingest::Ingestor {
        ingest::Ingestor::new(self.db.clone(), self.embedder.clone())
    }

    pub fn assembler(&self) -> context::ContextAssembler {
        context::ContextAssembler::new(
            self.db.clone(),
            self.embedder.clone(),
            self.embed_cache.clone(),
        )
    }
}

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;

/// Query text -> embedding, least recently used evicted first. Cloning
/// shares the same cache.
#[derive(Clone)]
pub struct EmbedCache(Arc<Mutex<CacheSlots>>);

struct CacheSlots {
    lru: LruCache<String, Vec<f32>>,
    stats: CacheStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl EmbedCache {
    /// A zero capacity is bumped to one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self(Arc::new(Mutex::new(CacheSlots {
            lru: LruCache::new(capacity),
            stats: CacheStats { capacity: capacity.get(), ..CacheStats::default() },
        })))
    }

    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        let mut slots = self.0.lock();
        let CacheSlots { lru, stats } = &mut *slots;
        match lru.get(query) {
            Some(v) => {
                stats.hits += 1;
                Some(v.clone())
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, query: String, embedding: Vec<f32>) {
        self.0.lock().lru.put(query, embedding);
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.0.lock();
        CacheStats { size: slots.lru.len(), ..slots.stats }
    }
}
