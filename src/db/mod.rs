//! SQLite-backed node/edge store for long-term memories.

mod edges;
mod nodes;

pub use nodes::WindowDecision;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;

use crate::error::MemoryError;

/// Per-connection setup for every connection handed out by the pool.
/// busy_timeout prevents SQLITE_BUSY under concurrent write pressure
/// (maintenance jobs + ingestion); foreign_keys is a per-connection pragma.
#[derive(Debug)]
struct ConnectionSetup;
impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(())
    }
}

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

const MAX_CONTENT_LEN: usize = 8192;
const MAX_AUTHOR_LEN: usize = 64;
const MAX_TAGS: usize = 20;
const MAX_TAG_LEN: usize = 32;

/// Embedding width of all-MiniLM-L6-v2, the model the bot was built around.
pub const DEFAULT_DIM: usize = 384;

/// One stored utterance.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: i64,
    pub content: String,
    pub author: String,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub tags: Vec<String>,
    pub storage_strength: f64,
    pub retrieval_strength: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NodeInput {
    pub content: String,
    pub author: String,
    pub timestamp: i64,
    pub embedding: Vec<f32>,
    pub tags: Vec<String>,
}

impl NodeInput {
    pub fn new(content: impl Into<String>, timestamp: i64, embedding: Vec<f32>) -> Self {
        Self {
            content: content.into(),
            timestamp,
            embedding,
            ..Default::default()
        }
    }

    pub fn author(mut self, a: impl Into<String>) -> Self {
        self.author = a.into();
        self
    }

    pub fn tags(mut self, t: Vec<String>) -> Self {
        self.tags = t;
        self
    }
}

/// Scalar fields only; what Decay needs without paying for the blob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeMeta {
    pub id: i64,
    pub timestamp: i64,
    pub retrieval_strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Edge {
    pub from_id: i64,
    pub to_id: i64,
    pub weight: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub nodes: usize,
    pub edges: usize,
    pub mean_retrieval_strength: f64,
}

/// Trim, drop empties, dedupe (first occurrence wins).
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for t in tags {
        let t = t.trim().to_string();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

fn validate_input(input: &NodeInput, dim: usize) -> Result<(), MemoryError> {
    let content = input.content.trim();
    if content.is_empty() {
        return Err(MemoryError::EmptyContent);
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(MemoryError::Validation(format!("content too long (max {MAX_CONTENT_LEN} chars)")));
    }
    if input.author.chars().count() > MAX_AUTHOR_LEN {
        return Err(MemoryError::Validation("author too long".into()));
    }
    if input.tags.len() > MAX_TAGS {
        return Err(MemoryError::Validation(format!("too many tags (max {MAX_TAGS})")));
    }
    if let Some(t) = input.tags.iter().find(|t| t.chars().count() > MAX_TAG_LEN) {
        return Err(MemoryError::Validation(format!("tag '{}' too long (max {MAX_TAG_LEN})", t)));
    }
    if input.embedding.len() != dim {
        return Err(MemoryError::Validation(format!(
            "embedding has {} dimensions, store expects {dim}",
            input.embedding.len()
        )));
    }
    if input.embedding.iter().any(|f| !f.is_finite()) {
        return Err(MemoryError::Validation("embedding contains non-finite values".into()));
    }
    Ok(())
}

fn validate_strength(value: f64) -> Result<f64, MemoryError> {
    if !value.is_finite() {
        return Err(MemoryError::Validation(format!("strength must be finite, got {value}")));
    }
    Ok(value.max(0.0))
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    author TEXT NOT NULL DEFAULT '',
    timestamp INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    storage_strength REAL NOT NULL DEFAULT 1.0,
    retrieval_strength REAL NOT NULL DEFAULT 1.0 CHECK (retrieval_strength >= 0)
);

CREATE INDEX IF NOT EXISTS idx_nodes_timestamp ON nodes(timestamp);
CREATE INDEX IF NOT EXISTS idx_nodes_retrieval ON nodes(retrieval_strength);

CREATE TABLE IF NOT EXISTS edges (
    from_id INTEGER NOT NULL REFERENCES nodes(id),
    to_id INTEGER NOT NULL REFERENCES nodes(id),
    weight REAL NOT NULL,
    PRIMARY KEY (from_id, to_id)
);

CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
"#;

/// SQLite-backed memory store.
pub struct MemoryDB {
    pool: Pool<SqliteConnectionManager>,
    dim: usize,
}

impl MemoryDB {
    fn conn(&self) -> Result<PooledConn, MemoryError> {
        self.pool.get().map_err(|e| MemoryError::Internal(format!("pool: {e}")))
    }

    /// Open (or create) a database at the given path.
    /// Pool size defaults to 8 (1 writer + 7 readers in WAL mode).
    pub fn open(path: &str, dim: usize) -> Result<Self, MemoryError> {
        if dim == 0 {
            return Err(MemoryError::Validation("embedding dimension must be > 0".into()));
        }
        let pool_size = if path == ":memory:" { 2 } else { 8 };
        let manager = if path == ":memory:" {
            // Shared cache so all pool connections see the same in-memory DB.
            // Each store gets a unique name to avoid cross-test pollution.
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(ConnectionSetup))
            .build(manager)
            .map_err(|e| MemoryError::Internal(format!("pool: {e}")))?;

        let conn = pool.get().map_err(|e| MemoryError::Internal(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);

        let db = Self { pool, dim };
        let stats = db.stats()?;
        tracing::debug!(path, dim, nodes = stats.nodes, edges = stats.edges, "memory store opened");
        Ok(db)
    }

    /// Embedding width every stored vector must have.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn stats(&self) -> Result<Stats, MemoryError> {
        let conn = self.conn()?;
        let (nodes, mean): (i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), AVG(retrieval_strength) FROM nodes",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let edges: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?;
        Ok(Stats {
            nodes: nodes as usize,
            edges: edges as usize,
            mean_retrieval_strength: mean.unwrap_or(0.0),
        })
    }
}

/// Column list for full node reads.
const NODE_COLS: &str = "id, content, author, timestamp, embedding, tags, \
    storage_strength, retrieval_strength";

/// A node as stored, before the embedding blob has been validated.
struct NodeRow {
    id: i64,
    content: String,
    author: String,
    timestamp: i64,
    embedding: Vec<u8>,
    tags: String,
    storage_strength: f64,
    retrieval_strength: f64,
}

impl NodeRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            content: row.get("content")?,
            author: row.get("author")?,
            timestamp: row.get("timestamp")?,
            embedding: row.get("embedding")?,
            tags: row.get("tags")?,
            storage_strength: row.get("storage_strength")?,
            retrieval_strength: row.get("retrieval_strength")?,
        })
    }

    fn decode(self, dim: usize) -> Result<Node, MemoryError> {
        let embedding = crate::codec::decode(&self.embedding, dim)?;
        Ok(Node {
            id: self.id,
            content: self.content,
            author: self.author,
            timestamp: self.timestamp,
            embedding,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            storage_strength: self.storage_strength,
            retrieval_strength: self.retrieval_strength,
        })
    }
}

/// Decode a batch of rows, skipping (and logging) rows with a malformed blob.
fn decode_rows(rows: Vec<NodeRow>, dim: usize) -> Vec<Node> {
    rows.into_iter()
        .filter_map(|r| {
            let id = r.id;
            match r.decode(dim) {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!(id, error = %e, "skipping node with malformed embedding");
                    None
                }
            }
        })
        .collect()
}
