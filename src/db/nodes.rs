//! Node CRUD and scans.

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::*;

impl MemoryDB {
    /// Insert a new node with both strengths at 1.0. Returns its id.
    pub fn insert_node(&self, input: NodeInput) -> Result<i64, MemoryError> {
        self.insert_linked(input, None)
    }

    /// Insert a node and, if given, an edge `link.0 -> new node` with weight
    /// `link.1`, in a single transaction. Either both land or neither does.
    pub fn insert_linked(
        &self,
        mut input: NodeInput,
        link: Option<(i64, f64)>,
    ) -> Result<i64, MemoryError> {
        prepare_input(&mut input, self.dim)?;
        if let Some((_, weight)) = link {
            super::edges::validate_weight(weight)?;
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = write_node(&tx, &input, link)?;
        tx.commit()?;
        tracing::debug!(id, linked_from = ?link.map(|l| l.0), "node inserted");
        Ok(id)
    }

    /// Read the `window` most recent nodes, let `decide` look at them, and
    /// insert (or skip) under the same write lock. No other writer can slip
    /// a node in between the read and the insert.
    ///
    /// Returns `Ok(id)` when inserted, `Err(t)` when `decide` skipped.
    pub fn insert_with_window<T>(
        &self,
        mut input: NodeInput,
        window: usize,
        decide: impl FnOnce(&[Node], &NodeInput) -> WindowDecision<T>,
    ) -> Result<Result<i64, T>, MemoryError> {
        prepare_input(&mut input, self.dim)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let recent = decode_rows(recent_rows(&tx, window)?, self.dim);

        let link = match decide(&recent, &input) {
            WindowDecision::Skip(t) => return Ok(Err(t)),
            WindowDecision::Insert { link } => link,
        };
        if let Some((_, weight)) = link {
            super::edges::validate_weight(weight)?;
        }
        let id = write_node(&tx, &input, link)?;
        tx.commit()?;
        tracing::debug!(id, linked_from = ?link.map(|l| l.0), "node inserted");
        Ok(Ok(id))
    }

    /// Fetch one node. A stored blob of the wrong width is a decode error.
    pub fn get_node(&self, id: i64) -> Result<Option<Node>, MemoryError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {NODE_COLS} FROM nodes WHERE id = ?1"),
                params![id],
                NodeRow::from_row,
            )
            .optional()?;
        row.map(|r| r.decode(self.dim)).transpose()
    }

    /// Fetch several nodes, in the order of `ids`. Missing ids are skipped.
    pub fn get_nodes(&self, ids: &[i64]) -> Result<Vec<Node>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!("SELECT {NODE_COLS} FROM nodes WHERE id = ?1"))?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(r) = stmt.query_row(params![id], NodeRow::from_row).optional()? {
                rows.push(r);
            }
        }
        Ok(decode_rows(rows, self.dim))
    }

    /// Most recent nodes first (timestamp desc, then id desc).
    /// Rows with malformed embeddings are skipped.
    pub fn get_recent_nodes(&self, limit: usize) -> Result<Vec<Node>, MemoryError> {
        let conn = self.conn()?;
        Ok(decode_rows(recent_rows(&conn, limit)?, self.dim))
    }

    /// Overwrite retrieval strength. Negative values clamp to 0.
    /// Returns false if the node does not exist.
    pub fn update_strength(&self, id: i64, retrieval_strength: f64) -> Result<bool, MemoryError> {
        let value = validate_strength(retrieval_strength)?;
        let n = self.conn()?.execute(
            "UPDATE nodes SET retrieval_strength = ?1 WHERE id = ?2",
            params![value, id],
        )?;
        Ok(n > 0)
    }

    /// Multiply retrieval strength in place, clamped at 0. One statement,
    /// so a concurrent writer never sees or clobbers a half-applied update.
    pub fn scale_strength(&self, id: i64, factor: f64) -> Result<bool, MemoryError> {
        if !factor.is_finite() {
            return Err(MemoryError::Validation(format!("factor must be finite, got {factor}")));
        }
        let n = self.conn()?.execute(
            "UPDATE nodes SET retrieval_strength = MAX(0.0, retrieval_strength * ?1) WHERE id = ?2",
            params![factor, id],
        )?;
        Ok(n > 0)
    }

    /// Multiply retrieval strength by `factor` only if it is still below
    /// `below` at write time. Returns whether the row was boosted.
    pub fn boost_weak(&self, id: i64, below: f64, factor: f64) -> Result<bool, MemoryError> {
        if !factor.is_finite() {
            return Err(MemoryError::Validation(format!("factor must be finite, got {factor}")));
        }
        let n = self.conn()?.execute(
            "UPDATE nodes SET retrieval_strength = MAX(0.0, retrieval_strength * ?1) \
             WHERE id = ?2 AND retrieval_strength < ?3",
            params![factor, id, below],
        )?;
        Ok(n > 0)
    }

    pub fn all_nodes(&self) -> Result<HashSet<i64>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM nodes")?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<HashSet<i64>, _>>()?;
        Ok(ids)
    }

    /// Ids with retrieval strength strictly below `threshold`, ascending.
    pub fn nodes_below_strength(&self, threshold: f64) -> Result<Vec<i64>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM nodes WHERE retrieval_strength < ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![threshold], |r| r.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Ids created strictly after `since_ms`, oldest first.
    pub fn nodes_since(&self, since_ms: i64) -> Result<Vec<i64>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM nodes WHERE timestamp > ?1 ORDER BY timestamp, id")?;
        let ids = stmt
            .query_map(params![since_ms], |r| r.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Scalar fields of every node, ascending by id.
    pub fn node_meta(&self) -> Result<Vec<NodeMeta>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, timestamp, retrieval_strength FROM nodes ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(NodeMeta {
                    id: r.get(0)?,
                    timestamp: r.get(1)?,
                    retrieval_strength: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// What `insert_with_window` should do with the pending node.
pub enum WindowDecision<T> {
    Skip(T),
    Insert { link: Option<(i64, f64)> },
}

fn prepare_input(input: &mut NodeInput, dim: usize) -> Result<(), MemoryError> {
    input.tags = normalize_tags(std::mem::take(&mut input.tags));
    validate_input(input, dim)
}

fn recent_rows(conn: &rusqlite::Connection, limit: usize) -> Result<Vec<NodeRow>, MemoryError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {NODE_COLS} FROM nodes ORDER BY timestamp DESC, id DESC LIMIT ?1"
    ))?;
    let rows = stmt
        .query_map(params![limit as i64], NodeRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn write_node(
    tx: &rusqlite::Transaction,
    input: &NodeInput,
    link: Option<(i64, f64)>,
) -> Result<i64, MemoryError> {
    let tags_json = serde_json::to_string(&input.tags).unwrap_or_else(|_| "[]".into());
    let blob = crate::codec::encode(&input.embedding);
    tx.execute(
        "INSERT INTO nodes \
         (content, author, timestamp, embedding, tags, storage_strength, retrieval_strength) \
         VALUES (?1, ?2, ?3, ?4, ?5, 1.0, 1.0)",
        params![input.content, input.author, input.timestamp, blob, tags_json],
    )?;
    let id = tx.last_insert_rowid();

    if let Some((from_id, weight)) = link {
        tx.execute(
            "INSERT OR REPLACE INTO edges (from_id, to_id, weight) VALUES (?1, ?2, ?3)",
            params![from_id, id, weight],
        )
        .map_err(super::edges::map_fk_violation)?;
    }
    Ok(id)
}
