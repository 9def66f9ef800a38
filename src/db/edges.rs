//! Directed weighted edges between nodes.

use rusqlite::params;

use super::*;

pub(super) fn validate_weight(weight: f64) -> Result<(), MemoryError> {
    if weight.is_finite() {
        Ok(())
    } else {
        Err(MemoryError::Validation(format!("edge weight must be finite, got {weight}")))
    }
}

/// Turn a foreign-key failure into a readable validation error; pass
/// everything else through as a database error.
pub(super) fn map_fk_violation(e: rusqlite::Error) -> MemoryError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            MemoryError::Validation("edge endpoint does not exist".into())
        }
        other => MemoryError::Database(other),
    }
}

impl MemoryDB {
    /// Upsert `from -> to`. At most one edge per ordered pair; re-adding
    /// replaces the weight. Both endpoints must exist.
    pub fn add_or_replace_edge(&self, from_id: i64, to_id: i64, weight: f64) -> Result<(), MemoryError> {
        validate_weight(weight)?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO edges (from_id, to_id, weight) VALUES (?1, ?2, ?3)",
                params![from_id, to_id, weight],
            )
            .map_err(map_fk_violation)?;
        Ok(())
    }

    /// Insert `from -> to` only if no edge exists for that ordered pair.
    /// Returns true if a new edge was written.
    pub fn add_edge_if_absent(&self, from_id: i64, to_id: i64, weight: f64) -> Result<bool, MemoryError> {
        validate_weight(weight)?;
        let n = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO edges (from_id, to_id, weight) VALUES (?1, ?2, ?3)",
                params![from_id, to_id, weight],
            )
            .map_err(map_fk_violation)?;
        Ok(n > 0)
    }

    /// Every edge, ordered by (from_id, to_id).
    pub fn all_edges(&self) -> Result<Vec<Edge>, MemoryError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT from_id, to_id, weight FROM edges ORDER BY from_id, to_id")?;
        let edges = stmt
            .query_map([], |r| {
                Ok(Edge {
                    from_id: r.get(0)?,
                    to_id: r.get(1)?,
                    weight: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }
}
