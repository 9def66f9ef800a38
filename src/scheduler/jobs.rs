//! Maintenance jobs. Each one is synchronous and touches rows one statement
//! at a time, so ingestion never waits on a whole job.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use super::ConsolidationMode;
use crate::db::MemoryDB;
use crate::error::MemoryError;
use crate::similarity::cosine;
use crate::thresholds::{
    CONSOLIDATE_LOOKBACK_MS, CONSOLIDATE_SIM, CONSOLIDATE_WEIGHT, DECAY_PER_DAY, REVIEW_BELOW,
    REVIEW_BOOST, TAG_OVERLAP,
};

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Decay,
    Review,
    Consolidate,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Decay => "decay",
            JobKind::Review => "review",
            JobKind::Consolidate => "consolidate",
        })
    }
}

impl FromStr for JobKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decay" => Ok(JobKind::Decay),
            "review" => Ok(JobKind::Review),
            "consolidate" => Ok(JobKind::Consolidate),
            other => Err(MemoryError::Validation(format!("unknown job '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: JobKind,
    pub scanned: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl JobReport {
    fn new(job: JobKind) -> Self {
        Self { job, scanned: 0, updated: 0, skipped: 0 }
    }

    /// Count one row's write. A failed row is logged and skipped; the job
    /// carries on with the rest.
    fn tally(&mut self, id: i64, written: Result<bool, MemoryError>) {
        match written {
            Ok(true) => self.updated += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(job = %self.job, id, error = %e, "row update failed");
                self.skipped += 1;
            }
        }
    }
}

pub fn run(db: &MemoryDB, job: JobKind, mode: ConsolidationMode, now_ms: i64) -> Result<JobReport, MemoryError> {
    match job {
        JobKind::Decay => decay_at(db, now_ms),
        JobKind::Review => review(db),
        JobKind::Consolidate => consolidate_at(db, now_ms, mode),
    }
}

/// Multiply each node's retrieval strength by `0.9 ^ whole days since
/// creation`. Applied to the current value, so repeated runs compound.
pub fn decay_at(db: &MemoryDB, now_ms: i64) -> Result<JobReport, MemoryError> {
    let mut report = JobReport::new(JobKind::Decay);
    for meta in db.node_meta()? {
        report.scanned += 1;
        let days = (now_ms - meta.timestamp).max(0) / DAY_MS;
        if days == 0 {
            continue;
        }
        let factor = DECAY_PER_DAY.powi(days.min(i32::MAX as i64) as i32);
        report.tally(meta.id, db.scale_strength(meta.id, factor));
    }
    Ok(report)
}

/// Boost every node below the review threshold by 1.5x. Each boost re-checks
/// the threshold at write time.
pub fn review(db: &MemoryDB) -> Result<JobReport, MemoryError> {
    let mut report = JobReport::new(JobKind::Review);
    for id in db.nodes_below_strength(REVIEW_BELOW)? {
        report.scanned += 1;
        report.tally(id, db.boost_weak(id, REVIEW_BELOW, REVIEW_BOOST));
    }
    Ok(report)
}

/// Link related memories from the last day: older -> newer, weight 0.6,
/// when embeddings are close or tags overlap. Existing edges are left alone.
pub fn consolidate_at(db: &MemoryDB, now_ms: i64, mode: ConsolidationMode) -> Result<JobReport, MemoryError> {
    let mut report = JobReport::new(JobKind::Consolidate);
    let ids = db.nodes_since(now_ms - CONSOLIDATE_LOOKBACK_MS)?;
    report.scanned = ids.len();
    if mode == ConsolidationMode::Scan {
        debug!(scanned = report.scanned, "consolidation in scan mode, no edges written");
        return Ok(report);
    }

    // get_nodes drops (and logs) rows whose embedding does not decode.
    let nodes = db.get_nodes(&ids)?;
    report.skipped = ids.len() - nodes.len();

    for (i, older) in nodes.iter().enumerate() {
        for newer in &nodes[i + 1..] {
            let related = cosine(&older.embedding, &newer.embedding) > CONSOLIDATE_SIM
                || tag_jaccard(&older.tags, &newer.tags) >= TAG_OVERLAP;
            if !related {
                continue;
            }
            match db.add_edge_if_absent(older.id, newer.id, CONSOLIDATE_WEIGHT) {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(from = older.id, to = newer.id, error = %e, "consolidation edge failed");
                    report.skipped += 1;
                }
            }
        }
    }
    Ok(report)
}

/// |a ∩ b| / |a ∪ b|; two empty sets share nothing.
fn tag_jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}
