//! Periodic maintenance: decay, review, consolidation.
//!
//! One `Scheduler` per process. Each job gets its own tokio task and timer;
//! the first run happens one full period after start.

pub mod jobs;

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

pub use jobs::{JobKind, JobReport};

use crate::db::now_ms;
use crate::error::MemoryError;
use crate::{db_call, SharedDB};

/// What the consolidation job does with related pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationMode {
    /// Write older -> newer edges for related pairs.
    #[default]
    Link,
    /// Count candidates only.
    Scan,
}

impl FromStr for ConsolidationMode {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "link" => Ok(Self::Link),
            "scan" => Ok(Self::Scan),
            other => Err(MemoryError::Validation(format!("unknown consolidation mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Zero disables the job.
    pub decay_every: Duration,
    pub review_every: Duration,
    pub consolidate_every: Duration,
    pub mode: ConsolidationMode,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            decay_every: Duration::from_secs(3600),
            review_every: Duration::from_secs(6 * 3600),
            consolidate_every: Duration::from_secs(12 * 3600),
            mode: ConsolidationMode::Link,
        }
    }
}

fn env_mins(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|m| Duration::from_secs(m.saturating_mul(60)))
        .unwrap_or(default)
}

impl ScheduleConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let mode = match std::env::var("LEEPA_CONSOLIDATION_MODE") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                warn!(error = %e, "falling back to link mode");
                ConsolidationMode::Link
            }),
            Err(_) => d.mode,
        };
        Self {
            decay_every: env_mins("LEEPA_DECAY_MINS", d.decay_every),
            review_every: env_mins("LEEPA_REVIEW_MINS", d.review_every),
            consolidate_every: env_mins("LEEPA_CONSOLIDATE_MINS", d.consolidate_every),
            mode,
        }
    }
}

/// Run one job now on the blocking pool.
pub async fn run_job(db: &SharedDB, job: JobKind, mode: ConsolidationMode) -> Result<JobReport, MemoryError> {
    let report = db_call(db, move |db| jobs::run(db, job, mode, now_ms())).await??;
    info!(
        job = %report.job,
        scanned = report.scanned,
        updated = report.updated,
        skipped = report.skipped,
        "maintenance job finished"
    );
    Ok(report)
}

pub struct Scheduler {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn one timer task per enabled job. Needs a running tokio runtime.
    pub fn start(db: SharedDB, cfg: ScheduleConfig) -> Self {
        let (stop, _) = watch::channel(false);
        let mut tasks = Vec::new();
        for (job, every) in [
            (JobKind::Decay, cfg.decay_every),
            (JobKind::Review, cfg.review_every),
            (JobKind::Consolidate, cfg.consolidate_every),
        ] {
            if every.is_zero() {
                info!(%job, "maintenance job disabled");
                continue;
            }
            let db = db.clone();
            let mut rx = stop.subscribe();
            let mode = cfg.mode;
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + every, every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = run_job(&db, job, mode).await {
                                warn!(%job, error = %e, "maintenance job failed");
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            }));
            info!(%job, every_secs = every.as_secs(), "maintenance job scheduled");
        }
        Self { stop, tasks }
    }

    /// Stop all timers and wait for any in-flight job to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for t in self.tasks {
            if let Err(e) = t.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }
        info!("scheduler stopped");
    }
}
