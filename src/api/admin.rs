//! Manual maintenance triggers.

use axum::extract::{Path, State};
use axum::Json;

use crate::error::MemoryError;
use crate::scheduler::{self, JobKind, JobReport};
use crate::AppState;

pub(super) async fn run_job(
    State(state): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<JobReport>, MemoryError> {
    let kind: JobKind = job.parse()?;
    let report = scheduler::run_job(&state.db, kind, state.consolidation).await?;
    Ok(Json(report))
}
