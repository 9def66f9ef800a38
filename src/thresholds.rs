/// Cosine similarity thresholds and windows shared across components.
///
/// Higher = stricter (only very similar items match).
/// The hierarchy: link (loose, time-decayed) < consolidate < merge (tightest)

/// Ingest: a new utterance strictly above this is a duplicate of a recent node
pub const MERGE_SIM: f64 = 0.85;

/// Ingest: how many recent nodes are checked for duplicates and links
pub const MERGE_WINDOW: usize = 50;

/// Ingest: time-decayed similarity strictly above this links to a prior node
pub const LINK_SIM: f64 = 0.7;

/// Ingest: half-life (hours) of the recency discount used for linking
pub const LINK_HALF_LIFE_HOURS: f64 = 1.0;

/// Context: recent nodes ranked against the query
pub const CONTEXT_WINDOW: usize = 100;

/// Context: number of ranked seeds
pub const DEFAULT_TOP_K: usize = 5;

/// Context: non-top seeds below this score are ranked but not rendered
pub const SEED_MIN_SCORE: f64 = 0.5;

/// Spreading activation hop limit
pub const DEFAULT_SPREAD_DEPTH: usize = 3;

/// Decay: multiplier applied once per elapsed whole day
pub const DECAY_PER_DAY: f64 = 0.9;

/// Review: nodes strictly below this retrieval strength get boosted
pub const REVIEW_BELOW: f64 = 0.5;

/// Review: boost multiplier (no upper clamp)
pub const REVIEW_BOOST: f64 = 1.5;

/// Consolidation: only nodes created within this window are paired
pub const CONSOLIDATE_LOOKBACK_MS: i64 = 86_400_000;

/// Consolidation: pair embedding similarity strictly above this gets an edge
pub const CONSOLIDATE_SIM: f64 = 0.75;

/// Consolidation: tag Jaccard at or above this gets an edge
pub const TAG_OVERLAP: f64 = 0.5;

/// Consolidation: weight of edges it creates
pub const CONSOLIDATE_WEIGHT: f64 = 0.6;
