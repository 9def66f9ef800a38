//! leepa-memory: long-term associative memory service for LeepaBot.

use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leepa_memory::scheduler::{ScheduleConfig, Scheduler};
use leepa_memory::{ai, api, db, AppState, EmbedCache, SharedDB};

#[derive(Parser)]
#[command(name = "leepa-memory", version, about = "Long-term associative memory for LeepaBot")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3917", env = "LEEPA_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "leepa-memory.db", env = "LEEPA_DB")]
    db: String,

    /// Embedding width; must match the embedding model
    #[arg(long, default_value_t = db::DEFAULT_DIM, env = "LEEPA_EMBED_DIM")]
    embed_dim: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let shared: SharedDB = Arc::new(db::MemoryDB::open(&args.db, args.embed_dim)?);

    let ai_cfg = ai::AiConfig::from_env();
    let embed_status = match &ai_cfg {
        Some(cfg) => format!("http model={}", cfg.embed_model),
        None => "offline hashing".into(),
    };
    let embedder = ai::build_embedder(ai_cfg, args.embed_dim)?;

    let api_key = std::env::var("LEEPA_API_KEY").ok().filter(|k| !k.is_empty());
    let auth_status = if api_key.is_some() { "enabled" } else { "disabled" };

    let schedule = ScheduleConfig::from_env();
    let state = AppState {
        db: shared.clone(),
        embedder,
        embed_cache: EmbedCache::new(128),
        api_key,
        consolidation: schedule.mode,
        started_at: std::time::Instant::now(),
    };
    let app = api::router(state);
    let scheduler = Scheduler::start(shared, schedule);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        db = %args.db,
        dim = args.embed_dim,
        embed = %embed_status,
        auth = auth_status,
        "leepa-memory starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutting down");
}
