mod config;
mod enrich;
mod feed;
mod gemini;
mod http;
mod models;
mod pipeline;
mod prompts;
mod storage;
mod supabase;
mod video;

use config::AppConfig;
use enrich::Enricher;
use eyre::eyre;
use feed::GammaFeed;
use gemini::{GeminiClient, GeminiConfig};
use pipeline::{ItemStatus, Pipeline};
use prompts::PromptSet;
use std::sync::Arc;
use storage::SupabaseStorage;
use supabase::SupabaseClient;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();
    if let Err(err) = run().await {
        error!(target = "gamma.main", "run failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let config = AppConfig::from_env();
    let prompts = Arc::new(PromptSet::load(&config)?);
    let gemini = Arc::new(GeminiClient::new(GeminiConfig::from_env()?, prompts));
    let supabase = Arc::new(
        SupabaseClient::from_env()
            .ok_or_else(|| eyre!("SUPABASE_URL and a service key are required"))?,
    );

    match std::env::args().nth(1).as_deref() {
        None | Some("enrich") => run_enrichment(&config, gemini, supabase).await,
        Some("videos") => run_video_backfill(gemini, supabase).await,
        Some(other) => Err(eyre!("unknown mode `{other}`; expected `enrich` or `videos`")),
    }
}

/// Default mode: fetch the open-market snapshot and enrich everything not
/// yet persisted. A feed failure (including an empty feed) aborts before
/// any worker starts.
async fn run_enrichment(
    config: &AppConfig,
    gemini: Arc<GeminiClient>,
    supabase: Arc<SupabaseClient>,
) -> eyre::Result<()> {
    let storage = Arc::new(
        SupabaseStorage::from_env()
            .ok_or_else(|| eyre!("SUPABASE_URL and a service key are required for uploads"))?,
    );
    let feed = GammaFeed::new(config);
    let raw_markets = feed.fetch_open_markets().await?;

    let enricher = Enricher::new(gemini.clone(), gemini, storage);
    let pipeline = Pipeline::new(config.worker_limit, enricher, supabase);
    let summary = pipeline.run(raw_markets).await?;

    for outcome in &summary.outcomes {
        if let ItemStatus::Failed(kind) = &outcome.status {
            debug!(
                target = "gamma.main",
                market_id = %outcome.market_id,
                kind = ?kind,
                "market not enriched"
            );
        }
    }
    info!(
        target = "gamma.main",
        processed = summary.processed(),
        skipped = summary.skipped(),
        failed = summary.failed(),
        "enrichment run complete"
    );
    println!("{}", summary.markets.len());
    Ok(())
}

/// `videos` mode: attach a news video to persisted questions that lack one.
async fn run_video_backfill(
    gemini: Arc<GeminiClient>,
    supabase: Arc<SupabaseClient>,
) -> eyre::Result<()> {
    let twitter = video::TwitterClient::from_env()
        .ok_or_else(|| eyre!("TWITTER_API_KEY is required for the videos mode"))?;
    let linked = video::backfill_videos(supabase.as_ref(), gemini.as_ref(), &twitter).await?;
    info!(target = "gamma.main", linked, "video backfill complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
