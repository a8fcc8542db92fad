use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Runtime configuration for one batch run, resolved once at startup and
/// passed by reference into the components that need it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feed_url: String,
    pub feed_volume_min: u64,
    pub feed_limit: u32,
    /// Upper bound on concurrently enriched markets.
    pub worker_limit: usize,
    /// Part of the deployment's configuration contract; the sink currently
    /// upserts row-by-row from independent workers.
    #[allow(dead_code)]
    pub insert_batch_size: usize,
    pub image_prompt_path: PathBuf,
    pub description_prompt_path: PathBuf,
    pub style_image_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            feed_url: var_or("GAMMA_FEED_URL", "https://gamma-api.polymarket.com/markets"),
            feed_volume_min: parse_var("FEED_VOLUME_MIN", 50_000),
            feed_limit: parse_var("FEED_LIMIT", 3000),
            worker_limit: positive_var("MARKET_WORKERS", 5),
            insert_batch_size: positive_var("INSERT_BATCH_SIZE", 5),
            image_prompt_path: var_or("IMAGE_PROMPT_PATH", "marketImagePrompt.txt").into(),
            description_prompt_path: var_or(
                "DESCRIPTION_PROMPT_PATH",
                "marketDescriptionPrompt.txt",
            )
            .into(),
            style_image_path: var_or("STYLE_IMAGE_PATH", "sample_img.png").into(),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn positive_var(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value >= 1)
        .unwrap_or(default)
}
