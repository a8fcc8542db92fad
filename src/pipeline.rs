use crate::enrich::Enricher;
use crate::models::{Market, RawMarket};
use crate::supabase::{MarketSink, SinkError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load processed market ids: {0}")]
    SkipLookup(#[from] SinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    Description,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Processed { with_image: bool },
    Skipped,
    Failed(FailureKind),
}

/// Per-item result record. Failures are contained here rather than
/// propagated, so the run summary is the error surface for callers and
/// logging is layered on top.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub market_id: String,
    pub status: ItemStatus,
}

#[derive(Debug)]
pub struct RunSummary {
    /// Markets that made it through enrichment and persistence. Append
    /// order follows completion order and carries no meaning.
    pub markets: Vec<Market>,
    pub outcomes: Vec<ItemOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Processed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, ItemStatus::Failed(_)))
    }

    fn count(&self, predicate: impl Fn(&ItemStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

/// Coordinates one enrichment run: decode, skip already-persisted markets,
/// then fan the rest out across a bounded pool of workers. Per-item errors
/// never abort the run; the coordinator returns only after every worker has
/// joined.
pub struct Pipeline {
    worker_limit: usize,
    enricher: Arc<Enricher>,
    sink: Arc<dyn MarketSink>,
}

impl Pipeline {
    pub fn new(worker_limit: usize, enricher: Enricher, sink: Arc<dyn MarketSink>) -> Self {
        Self {
            worker_limit: worker_limit.max(1),
            enricher: Arc::new(enricher),
            sink,
        }
    }

    pub async fn run(&self, raw_markets: Vec<RawMarket>) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        let processed_ids: HashSet<String> = self.sink.existing_ids().await?;
        info!(
            target = "gamma.pipeline",
            total = raw_markets.len(),
            already_processed = processed_ids.len(),
            workers = self.worker_limit,
            "starting enrichment run"
        );

        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let collected: Arc<Mutex<Vec<Market>>> = Arc::new(Mutex::new(Vec::new()));
        let mut workers: JoinSet<ItemOutcome> = JoinSet::new();
        let mut outcomes = Vec::new();

        for raw in raw_markets {
            let raw_id = raw.id.clone();
            let market = match Market::decode(raw) {
                Ok(market) => market,
                Err(err) => {
                    warn!(
                        target = "gamma.pipeline",
                        market_id = %raw_id,
                        error = %err,
                        "dropping undecodable market"
                    );
                    outcomes.push(ItemOutcome {
                        market_id: raw_id,
                        status: ItemStatus::Failed(FailureKind::Decode),
                    });
                    continue;
                }
            };
            // Checked before dispatch so skipped markets never cost a
            // generation call.
            if processed_ids.contains(&market.id) {
                outcomes.push(ItemOutcome {
                    market_id: market.id,
                    status: ItemStatus::Skipped,
                });
                continue;
            }

            let semaphore = semaphore.clone();
            let enricher = self.enricher.clone();
            let sink = self.sink.clone();
            let collected = collected.clone();
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed");
                process_market(market, enricher, sink, collected).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(target = "gamma.pipeline", error = %err, "worker task aborted"),
            }
        }

        let markets = {
            let mut guard = collected.lock().await;
            std::mem::take(&mut *guard)
        };
        let summary = RunSummary {
            markets,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            target = "gamma.pipeline",
            processed = summary.processed(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
            "enrichment run complete"
        );
        Ok(summary)
    }
}

/// One worker's full path: enrich, persist, then append to the shared
/// collection. Every error terminates only this market's processing.
async fn process_market(
    market: Market,
    enricher: Arc<Enricher>,
    sink: Arc<dyn MarketSink>,
    collected: Arc<Mutex<Vec<Market>>>,
) -> ItemOutcome {
    let market_id = market.id.clone();
    let enriched = match enricher.enrich(&market).await {
        Ok(enriched) => enriched,
        Err(err) => {
            warn!(
                target = "gamma.pipeline",
                market_id = %market_id,
                error = %err,
                "enrichment failed"
            );
            return ItemOutcome {
                market_id,
                status: ItemStatus::Failed(FailureKind::Description),
            };
        }
    };
    let with_image = enriched.image_url.is_some();
    if let Err(err) = sink.upsert_question(&enriched.to_row()).await {
        warn!(
            target = "gamma.pipeline",
            market_id = %market_id,
            error = %err,
            "persist failed"
        );
        return ItemOutcome {
            market_id,
            status: ItemStatus::Failed(FailureKind::Persistence),
        };
    }
    collected.lock().await.push(market);
    ItemOutcome {
        market_id,
        status: ItemStatus::Processed { with_image },
    }
}
