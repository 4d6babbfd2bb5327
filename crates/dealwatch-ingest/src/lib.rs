//! Ingestion batch job: generation numbering, lowest-price upserts,
//! price-gap computation, retention pruning, and the cron scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealwatch_core::{price_gap, ProductRecord, ProductSnapshot, RETAINED_GENERATIONS};
use dealwatch_partner::{PartnerClient, PartnerConfig};
use dealwatch_storage::{SnapshotStore, SqliteStore, StoreError};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dealwatch-ingest";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: String,
    pub category_id: String,
    pub fetch_limit: u32,
    pub ingest_cron_1: String,
    pub ingest_cron_2: String,
    pub partner: PartnerConfig,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let partner_defaults = PartnerConfig::default();
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://dealwatch.db".to_string()),
            category_id: std::env::var("DEALWATCH_CATEGORY_ID")
                .unwrap_or_else(|_| "1016".to_string()),
            fetch_limit: std::env::var("DEALWATCH_FETCH_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            ingest_cron_1: std::env::var("INGEST_CRON_1")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            ingest_cron_2: std::env::var("INGEST_CRON_2")
                .unwrap_or_else(|_| "0 0 18 * * *".to_string()),
            partner: PartnerConfig {
                base_url: std::env::var("DEALWATCH_API_BASE")
                    .unwrap_or(partner_defaults.base_url),
                access_key: std::env::var("DEALWATCH_ACCESS_KEY").unwrap_or_default(),
                secret_key: std::env::var("DEALWATCH_SECRET_KEY").unwrap_or_default(),
                sub_id: std::env::var("DEALWATCH_SUB_ID").unwrap_or(partner_defaults.sub_id),
                image_size: std::env::var("DEALWATCH_IMAGE_SIZE")
                    .unwrap_or(partner_defaults.image_size),
                timeout: std::env::var("DEALWATCH_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(partner_defaults.timeout),
            },
        }
    }
}

/// Upstream seam for the pipeline; the partner client is the production
/// implementation, tests script their own batches.
#[async_trait]
pub trait ProductSource: Send + Sync {
    async fn fetch_batch(&self) -> Result<Vec<ProductRecord>>;
}

pub struct PartnerSource {
    client: PartnerClient,
    category_id: String,
    limit: u32,
}

impl PartnerSource {
    pub fn new(client: PartnerClient, category_id: String, limit: u32) -> Self {
        Self {
            client,
            category_id,
            limit,
        }
    }
}

#[async_trait]
impl ProductSource for PartnerSource {
    async fn fetch_batch(&self) -> Result<Vec<ProductRecord>> {
        let products = self
            .client
            .fetch_best_products(&self.category_id, self.limit)
            .await?;
        Ok(products)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    Updated,
    Skipped,
}

/// Per-run accounting; every record lands in exactly one counter.
#[derive(Debug, Clone, Serialize)]
pub struct IngestRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub generation: i64,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pruned_generation: Option<i64>,
    pub pruned_rows: u64,
}

#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn SnapshotStore>,
    source: Arc<dyn ProductSource>,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn SnapshotStore>, source: Arc<dyn ProductSource>) -> Self {
        Self { store, source }
    }

    /// One ingestion run: fetch, tag with a fresh generation, prune the
    /// expired generation, then apply records one at a time.
    ///
    /// A fetch failure aborts before any write. Per-record store failures are
    /// logged and counted; the rest of the batch still goes through.
    pub async fn run_once(&self) -> Result<IngestRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let batch = self
            .source
            .fetch_batch()
            .await
            .context("fetching product batch")?;

        let generation = self
            .store
            .latest_generation()
            .await
            .context("reading latest generation")?
            .map_or(0, |g| g + 1);

        let mut pruned_generation = None;
        let mut pruned_rows = 0u64;
        if generation >= RETAINED_GENERATIONS {
            let expired = generation - RETAINED_GENERATIONS;
            match self.store.delete_generation(expired).await {
                Ok(rows) => {
                    pruned_generation = Some(expired);
                    pruned_rows = rows;
                    info!(expired, rows, "pruned expired generation");
                }
                Err(err) => warn!(expired, error = %err, "pruning expired generation failed"),
            }
        }

        let (mut inserted, mut updated, mut skipped, mut failed) = (0, 0, 0, 0);
        for record in &batch {
            match self.apply_record(record, generation).await {
                Ok(RecordOutcome::Inserted) => inserted += 1,
                Ok(RecordOutcome::Updated) => updated += 1,
                Ok(RecordOutcome::Skipped) => skipped += 1,
                Err(err) => {
                    failed += 1;
                    warn!(product_id = record.product_id, error = %err, "record dropped");
                }
            }
        }

        let finished_at = Utc::now();
        info!(
            %run_id,
            generation,
            fetched = batch.len(),
            inserted,
            updated,
            skipped,
            failed,
            "ingest run complete"
        );

        Ok(IngestRunSummary {
            run_id,
            started_at,
            finished_at,
            generation,
            fetched: batch.len(),
            inserted,
            updated,
            skipped,
            failed,
            pruned_generation,
            pruned_rows,
        })
    }

    async fn apply_record(
        &self,
        record: &ProductRecord,
        generation: i64,
    ) -> Result<RecordOutcome, StoreError> {
        let current = self
            .store
            .current_snapshot(record.product_id, generation)
            .await?;
        if let Some(existing) = &current {
            // Already holding an equal-or-better price for this generation.
            if existing.product_price <= record.product_price {
                return Ok(RecordOutcome::Skipped);
            }
        }

        let reference = self
            .store
            .prior_snapshot(record.product_id, generation)
            .await?
            .map(|prior| prior.product_price);
        let gap = price_gap(record.product_price, reference);

        let snapshot = ProductSnapshot::from_record(record, generation, gap, Utc::now());
        self.store.upsert_snapshot(&snapshot).await?;

        Ok(if current.is_some() {
            RecordOutcome::Updated
        } else {
            RecordOutcome::Inserted
        })
    }
}

/// Wire a pipeline from config: sqlite store (migrated) + partner client.
pub async fn pipeline_from_config(config: &IngestConfig) -> Result<(IngestPipeline, SqliteStore)> {
    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    store.migrate().await.context("migrating schema")?;

    let client = PartnerClient::new(config.partner.clone()).context("building partner client")?;
    let source = PartnerSource::new(client, config.category_id.clone(), config.fetch_limit);
    let pipeline = IngestPipeline::new(Arc::new(store.clone()), Arc::new(source));
    Ok((pipeline, store))
}

/// Twice-daily scheduler over the two configured cron slots.
pub async fn build_scheduler(pipeline: IngestPipeline, config: &IngestConfig) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&config.ingest_cron_1, &config.ingest_cron_2] {
        let pipeline = pipeline.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        generation = summary.generation,
                        "scheduled ingest complete"
                    ),
                    Err(err) => warn!(error = %err, "scheduled ingest failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(sched)
}
