use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ScheduledJob;
use crate::database_ops::catalog::{CatalogRecord, DedupPersister, StoreSummary};
use crate::sync::engine::CatalogSyncEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The cycle could not start or was interrupted; nothing to retry before the next tick.
    Skipped(String),
    Completed {
        promotions: usize,
        store: StoreSummary,
    },
}

/// One scrape-and-store pass: sync cycle, record mapping, deduplicated insert.
pub struct ScrapeJob {
    engine: CatalogSyncEngine,
    persister: DedupPersister,
}

impl ScrapeJob {
    pub fn new(engine: CatalogSyncEngine, persister: DedupPersister) -> Self {
        Self { engine, persister }
    }

    pub fn engine(&self) -> &CatalogSyncEngine {
        &self.engine
    }

    pub async fn execute(&self, shutdown: &CancellationToken) -> Result<JobOutcome> {
        let t0 = Instant::now();
        let promotions = match self.engine.run_cycle(shutdown).await {
            Ok(found) => found,
            Err(e) if e.is_skip() => {
                info!(reason = %e, "scrape skipped");
                return Ok(JobOutcome::Skipped(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let records: Vec<CatalogRecord> = promotions.iter().map(CatalogRecord::from).collect();
        let store = self.persister.store(&records, shutdown).await?;
        info!(
            promotions = promotions.len(),
            inserted = store.inserted,
            duplicates = store.duplicates,
            committed = store.committed,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "scrape job complete"
        );
        Ok(JobOutcome::Completed {
            promotions: promotions.len(),
            store,
        })
    }
}

#[async_trait]
impl ScheduledJob for ScrapeJob {
    fn name(&self) -> &'static str {
        "scrape_and_store"
    }

    async fn run(&self, shutdown: &CancellationToken) -> Result<()> {
        self.execute(shutdown).await.map(|_| ())
    }
}
