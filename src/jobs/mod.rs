pub mod scheduler;
pub mod scrape_job;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Unit of work fired by [`scheduler::ScrapeScheduler`].
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, shutdown: &CancellationToken) -> anyhow::Result<()>;
}
