//! Cron-driven trigger loop that never lets two runs of its job overlap.
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ScheduledJob;

/// Marks a run in progress; released on drop.
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Ran,
    Skipped,
}

pub struct ScrapeScheduler {
    schedule: Schedule,
    initial_delay: Option<Duration>,
    job: Arc<dyn ScheduledJob>,
    running: Arc<AtomicBool>,
}

impl ScrapeScheduler {
    pub fn new(expression: &str, job: Arc<dyn ScheduledJob>) -> Result<Self> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| anyhow!("invalid cron expression '{expression}': {e}"))?;
        Ok(Self {
            schedule,
            initial_delay: None,
            job,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Fires one extra run this long after start, independent of the cron grid.
    pub fn with_initial_delay(mut self, delay: Option<Duration>) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn try_begin(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                flag: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Runs the job unless a previous run is still going. Job failures are logged
    /// and swallowed.
    pub async fn trigger(&self, shutdown: &CancellationToken) -> Trigger {
        let Some(_guard) = self.try_begin() else {
            warn!(job = self.job.name(), "previous run still in progress; skipping trigger");
            return Trigger::Skipped;
        };
        let t0 = Instant::now();
        match self.job.run(shutdown).await {
            Ok(()) => debug!(
                job = self.job.name(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "job finished"
            ),
            Err(e) => error!(
                job = self.job.name(),
                error = %format!("{e:#}"),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "job failed"
            ),
        }
        Trigger::Ran
    }

    fn spawn_trigger(self: &Arc<Self>, inflight: &mut JoinSet<Trigger>, shutdown: &CancellationToken) {
        let this = self.clone();
        let ct = shutdown.clone();
        inflight.spawn(async move { this.trigger(&ct).await });
    }

    /// Sleeps to each cron occurrence and fires the job until `shutdown`. Runs are
    /// spawned so a slow job never delays the schedule; overlapping fires skip.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut inflight: JoinSet<Trigger> = JoinSet::new();
        info!(job = self.job.name(), initial_delay = ?self.initial_delay, "scheduler started");

        if let Some(delay) = self.initial_delay {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => self.spawn_trigger(&mut inflight, &shutdown),
            }
        }

        while !shutdown.is_cancelled() {
            let now = Utc::now();
            let Some(next) = self.next_fire(now) else {
                warn!(job = self.job.name(), "cron schedule has no upcoming occurrence; stopping");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(job = self.job.name(), next = %next, "next run scheduled");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            self.spawn_trigger(&mut inflight, &shutdown);

            while let Some(res) = inflight.try_join_next() {
                if let Err(e) = res {
                    error!(error = %e, "scheduled run panicked");
                }
            }
        }

        info!(inflight = inflight.len(), "scheduler: shutdown");
        while let Some(res) = inflight.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "scheduled run panicked");
            }
        }
    }
}
