//! Keeps the shared session logged on for the lifetime of the service.
use std::sync::Arc;
use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::session::{SessionError, SteamSession};

pub struct ConnectionHandler {
    session: Arc<SteamSession>,
    check_every: Duration,
    retry_base: Duration,
    retry_max: Duration,
    shutdown_grace: Duration,
}

impl ConnectionHandler {
    pub fn new(session: Arc<SteamSession>, check_every: Duration) -> Self {
        Self {
            session,
            check_every: check_every.max(Duration::from_millis(1)),
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn with_retry(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base = base;
        self.retry_max = max.max(base);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    async fn establish(&self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        self.session.connect(shutdown).await?;
        self.session.log_on(shutdown).await
    }

    /// Connects and logs on, then re-establishes the session whenever a periodic
    /// check finds it not logged on. Logs off and disconnects once `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut backoff = self.retry_base;
        loop {
            if !self.session.is_logged_on() {
                match self.establish(&shutdown).await {
                    Ok(()) => {
                        backoff = self.retry_base;
                    }
                    Err(SessionError::Cancelled { .. }) => break,
                    Err(e) => {
                        let cap = backoff.min(self.retry_max);
                        let jitter_ms = thread_rng().gen_range(0..=cap.as_millis() as u64);
                        let delay = cap + Duration::from_millis(jitter_ms);
                        warn!(error = %e, state = %self.session.state(), retry_in_ms = delay.as_millis() as u64, "steam session setup failed; will back off");
                        backoff = backoff.saturating_mul(2).min(self.retry_max);
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        self.teardown().await;
    }

    async fn teardown(&self) {
        info!(state = %self.session.state(), "steam connection: shutdown");
        // the service token is already cancelled; give the farewell calls their own
        let grace = CancellationToken::new();
        let farewell = async {
            self.session.log_off(&grace).await?;
            self.session.disconnect(&grace).await
        };
        match tokio::time::timeout(self.shutdown_grace, farewell).await {
            Ok(Ok(())) => info!("steam connection closed"),
            Ok(Err(e)) => warn!(error = %e, "steam teardown failed"),
            Err(_) => warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "steam teardown timed out"
            ),
        }
    }
}
