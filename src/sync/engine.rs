//! One incremental scrape over the PICS change feed.
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::cursor::ChangeCursor;
use super::SyncError;
use crate::steam::keyvalue::KeyValueTree;
use crate::steam::promotion::{find_partial_promotions, resolve_full, FullPromotion, PartialPromotion};
use crate::steam::session::SteamSession;

pub struct CatalogSyncEngine {
    session: Arc<SteamSession>,
    cursor: ChangeCursor,
}

/// Races `fut` against shutdown; the request itself is left to finish on its own.
async fn or_cancelled<T>(shutdown: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, SyncError> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(SyncError::Cancelled),
        out = fut => Ok(out),
    }
}

fn checkpoint(shutdown: &CancellationToken) -> Result<(), SyncError> {
    if shutdown.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

impl CatalogSyncEngine {
    pub fn new(session: Arc<SteamSession>, cursor: ChangeCursor) -> Self {
        Self { session, cursor }
    }

    pub fn cursor(&self) -> &ChangeCursor {
        &self.cursor
    }

    /// Runs a full cycle: change feed, cursor advance, batched product info,
    /// promotion detection and per-app follow-ups.
    ///
    /// The cursor moves as soon as the change feed answers, so a failure further
    /// down never replays the same window. A failed batch lookup disconnects the
    /// session (the connection supervisor re-establishes it) and yields an empty
    /// result rather than an error.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Result<Vec<FullPromotion>, SyncError> {
        let state = self.session.state();
        let transport_connected = self.session.transport().is_connected();
        if !self.session.is_logged_on() || !transport_connected {
            return Err(SyncError::NotReady {
                state,
                transport_connected,
            });
        }
        checkpoint(shutdown)?;

        let since = self.cursor.current().await.map_err(SyncError::Cursor)?;
        let transport = self.session.transport().clone();

        info!(since = ?since, "requesting change feed");
        let changes = or_cancelled(shutdown, transport.changes_since(since.unwrap_or(0), true, true))
            .await?
            .map_err(SyncError::TransportFailure)?;
        self.cursor
            .advance(changes.current_change_number)
            .await
            .map_err(SyncError::Cursor)?;
        info!(
            current_change_number = changes.current_change_number,
            app_changes = changes.app_changes.len(),
            package_changes = changes.package_changes.len(),
            "change feed received"
        );
        checkpoint(shutdown)?;

        let apps: Vec<u32> = changes.app_changes.keys().copied().collect();
        let packages: Vec<u32> = changes.package_changes.keys().copied().collect();
        if apps.is_empty() && packages.is_empty() {
            return Ok(Vec::new());
        }

        let batch = or_cancelled(shutdown, transport.product_info(&apps, &packages)).await?;
        let batch = match batch {
            Ok(resp) if !resp.failed => resp,
            other => {
                match other {
                    Err(e) => warn!(error = %e, "product info batch failed; disconnecting"),
                    Ok(_) => warn!("product info batch reported failure; disconnecting"),
                }
                if let Err(e) = self.session.disconnect(shutdown).await {
                    warn!(error = %e, "defensive disconnect did not complete");
                }
                return Ok(Vec::new());
            }
        };
        checkpoint(shutdown)?;

        let trees: Vec<KeyValueTree> = batch.descriptors().map(KeyValueTree::from_descriptor).collect();
        let partials = find_partial_promotions(&trees);
        info!(products = trees.len(), candidates = partials.len(), "parsed product info");

        let mut promotions = Vec::with_capacity(partials.len());
        for partial in &partials {
            checkpoint(shutdown)?;
            let span = info_span!("promotion.resolve", app_id = partial.app_id);
            if let Some(full) = self.resolve_one(partial, shutdown).instrument(span).await? {
                promotions.push(full);
            }
        }
        checkpoint(shutdown)?;

        info!(found = promotions.len(), "promotions resolved");
        Ok(promotions)
    }

    /// Follow-up lookup for one candidate. Only cancellation is an error; any
    /// other failure drops this candidate alone.
    async fn resolve_one(
        &self,
        partial: &PartialPromotion,
        shutdown: &CancellationToken,
    ) -> Result<Option<FullPromotion>, SyncError> {
        let transport = self.session.transport();
        let resp = match or_cancelled(shutdown, transport.product_info(&[partial.app_id], &[])).await? {
            Ok(resp) if !resp.failed => resp,
            Ok(_) => {
                warn!("follow-up product info reported failure; dropping candidate");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "follow-up product info failed; dropping candidate");
                return Ok(None);
            }
        };
        let Some(descriptor) = resp.app(partial.app_id) else {
            debug!("follow-up answer did not include the app; dropping candidate");
            return Ok(None);
        };
        let tree = KeyValueTree::from_descriptor(descriptor);
        let full = resolve_full(partial, &tree);
        if full.is_none() {
            debug!("app has no common section; dropping candidate");
        }
        Ok(full)
    }
}
