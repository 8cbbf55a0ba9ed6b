pub mod api;
pub mod config;
pub mod database_ops;
pub mod jobs;
pub mod steam;
pub mod sync;
pub mod tracing;

pub mod util {
    pub mod env;
}

use std::sync::Arc;

use anyhow::Result;

use config::ScraperConfig;
use database_ops::catalog::DedupPersister;
use database_ops::db::Db;
use database_ops::settings::DbSettings;
use jobs::scrape_job::ScrapeJob;
use steam::bridge::BridgeTransport;
use steam::pump::CallbackPump;
use steam::session::SteamSession;
use steam::transport::event_queue;
use sync::cursor::{ChangeCursor, SettingSlot};
use sync::engine::CatalogSyncEngine;

/// Everything a process needs to scrape: the shared session, the pump that feeds
/// it, and the job that runs one cycle against the configured store.
pub struct ScraperParts {
    pub session: Arc<SteamSession>,
    pub pump: CallbackPump,
    pub job: ScrapeJob,
}

/// Wires bridge transport, session, cursor and persister from `cfg`. The cursor
/// lives in `cursor_slot` so a dry run can keep it out of the database.
pub fn assemble(cfg: &ScraperConfig, db: &Db, cursor_slot: Option<Arc<dyn SettingSlot>>) -> Result<ScraperParts> {
    let (events, queue) = event_queue();
    let transport = Arc::new(BridgeTransport::new(&cfg.bridge_url, cfg.bridge_timeout, events)?);
    let (session, pump) = steam::wire_session(transport, queue, cfg.session());
    let slot = cursor_slot.unwrap_or_else(|| Arc::new(DbSettings::new(db.clone())));
    let engine = CatalogSyncEngine::new(session.clone(), ChangeCursor::new(slot));
    let job = ScrapeJob::new(engine, DedupPersister::new(db.clone()));
    Ok(ScraperParts { session, pump, job })
}
