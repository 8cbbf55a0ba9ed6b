use std::sync::Arc;

use anyhow::{Context, Result};
use steam_promo_scraper::api::{ApiServer, AppState};
use steam_promo_scraper::config::ScraperConfig;
use steam_promo_scraper::database_ops::db::Db;
use steam_promo_scraper::jobs::scheduler::ScrapeScheduler;
use steam_promo_scraper::steam::connection::ConnectionHandler;
use steam_promo_scraper::{assemble, ScraperParts};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    steam_promo_scraper::util::env::init_env();
    steam_promo_scraper::tracing::init_tracing("info,sqlx=warn,actix_web=warn")?;

    let cfg = ScraperConfig::from_env()?;

    // --- DB connect ----------------------------------------------------------
    let db = Db::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .context("Db::connect failed")?;
    info!(max_conns = cfg.db_max_connections, "database ready");

    let ScraperParts { session, pump, job } = assemble(&cfg, &db, None)?;
    let scheduler = Arc::new(
        ScrapeScheduler::new(&cfg.schedule, Arc::new(job))?.with_initial_delay(cfg.initial_delay),
    );

    // --- shutdown wiring -----------------------------------------------------
    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    // the pump outlives the supervisor so the farewell callbacks still land
    let pump_shutdown = CancellationToken::new();
    let pump_task = tokio::spawn(pump.run(pump_shutdown.clone()));

    {
        let handler = ConnectionHandler::new(session.clone(), cfg.reconnect_every);
        let ct = shutdown.clone();
        tasks.spawn(async move {
            handler.run(ct).await;
            info!("connection supervisor stopped");
        });
    }

    {
        let ct = shutdown.clone();
        let scheduler = scheduler.clone();
        tasks.spawn(async move {
            scheduler.run(ct).await;
        });
    }

    // --- optional HTTP read surface ------------------------------------------
    if let Some(addr) = cfg.http_addr.clone() {
        let state = AppState::new(db.clone(), Some(session.clone()));
        let ct = shutdown.clone();
        tasks.spawn(async move {
            if let Err(e) = ApiServer::new(addr).run(state, ct).await {
                error!(error = %format!("{e:#}"), "http server error");
            }
        });
    }

    info!(schedule = %cfg.schedule, "service started; press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "ctrl_c listener failed; shutting down");
    }
    info!("shutdown: Ctrl+C received");
    shutdown.cancel();

    info!("shutdown: gracefully stopping {} task(s)...", tasks.len());
    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "task join error");
        }
    }

    pump_shutdown.cancel();
    match pump_task.await {
        Ok(dispatched) => info!(dispatched, "callback pump stopped"),
        Err(e) => error!(error = %e, "callback pump join error"),
    }
    db.pool.close().await;
    info!("all tasks stopped; goodbye");
    Ok(())
}
