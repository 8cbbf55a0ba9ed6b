use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use steam_promo_scraper::config::ScraperConfig;
use steam_promo_scraper::database_ops::db::Db;
use steam_promo_scraper::database_ops::settings::DbSettings;
use steam_promo_scraper::jobs::scrape_job::JobOutcome;
use steam_promo_scraper::sync::cursor::{ChangeCursor, MemorySlot, SettingSlot};
use steam_promo_scraper::{assemble, ScraperParts};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "scrape_once", version, about = "Run a single Steam free-promotion scrape and exit")]
struct Cli {
    /// Optional override for DATABASE_URL
    #[arg(long)]
    db_url: Option<String>,
    /// Print promotions instead of storing them; the stored cursor is left untouched
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Start the dry run from this change number instead of the stored cursor
    #[arg(long, requires = "dry_run")]
    since: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    steam_promo_scraper::util::env::init_env();
    steam_promo_scraper::tracing::init_tracing("info,sqlx=warn")?;
    let Cli { db_url, dry_run, since } = Cli::parse();

    let mut cfg = ScraperConfig::from_env()?;
    if let Some(url) = db_url {
        cfg.database_url = url;
    }
    let db = Db::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .context("Db::connect failed")?;

    let cursor_slot: Option<Arc<dyn SettingSlot>> = if dry_run {
        let start = match since {
            Some(n) => Some(n),
            None => ChangeCursor::new(Arc::new(DbSettings::new(db.clone())))
                .current()
                .await?,
        };
        let slot = match start {
            Some(n) => MemorySlot::with_value(n.to_string()),
            None => MemorySlot::default(),
        };
        Some(Arc::new(slot))
    } else {
        None
    };

    let ScraperParts { session, pump, job } = assemble(&cfg, &db, cursor_slot)?;
    let pump_shutdown = CancellationToken::new();
    let pump_task = tokio::spawn(pump.run(pump_shutdown.clone()));

    let shutdown = CancellationToken::new();
    {
        let ct = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received; cancelling");
                ct.cancel();
            }
        });
    }

    let result = async {
        session.connect(&shutdown).await?;
        session.log_on(&shutdown).await?;
        if dry_run {
            let found = job.engine().run_cycle(&shutdown).await?;
            println!("{}", serde_json::to_string_pretty(&found)?);
        } else {
            match job.execute(&shutdown).await? {
                JobOutcome::Skipped(reason) => println!("[scrape_once] skipped: {reason}"),
                JobOutcome::Completed { promotions, store } => println!(
                    "[scrape_once] promotions={} inserted={} duplicates={}",
                    promotions, store.inserted, store.duplicates
                ),
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    let farewell = CancellationToken::new();
    let _ = tokio::time::timeout(cfg.bridge_timeout, async {
        let _ = session.log_off(&farewell).await;
        let _ = session.disconnect(&farewell).await;
    })
    .await;
    pump_shutdown.cancel();
    let _ = pump_task.await;
    db.pool.close().await;
    info!("scrape_once finished");
    result
}
