use std::sync::Arc;
use std::time::Instant;

use actix_web::middleware::{Compress, Logger};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::api::routes;
use crate::database_ops::db::Db;
use crate::steam::session::SteamSession;

pub struct AppState {
    pub db: Db,
    pub session: Option<Arc<SteamSession>>,
    pub started: Instant,
}

impl AppState {
    pub fn new(db: Db, session: Option<Arc<SteamSession>>) -> Self {
        Self {
            db,
            session,
            started: Instant::now(),
        }
    }
}

pub struct ApiServer {
    pub bind_addr: String,
}

impl ApiServer {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
        }
    }

    /// Serves until `shutdown` fires, then stops gracefully.
    pub async fn run(self, state: AppState, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(addr = %self.bind_addr, "starting read API");

        let data = web::Data::new(state);
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .wrap(Logger::default())
                .wrap(Compress::default())
                .configure(routes::configure_routes)
        })
        .workers(1)
        .disable_signals()
        .bind(&self.bind_addr)
        .with_context(|| format!("Failed to bind to {}", self.bind_addr))?
        .run();

        let handle = server.handle();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            handle.stop(true).await;
        });

        server.await.context("HTTP server error")?;
        tracing::info!("read API stopped");
        Ok(())
    }
}
