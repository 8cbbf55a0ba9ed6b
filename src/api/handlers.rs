use actix_web::{web, HttpResponse, Result};
use chrono::Utc;
use tracing::error;

use crate::api::models::{ErrorBody, HealthResponse};
use crate::api::server::AppState;
use crate::database_ops::catalog::active_records;

/// Promotions whose window contains the current instant.
pub async fn active_promotions(state: web::Data<AppState>) -> Result<HttpResponse> {
    match active_records(&state.db, Utc::now()).await {
        Ok(records) => Ok(HttpResponse::Ok().json(records)),
        Err(e) => {
            error!(error = %format!("{e:#}"), "active promotions query failed");
            Ok(HttpResponse::InternalServerError().json(ErrorBody::new("storage unavailable")))
        }
    }
}

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let db_status = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let response = HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        steam_session: state.session.as_ref().map(|s| s.state().to_string()),
        uptime_seconds: state.started.elapsed().as_secs(),
    };
    Ok(HttpResponse::Ok().json(response))
}
