use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::active_promotions))
        .route("/health", web::get().to(handlers::health_check));
}
