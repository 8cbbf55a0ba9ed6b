//! Read-only HTTP surface over the stored catalog.

pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
