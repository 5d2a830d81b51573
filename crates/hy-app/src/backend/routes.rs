use std::sync::Arc;
use axum::Router;
use axum::routing::{get, post};
use crate::backend::routes::download::download_model;
use crate::backend::routes::generate::{generate_multi_no_preview, generate_no_preview};
use crate::backend::routes::status::{interrupt, ping, status};
use crate::backend::state::AppState;

mod download;
mod generate;
mod status;

pub const MODEL_URL: &str = "/download/model";

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(ping))
        .route("/status", get(status))
        .route("/generate_no_preview", post(generate_no_preview))
        .route("/generate_multi_no_preview", post(generate_multi_no_preview))
        .route("/interrupt", post(interrupt))
        .route(MODEL_URL, get(download_model))
}
